// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Content-addressed memoization of node invocations.

mod entry;
mod fingerprint;
mod fs_store;
mod memory;

pub use entry::CacheEntry;
pub use fingerprint::{fingerprint, hash_file, Fingerprint, FINGERPRINT_SCHEMA_VERSION};
pub use fs_store::FsCache;
pub use memory::MemoryCache;
