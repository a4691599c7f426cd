// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use crate::cache::{CacheEntry, Fingerprint};
use crate::errors::CacheError;

/// Storage for completed node invocations, keyed by fingerprint.
///
/// Only the scheduler's coordinator calls into a store during a run. Lookups
/// are advisory: any error is logged by the caller and treated as a miss.
pub trait CacheStore: Send + Sync {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Called only after a node completed and its outputs were validated.
    fn commit(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Directory an invocation may write artifacts into. Stores without a
    /// filesystem location return `None`.
    fn work_dir(&self, _fingerprint: &Fingerprint) -> Result<Option<PathBuf>, CacheError> {
        Ok(None)
    }
}
