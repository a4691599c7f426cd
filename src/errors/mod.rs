// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod aggregation;
mod config;
mod execution;

pub use aggregation::AggregationError;
pub use config::{BuildError, ConfigurationError, SlotError};
pub use execution::{ActionError, CacheError};
