// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message is a small struct that implements `Display` for the human
//! readable line and [`StructuredLog`] for emitting it with structured fields
//! at its fixed level.
//!
//! # Organization
//!
//! * `engine` - run lifecycle, dispatch, failures, blocking and cancellation
//! * `cache` - hits, misses, bypasses and store errors
//! * `graph` - graph finalization and expansion
//! * `config` - configuration loading
//!
//! # Usage Pattern
//!
//! ```rust
//! use ephyflow::observability::messages::engine::RunStarted;
//! use ephyflow::observability::messages::StructuredLog;
//!
//! let msg = RunStarted {
//!     node_count: 12,
//!     workers: 4,
//! };
//!
//! msg.log();
//! ```

use tracing::Span;

pub mod cache;
pub mod config;
pub mod engine;
pub mod graph;

/// A log message that knows its level and its structured fields.
pub trait StructuredLog {
    /// Emits the message as an event at its level.
    fn log(&self);

    /// Opens a span carrying the message's fields.
    fn span(&self, name: &str) -> Span;
}
