// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and
//! operational logging in the engine. Message types follow a struct-based
//! pattern with a `Display` implementation, so log text lives in one place
//! and every event carries the same structured fields wherever it is emitted.
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - run lifecycle and node execution events
//! * `messages::cache` - cache consultation and persistence
//! * `messages::graph` - graph construction events
//! * `messages::config` - configuration and runtime setup
//!
//! # Usage
//!
//! ```rust
//! use ephyflow::observability::messages::cache::CacheMiss;
//! use ephyflow::observability::messages::StructuredLog;
//!
//! CacheMiss {
//!     node: "psd[subject_id=sub-01]",
//!     fingerprint: "9f2c41d0aa7e",
//! }
//! .log();
//! ```
//!
//! Binaries install a subscriber with [`init_tracing`].

use tracing_subscriber::EnvFilter;

pub mod messages;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
