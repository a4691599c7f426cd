// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for cache consultation and persistence.

use std::fmt::{Display, Formatter};

use tracing::Span;

use crate::errors::CacheError;
use crate::observability::messages::StructuredLog;

/// A node was satisfied from the cache and will not execute.
///
/// # Log Level
/// `info!`
///
/// # Example
/// ```
/// use ephyflow::observability::messages::cache::CacheHit;
///
/// let msg = CacheHit {
///     node: "psd[subject_id=sub-01]",
///     fingerprint: "9f2c41d0aa7e",
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct CacheHit<'a> {
    pub node: &'a str,
    pub fingerprint: &'a str,
}

impl Display for CacheHit<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cache hit for node '{}' ({})", self.node, self.fingerprint)
    }
}

impl StructuredLog for CacheHit<'_> {
    fn log(&self) {
        tracing::info!(node = self.node, fingerprint = self.fingerprint, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "cache_hit",
            span_name = name,
            node = self.node,
            fingerprint = self.fingerprint,
        )
    }
}

/// # Log Level
/// `debug!`
pub struct CacheMiss<'a> {
    pub node: &'a str,
    pub fingerprint: &'a str,
}

impl Display for CacheMiss<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cache miss for node '{}' ({})", self.node, self.fingerprint)
    }
}

impl StructuredLog for CacheMiss<'_> {
    fn log(&self) {
        tracing::debug!(node = self.node, fingerprint = self.fingerprint, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "cache_miss",
            span_name = name,
            node = self.node,
            fingerprint = self.fingerprint,
        )
    }
}

/// Lookup skipped because the node is in the force-rerun set.
///
/// # Log Level
/// `info!`
pub struct CacheBypassed<'a> {
    pub node: &'a str,
}

impl Display for CacheBypassed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Forcing rerun of node '{}', cache lookup skipped", self.node)
    }
}

impl StructuredLog for CacheBypassed<'_> {
    fn log(&self) {
        tracing::info!(node = self.node, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("cache_bypassed", span_name = name, node = self.node)
    }
}

/// Lookup failed (corrupt entry, vanished artifact, I/O). Treated as a miss.
///
/// # Log Level
/// `warn!`
pub struct CacheLookupFailed<'a> {
    pub node: &'a str,
    pub error: &'a CacheError,
}

impl Display for CacheLookupFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cache lookup for node '{}' failed, re-executing: {}",
            self.node, self.error
        )
    }
}

impl StructuredLog for CacheLookupFailed<'_> {
    fn log(&self) {
        tracing::warn!(node = self.node, error = %self.error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cache_lookup_failed",
            span_name = name,
            node = self.node,
            error = %self.error,
        )
    }
}

/// Commit failed. The node still counts as Completed for this run.
///
/// # Log Level
/// `warn!`
pub struct CacheCommitFailed<'a> {
    pub node: &'a str,
    pub error: &'a CacheError,
}

impl Display for CacheCommitFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Failed to cache result of node '{}': {}", self.node, self.error)
    }
}

impl StructuredLog for CacheCommitFailed<'_> {
    fn log(&self) {
        tracing::warn!(node = self.node, error = %self.error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cache_commit_failed",
            span_name = name,
            node = self.node,
            error = %self.error,
        )
    }
}
