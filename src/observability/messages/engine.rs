// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for scheduler run lifecycle and node execution events.
//!
//! This module contains message types for logging events related to:
//! * Run start and completion (success or partial failure)
//! * Node dispatch, completion and failure
//! * Failure propagation to descendants
//! * Cancellation and manifest output

use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

use tracing::Span;

use crate::errors::ActionError;
use crate::observability::messages::StructuredLog;

/// Run started.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use ephyflow::observability::messages::engine::RunStarted;
///
/// let msg = RunStarted {
///     node_count: 9,
///     workers: 4,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct RunStarted {
    pub node_count: usize,
    pub workers: usize,
}

impl Display for RunStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting pipeline run: {} nodes, workers={}",
            self.node_count, self.workers
        )
    }
}

impl StructuredLog for RunStarted {
    fn log(&self) {
        tracing::info!(
            node_count = self.node_count,
            workers = self.workers,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run",
            span_name = name,
            node_count = self.node_count,
            workers = self.workers,
        )
    }
}

/// Run finished with every node Completed or Cached.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunSucceeded {
    pub executed: usize,
    pub cached: usize,
    pub duration: Duration,
}

impl Display for RunSucceeded {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pipeline run succeeded: {} executed, {} cached in {:?}",
            self.executed, self.cached, self.duration
        )
    }
}

impl StructuredLog for RunSucceeded {
    fn log(&self) {
        tracing::info!(
            executed = self.executed,
            cached = self.cached,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run_succeeded",
            span_name = name,
            executed = self.executed,
            cached = self.cached,
            duration = ?self.duration,
        )
    }
}

/// Run finished with failed, blocked or cancelled nodes.
///
/// # Log Level
/// `warn!` - The run produced partial results
pub struct RunPartiallyFailed {
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub duration: Duration,
}

impl Display for RunPartiallyFailed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pipeline run finished with partial failure: {} failed, {} blocked, {} cancelled in {:?}",
            self.failed, self.blocked, self.cancelled, self.duration
        )
    }
}

impl StructuredLog for RunPartiallyFailed {
    fn log(&self) {
        tracing::warn!(
            failed = self.failed,
            blocked = self.blocked,
            cancelled = self.cancelled,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "run_partial_failure",
            span_name = name,
            failed = self.failed,
            blocked = self.blocked,
            cancelled = self.cancelled,
        )
    }
}

/// A node was handed to a worker.
///
/// # Log Level
/// `debug!` - Per-node detail
pub struct NodeDispatched<'a> {
    pub node: &'a str,
    pub fingerprint: &'a str,
    pub in_flight: usize,
}

impl Display for NodeDispatched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dispatching node '{}' ({}), {} in flight",
            self.node, self.fingerprint, self.in_flight
        )
    }
}

impl StructuredLog for NodeDispatched<'_> {
    fn log(&self) {
        tracing::debug!(
            node = self.node,
            fingerprint = self.fingerprint,
            in_flight = self.in_flight,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "node",
            span_name = name,
            node = self.node,
            fingerprint = self.fingerprint,
        )
    }
}

/// # Log Level
/// `info!`
pub struct NodeCompleted<'a> {
    pub node: &'a str,
    pub duration: Duration,
}

impl Display for NodeCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Node '{}' completed in {:?}", self.node, self.duration)
    }
}

impl StructuredLog for NodeCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            node = self.node,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "node_completed",
            span_name = name,
            node = self.node,
            duration = ?self.duration,
        )
    }
}

/// Node action returned an error, panicked or produced bad outputs.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use ephyflow::errors::ActionError;
/// use ephyflow::observability::messages::engine::NodeFailed;
///
/// let error = ActionError::failed("no EOG channel found");
/// let msg = NodeFailed {
///     node: "ica[subject_id=sub-02]",
///     error: &error,
/// };
///
/// tracing::error!("{}", msg);
/// ```
pub struct NodeFailed<'a> {
    pub node: &'a str,
    pub error: &'a ActionError,
}

impl Display for NodeFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Node '{}' failed: {}", self.node, self.error)
    }
}

impl StructuredLog for NodeFailed<'_> {
    fn log(&self) {
        tracing::error!(
            node = self.node,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "node_failed",
            span_name = name,
            node = self.node,
            error = %self.error,
        )
    }
}

/// Descendants of a failed node will not run.
///
/// # Log Level
/// `warn!`
pub struct DescendantsBlocked<'a> {
    pub failed: &'a str,
    pub blocked: usize,
}

impl Display for DescendantsBlocked<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Blocking {} downstream node(s) of failed node '{}'",
            self.blocked, self.failed
        )
    }
}

impl StructuredLog for DescendantsBlocked<'_> {
    fn log(&self) {
        tracing::warn!(failed = self.failed, blocked = self.blocked, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "descendants_blocked",
            span_name = name,
            failed = self.failed,
            blocked = self.blocked,
        )
    }
}

/// Cancellation was requested; in-flight nodes are allowed to finish.
///
/// # Log Level
/// `warn!`
pub struct RunCancelled {
    pub in_flight: usize,
    pub not_started: usize,
}

impl Display for RunCancelled {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Run cancelled: waiting for {} running node(s), {} node(s) will not start",
            self.in_flight, self.not_started
        )
    }
}

impl StructuredLog for RunCancelled {
    fn log(&self) {
        tracing::warn!(
            in_flight = self.in_flight,
            not_started = self.not_started,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "run_cancelled",
            span_name = name,
            in_flight = self.in_flight,
            not_started = self.not_started,
        )
    }
}

/// # Log Level
/// `info!`
pub struct ManifestWritten<'a> {
    pub path: &'a Path,
}

impl Display for ManifestWritten<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Run manifest written to {}", self.path.display())
    }
}

impl StructuredLog for ManifestWritten<'_> {
    fn log(&self) {
        tracing::info!(path = %self.path.display(), "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("manifest", span_name = name, path = %self.path.display())
    }
}
