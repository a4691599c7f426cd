// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Explicit per-run state.
//!
//! A [`RunRecord`] is created by the scheduler at the start of a run, mutated
//! only by its coordinator loop and handed to the caller when the run ends.
//! It holds the finalized graph, the state of every node, fingerprints,
//! outputs, failures and timing. Nothing about a run lives anywhere else.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::cache::Fingerprint;
use crate::errors::ActionError;
use crate::graph::{Graph, NodeId, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cached,
    /// An ancestor failed
    Blocked,
    /// Not started before cancellation
    Cancelled,
}

impl NodeState {
    /// Completed or Cached.
    pub fn is_success(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Cached)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeState::Pending | NodeState::Ready | NodeState::Running)
    }

    fn dot_colour(self) -> Option<&'static str> {
        match self {
            NodeState::Completed => Some("palegreen"),
            NodeState::Cached => Some("lightblue"),
            NodeState::Failed => Some("salmon"),
            NodeState::Blocked => Some("orange"),
            NodeState::Cancelled => Some("lightgrey"),
            NodeState::Pending | NodeState::Ready | NodeState::Running => None,
        }
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Pending => "pending",
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Cached => "cached",
            NodeState::Blocked => "blocked",
            NodeState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything recorded about one node during a run.
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    pub state: NodeState,
    pub fingerprint: Option<Fingerprint>,
    pub outputs: BTreeMap<String, Value>,
    pub artifacts: Vec<PathBuf>,
    pub error: Option<ActionError>,
    pub blocked_by: Option<NodeId>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedNode {
    pub node: NodeId,
    pub name: String,
    pub error: ActionError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockedNode {
    pub node: NodeId,
    pub name: String,
    /// The failed ancestor that blocked this node
    pub blocked_by: NodeId,
    pub blocked_by_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every node Completed or Cached
    Success,
    PartialFailure {
        failed: Vec<FailedNode>,
        blocked: Vec<BlockedNode>,
        cancelled: Vec<NodeId>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

#[derive(Debug)]
pub struct RunRecord {
    graph: Arc<Graph>,
    nodes: Vec<NodeRecord>,
    duration: Duration,
}

impl RunRecord {
    pub(crate) fn new(graph: Arc<Graph>) -> Self {
        let nodes = vec![NodeRecord::default(); graph.len()];
        Self {
            graph,
            nodes,
            duration: Duration::ZERO,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id.index())
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        self.nodes
            .get(id.index())
            .map(|record| record.state)
            .unwrap_or_default()
    }

    /// Convenience lookup by node name.
    pub fn state_of(&self, name: &str) -> Option<NodeState> {
        self.graph.find(name).map(|id| self.state(id))
    }

    pub fn output(&self, id: NodeId, slot: &str) -> Option<&Value> {
        self.nodes.get(id.index()).and_then(|record| record.outputs.get(slot))
    }

    pub fn fingerprint(&self, id: NodeId) -> Option<&Fingerprint> {
        self.nodes.get(id.index()).and_then(|record| record.fingerprint.as_ref())
    }

    pub fn error(&self, id: NodeId) -> Option<&ActionError> {
        self.nodes.get(id.index()).and_then(|record| record.error.as_ref())
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Nodes in `state`, in topological order.
    pub fn in_state(&self, state: NodeState) -> Vec<NodeId> {
        self.graph
            .topological_order()
            .iter()
            .copied()
            .filter(|id| self.state(*id) == state)
            .collect()
    }

    pub fn executed(&self) -> Vec<NodeId> {
        self.in_state(NodeState::Completed)
    }

    pub fn cached(&self) -> Vec<NodeId> {
        self.in_state(NodeState::Cached)
    }

    pub fn outcome(&self) -> RunOutcome {
        let name = |id: NodeId| self.graph.node(id).name().to_string();

        let failed: Vec<FailedNode> = self
            .in_state(NodeState::Failed)
            .into_iter()
            .filter_map(|id| {
                self.error(id).map(|error| FailedNode {
                    node: id,
                    name: name(id),
                    error: error.clone(),
                })
            })
            .collect();
        let blocked: Vec<BlockedNode> = self
            .in_state(NodeState::Blocked)
            .into_iter()
            .filter_map(|id| {
                self.nodes[id.index()].blocked_by.map(|by| BlockedNode {
                    node: id,
                    name: name(id),
                    blocked_by: by,
                    blocked_by_name: name(by),
                })
            })
            .collect();
        let cancelled = self.in_state(NodeState::Cancelled);

        if failed.is_empty() && blocked.is_empty() && cancelled.is_empty() {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure {
                failed,
                blocked,
                cancelled,
            }
        }
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: NodeState) {
        self.nodes[id.index()].state = state;
    }

    pub(crate) fn mark_running(&mut self, id: NodeId, fingerprint: Fingerprint) {
        let record = &mut self.nodes[id.index()];
        record.state = NodeState::Running;
        record.fingerprint = Some(fingerprint);
    }

    pub(crate) fn mark_cached(
        &mut self,
        id: NodeId,
        fingerprint: Fingerprint,
        outputs: BTreeMap<String, Value>,
        artifacts: Vec<PathBuf>,
    ) {
        let record = &mut self.nodes[id.index()];
        record.state = NodeState::Cached;
        record.fingerprint = Some(fingerprint);
        record.outputs = outputs;
        record.artifacts = artifacts;
    }

    pub(crate) fn mark_completed(
        &mut self,
        id: NodeId,
        outputs: BTreeMap<String, Value>,
        artifacts: Vec<PathBuf>,
        duration: Duration,
    ) {
        let record = &mut self.nodes[id.index()];
        record.state = NodeState::Completed;
        record.outputs = outputs;
        record.artifacts = artifacts;
        record.duration = Some(duration);
    }

    pub(crate) fn mark_failed(&mut self, id: NodeId, error: ActionError, duration: Option<Duration>) {
        let record = &mut self.nodes[id.index()];
        record.state = NodeState::Failed;
        record.error = Some(error);
        record.duration = duration;
    }

    pub(crate) fn mark_blocked(&mut self, id: NodeId, by: NodeId) {
        let record = &mut self.nodes[id.index()];
        record.state = NodeState::Blocked;
        record.blocked_by = Some(by);
    }

    pub(crate) fn finish(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn summary(&self) -> RunSummary {
        let name = |id: NodeId| self.graph.node(id).name().to_string();
        let nodes = self
            .graph
            .topological_order()
            .iter()
            .map(|id| {
                let node = self.graph.node(*id);
                let record = &self.nodes[id.index()];
                NodeSummary {
                    name: node.name().to_string(),
                    action: node.identity().to_string(),
                    iteration: node.iteration().map(|key| key.label()),
                    state: record.state,
                    fingerprint: record.fingerprint.as_ref().map(|fp| fp.to_string()),
                    duration_ms: record.duration.map(|d| d.as_millis() as u64),
                    error: record.error.as_ref().map(|e| e.to_string()),
                    blocked_by: record.blocked_by.map(name),
                    outputs: record.outputs.clone(),
                    artifacts: record.artifacts.clone(),
                }
            })
            .collect();

        RunSummary {
            success: self.outcome().is_success(),
            executed: self.executed().len(),
            cached: self.cached().len(),
            failed: self.in_state(NodeState::Failed).len(),
            blocked: self.in_state(NodeState::Blocked).len(),
            cancelled: self.in_state(NodeState::Cancelled).len(),
            duration_ms: self.duration.as_millis() as u64,
            nodes,
        }
    }

    /// Writes the run summary as pretty JSON, atomically.
    pub fn write_manifest(&self, path: &Path) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, &self.summary())?;
        temp.flush()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Graphviz rendering with nodes filled by state.
    pub fn to_dot(&self) -> String {
        self.graph.render_dot(|id| self.state(id).dot_colour())
    }
}

/// Serializable digest of a run, written as the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub executed: usize,
    pub cached: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub action: String,
    pub iteration: Option<String>,
    pub state: NodeState,
    pub fingerprint: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub blocked_by: Option<String>,
    pub outputs: BTreeMap<String, Value>,
    pub artifacts: Vec<PathBuf>,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} executed, {} cached, {} failed, {} blocked, {} cancelled ({} ms)",
            if self.success { "success" } else { "partial failure" },
            self.executed,
            self.cached,
            self.failed,
            self.blocked,
            self.cancelled,
            self.duration_ms
        )?;
        for node in &self.nodes {
            write!(f, "  {:<10} {}", node.state.to_string(), node.name)?;
            if let Some(error) = &node.error {
                write!(f, ": {}", error)?;
            }
            if let Some(by) = &node.blocked_by {
                write!(f, " (blocked by {})", by)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
