// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Topological scheduler with dependency counting, cache consultation and a bounded worker pool.
//!
//! # Architecture Overview
//!
//! One coordinator loop owns all run state. Nothing it delegates touches that
//! state: fingerprinting and cache lookups run on the blocking pool, actions
//! run in their own tasks, and both report back over one `mpsc` channel.
//! Commits run on the blocking pool too and are awaited before the run returns.
//!
//! ```text
//!             ┌──────────── ReadyQueue (lowest rank first) ◀──────────┐
//!             ▼                                                       │
//!   resolve inputs ─▶ probe: fingerprint + CacheStore::lookup ─▶ mpsc │
//!                                   │ hit                             │
//!                                   ├──▶ Cached ──▶ release ──────────┤
//!                                   │ miss                            │
//!                                   ▼                                 │
//!   worker task ─▶ mpsc ─▶ Completed ─▶ commit (blocking) + release ──┘
//!                     └▶ Failed ─▶ block descendants
//! ```
//!
//! Probes and workers together never exceed `workers` in flight.
//!
//! # Key Properties
//!
//! - **Dependency Counting**: a node becomes Ready when its last producer settles
//! - **Bounded Concurrency**: at most `workers` actions run at once
//! - **Failure Isolation**: a failure blocks its descendants only; independent branches continue
//! - **Panic Capture**: a panicking action fails its node, never the run
//! - **Cooperative Cancellation**: nothing new starts, running nodes finish and commit
//!
//! # Determinism
//!
//! Whether a node is executed or served from cache depends only on the cache
//! contents at the start of the run, never on timing. The first lookup of a
//! fingerprint in a run is taken as that fingerprint's answer for the rest of
//! the run. It always precedes any commit of the same fingerprint, since a
//! commit needs a dispatch and a dispatch needs a decided lookup. So:
//!
//! - nodes sharing a fingerprint with no prior entry all execute;
//! - with a prior entry, every non-forced one is served from cache, whether or
//!   not a forced node with that fingerprint ran first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::cache::{fingerprint, CacheEntry, Fingerprint};
use crate::errors::{ActionError, CacheError};
use crate::graph::{Binding, Graph, Node, NodeId, Value};
use crate::observability::messages::cache::{
    CacheBypassed, CacheCommitFailed, CacheHit, CacheLookupFailed, CacheMiss,
};
use crate::observability::messages::engine::{
    DescendantsBlocked, NodeCompleted, NodeDispatched, NodeFailed, RunCancelled, RunPartiallyFailed,
    RunStarted, RunSucceeded,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{ActionContext, ActionOutput, CacheStore, Inputs};

use super::ready_queue::{ReadyQueue, ReadyTask};
use super::run_record::{NodeState, RunOutcome, RunRecord};

pub struct Scheduler {
    workers: usize,
    cache: Arc<dyn CacheStore>,
    force_rerun: HashSet<String>,
}

enum Report {
    Probed(Probe),
    Finished(WorkerReport),
}

/// Fingerprint and cache state of one ready node.
struct Probe {
    node: NodeId,
    inputs: Inputs,
    fingerprint: Fingerprint,
    lookup: Result<Option<CacheEntry>, CacheError>,
    work_dir: Result<Option<PathBuf>, CacheError>,
}

struct WorkerReport {
    node: NodeId,
    result: Result<ActionOutput, ActionError>,
    duration: Duration,
}

/// What the coordinator decided for a probed node.
enum Decision {
    Cached(CacheEntry),
    Dispatch {
        node: Node,
        inputs: Inputs,
        ctx: ActionContext,
    },
}

/// Per-fingerprint answer of the first lookup made in the current run.
type LookupSnapshot = HashMap<Fingerprint, Option<CacheEntry>>;

impl Scheduler {
    /// A scheduler running at most `workers` actions at once (at least one).
    pub fn new(workers: usize, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            workers: workers.max(1),
            cache,
            force_rerun: HashSet::new(),
        }
    }

    /// Nodes, or expansion templates, whose cache lookups are bypassed.
    ///
    /// Fresh results are still committed.
    pub fn with_force_rerun<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_rerun.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub async fn run(&self, graph: impl Into<Arc<Graph>>) -> RunRecord {
        self.run_with_cancel(graph, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, graph: impl Into<Arc<Graph>>, cancel: CancellationToken) -> RunRecord {
        let graph: Arc<Graph> = graph.into();
        let started = RunStarted {
            node_count: graph.len(),
            workers: self.workers,
        };
        let span = started.span("pipeline_run");
        span.in_scope(|| started.log());

        self.drive(graph, cancel).instrument(span).await
    }

    async fn drive(&self, graph: Arc<Graph>, cancel: CancellationToken) -> RunRecord {
        let started = Instant::now();
        let mut record = RunRecord::new(Arc::clone(&graph));

        // === DEPENDENCY COUNTS AND INITIAL READY SET ===
        let mut remaining: Vec<usize> = (0..graph.len())
            .map(|i| graph.producers(NodeId(i)).len())
            .collect();
        let mut queue = ReadyQueue::new();
        for id in graph.topological_order() {
            if remaining[id.index()] == 0 {
                record.set_state(*id, NodeState::Ready);
                queue.push(ReadyTask::new(*id, graph.rank(*id)));
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        let mut in_flight = 0usize;
        let mut snapshot = LookupSnapshot::new();
        let mut commits = JoinSet::new();
        let mut cancelled = false;

        // === MAIN COORDINATOR LOOP ===
        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                self.log_cancelled(&record, in_flight);
            }

            while !cancelled && in_flight < self.workers {
                let Some(id) = queue.pop_next() else {
                    break;
                };
                let node = graph.node(id);
                match resolve_inputs(node, &record) {
                    Ok(inputs) => {
                        in_flight += 1;
                        spawn_probe(id, node.clone(), inputs, Arc::clone(&self.cache), tx.clone());
                    }
                    Err(error) => self.fail(&graph, &mut record, id, error, None),
                }
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.log_cancelled(&record, in_flight);
                }
                Some(report) = rx.recv() => {
                    in_flight -= 1;
                    match report {
                        // Left Ready; the sweep below cancels it
                        Report::Probed(_) if cancelled => {}
                        Report::Probed(probe) => {
                            let id = probe.node;
                            match self.decide(&graph, &mut record, probe, &mut snapshot) {
                                Decision::Cached(entry) => {
                                    record.mark_cached(id, entry.fingerprint, entry.outputs, entry.artifacts);
                                    release(&graph, &mut record, &mut remaining, &mut queue, id);
                                }
                                Decision::Dispatch { node, inputs, ctx } => {
                                    in_flight += 1;
                                    let dispatched = NodeDispatched {
                                        node: node.name(),
                                        fingerprint: ctx.fingerprint.short(),
                                        in_flight,
                                    };
                                    let span = dispatched.span("node_execution");
                                    span.in_scope(|| dispatched.log());
                                    spawn_worker(id, node, inputs, ctx, span, tx.clone());
                                }
                            }
                        }
                        Report::Finished(report) => {
                            self.settle(&graph, &mut record, &mut remaining, &mut queue, &mut commits, report);
                        }
                    }
                }
                else => break,
            }
        }

        // === CANCELLATION SWEEP ===
        if cancelled {
            for id in graph.topological_order() {
                if matches!(record.state(*id), NodeState::Pending | NodeState::Ready) {
                    record.set_state(*id, NodeState::Cancelled);
                }
            }
        }

        while commits.join_next().await.is_some() {}

        record.finish(started.elapsed());
        match record.outcome() {
            RunOutcome::Success => RunSucceeded {
                executed: record.executed().len(),
                cached: record.cached().len(),
                duration: record.duration(),
            }
            .log(),
            RunOutcome::PartialFailure {
                failed,
                blocked,
                cancelled,
            } => RunPartiallyFailed {
                failed: failed.len(),
                blocked: blocked.len(),
                cancelled: cancelled.len(),
                duration: record.duration(),
            }
            .log(),
        }
        record
    }

    /// Classifies a probed node as a cache hit or a dispatch.
    ///
    /// The first probe of a fingerprint fixes the lookup answer in `snapshot`;
    /// later probes of the same fingerprint reuse it and ignore their own lookup.
    fn decide(&self, graph: &Graph, record: &mut RunRecord, probe: Probe, snapshot: &mut LookupSnapshot) -> Decision {
        let Probe {
            node: id,
            inputs,
            fingerprint: fp,
            lookup,
            work_dir,
        } = probe;
        let node = graph.node(id);

        let prior = snapshot.entry(fp.clone()).or_insert_with(|| match lookup {
            Ok(found) => found,
            Err(error) => {
                CacheLookupFailed {
                    node: node.name(),
                    error: &error,
                }
                .log();
                None
            }
        });

        if self.is_forced(node) {
            CacheBypassed { node: node.name() }.log();
        } else if let Some(entry) = prior {
            CacheHit {
                node: node.name(),
                fingerprint: fp.short(),
            }
            .log();
            return Decision::Cached(entry.clone());
        } else {
            CacheMiss {
                node: node.name(),
                fingerprint: fp.short(),
            }
            .log();
        }

        let work_dir = match work_dir {
            Ok(dir) => dir,
            Err(error) => {
                CacheLookupFailed {
                    node: node.name(),
                    error: &error,
                }
                .log();
                None
            }
        };

        record.mark_running(id, fp.clone());
        let ctx = ActionContext {
            node: node.name().to_string(),
            iteration: node.iteration().cloned(),
            config: node.config().clone(),
            work_dir,
            fingerprint: fp,
        };
        Decision::Dispatch {
            node: node.clone(),
            inputs,
            ctx,
        }
    }

    /// Applies a worker report.
    fn settle(
        &self,
        graph: &Graph,
        record: &mut RunRecord,
        remaining: &mut [usize],
        queue: &mut ReadyQueue,
        commits: &mut JoinSet<()>,
        report: WorkerReport,
    ) {
        let id = report.node;
        let node = graph.node(id);

        match report.result {
            Ok(output) => {
                NodeCompleted {
                    node: node.name(),
                    duration: report.duration,
                }
                .log();

                if let Some(fp) = record.fingerprint(id).cloned() {
                    let entry = CacheEntry::new(
                        fp,
                        node.name(),
                        node.identity(),
                        output.outputs.clone(),
                        output.artifacts.clone(),
                    );
                    spawn_commit(commits, Arc::clone(&self.cache), entry);
                }

                record.mark_completed(id, output.outputs, output.artifacts, report.duration);
                release(graph, record, remaining, queue, id);
            }
            Err(error) => self.fail(graph, record, id, error, Some(report.duration)),
        }
    }

    fn fail(&self, graph: &Graph, record: &mut RunRecord, id: NodeId, error: ActionError, duration: Option<Duration>) {
        let name = graph.node(id).name();
        NodeFailed { node: name, error: &error }.log();
        record.mark_failed(id, error, duration);

        let mut blocked = 0;
        for descendant in graph.descendants(id) {
            if record.state(descendant) == NodeState::Pending {
                record.mark_blocked(descendant, id);
                blocked += 1;
            }
        }
        if blocked > 0 {
            DescendantsBlocked { failed: name, blocked }.log();
        }
    }

    fn is_forced(&self, node: &Node) -> bool {
        self.force_rerun.contains(node.name())
            || node
                .template()
                .map(|template| self.force_rerun.contains(template))
                .unwrap_or(false)
    }

    fn log_cancelled(&self, record: &RunRecord, in_flight: usize) {
        let not_started = record
            .graph()
            .topological_order()
            .iter()
            .filter(|id| matches!(record.state(**id), NodeState::Pending | NodeState::Ready))
            .count();
        RunCancelled {
            in_flight,
            not_started,
        }
        .log();
    }
}

/// Decrements dependency counts of `id`'s consumers and queues those that became ready.
fn release(graph: &Graph, record: &mut RunRecord, remaining: &mut [usize], queue: &mut ReadyQueue, id: NodeId) {
    for consumer in graph.consumers(id) {
        let count = &mut remaining[consumer.index()];
        *count = count.saturating_sub(1);
        if *count == 0 && record.state(*consumer) == NodeState::Pending {
            record.set_state(*consumer, NodeState::Ready);
            queue.push(ReadyTask::new(*consumer, graph.rank(*consumer)));
        }
    }
}

/// Fingerprints a ready node and consults the cache on the blocking pool.
///
/// Hashing file inputs and filesystem lookups can take a while; the
/// coordinator keeps settling other nodes in the meantime.
fn spawn_probe(
    id: NodeId,
    node: Node,
    inputs: Inputs,
    cache: Arc<dyn CacheStore>,
    tx: mpsc::UnboundedSender<Report>,
) {
    tokio::spawn(async move {
        let handle = tokio::task::spawn_blocking(move || {
            let fp = fingerprint(&node, &inputs);
            let lookup = cache.lookup(&fp);
            let work_dir = cache.work_dir(&fp);
            Probe {
                node: id,
                inputs,
                fingerprint: fp,
                lookup,
                work_dir,
            }
        });
        let report = match handle.await {
            Ok(probe) => Report::Probed(probe),
            Err(join_error) => Report::Finished(WorkerReport {
                node: id,
                result: Err(ActionError::from_join_error(join_error)),
                duration: Duration::ZERO,
            }),
        };
        let _ = tx.send(report);
    });
}

/// Runs one action in its own task so a panic is contained and reported.
fn spawn_worker(
    id: NodeId,
    node: Node,
    inputs: Inputs,
    ctx: ActionContext,
    span: Span,
    tx: mpsc::UnboundedSender<Report>,
) {
    tokio::spawn(
        async move {
            let started = Instant::now();
            let handle = tokio::spawn(async move { node.execute(inputs, ctx).await }.in_current_span());
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(ActionError::from_join_error(join_error)),
            };
            let _ = tx.send(Report::Finished(WorkerReport {
                node: id,
                result,
                duration: started.elapsed(),
            }));
        }
        .instrument(span),
    );
}

/// Writes a cache entry on the blocking pool. Failures are logged, never raised.
fn spawn_commit(commits: &mut JoinSet<()>, cache: Arc<dyn CacheStore>, entry: CacheEntry) {
    let node = entry.node.clone();
    let handle = tokio::task::spawn_blocking(move || cache.commit(entry));
    commits.spawn(async move {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(CacheError::Interrupted(join_error.to_string())),
        };
        if let Err(error) = result {
            CacheCommitFailed { node: &node, error: &error }.log();
        }
    });
}

/// Values for every bound or defaulted input slot. Unbound optional slots are omitted.
fn resolve_inputs(node: &Node, record: &RunRecord) -> Result<Inputs, ActionError> {
    let mut values = BTreeMap::new();

    for (slot, declared) in node.inputs() {
        let value = match node.bindings().get(slot) {
            Some(Binding::Literal(value)) => value.clone(),
            Some(Binding::Upstream { node: producer, slot: output }) => upstream(record, *producer, output)?,
            Some(Binding::Gather { sources }) => Value::List(
                sources
                    .iter()
                    .map(|(producer, output)| upstream(record, *producer, output))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => match &declared.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };
        values.insert(slot.clone(), value);
    }

    Ok(Inputs::new(values))
}

fn upstream(record: &RunRecord, producer: NodeId, output: &str) -> Result<Value, ActionError> {
    record
        .output(producer, output)
        .cloned()
        .ok_or_else(|| ActionError::MissingInput {
            slot: format!("{}.{}", record.graph().node(producer).name(), output),
        })
}
