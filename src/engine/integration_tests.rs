// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::{self, Layer, SubscriberExt};

use crate::actions::FnAction;
use crate::aggregate::{gather_template, AggregationPolicy, BranchError};
use crate::cache::{CacheEntry, Fingerprint, FsCache, MemoryCache};
use crate::engine::{NodeState, RunOutcome, RunRecord, RunSummary, Scheduler};
use crate::errors::{ActionError, CacheError};
use crate::graph::{Graph, GraphBuilder, InputSlot, IterationSpace, Node, SlotType, Value};
use crate::traits::{Action, ActionContext, ActionIdentity, ActionOutput, CacheStore, Inputs};

/// Scheduler scenarios over real graphs, caches and actions
#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Arc<Mutex<Vec<String>>>;

    /// An action that records the concrete node name of every invocation.
    fn recording<F>(calls: &Calls, name: &str, body: F) -> Arc<dyn Action>
    where
        F: Fn(Inputs) -> Result<ActionOutput, ActionError> + Send + Sync + 'static,
    {
        let calls = Arc::clone(calls);
        Arc::new(FnAction::with_context(name, "1", move |inputs, ctx| {
            calls.lock().unwrap().push(ctx.node.clone());
            body(inputs)
        }))
    }

    fn invocations(calls: &Calls) -> Vec<String> {
        let mut seen = calls.lock().unwrap().clone();
        seen.sort();
        seen
    }

    /// A→B→D, A→C→D. A adds one, B doubles, C scales by `gain`, D sums.
    fn diamond(x: i64, gain: i64, calls: &Calls) -> Graph {
        let mut builder = GraphBuilder::new();

        let a = builder
            .add_node(
                Node::new("A", recording(calls, "add_one", |i| Ok(ActionOutput::new().with("y", i.int("x")? + 1))))
                    .input("x", InputSlot::required(SlotType::Int))
                    .output("y", SlotType::Int)
                    .with_literal("x", x),
            )
            .unwrap();
        let b = builder
            .add_node(
                Node::new("B", recording(calls, "double", |i| Ok(ActionOutput::new().with("y", i.int("x")? * 2))))
                    .input("x", InputSlot::required(SlotType::Int))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        let c = builder
            .add_node(
                Node::new(
                    "C",
                    recording(calls, "scale", |i| Ok(ActionOutput::new().with("y", i.int("x")? * i.int("gain")?))),
                )
                .input("x", InputSlot::required(SlotType::Int))
                .input("gain", InputSlot::required(SlotType::Int))
                .output("y", SlotType::Int)
                .with_literal("gain", gain),
            )
            .unwrap();
        let d = builder
            .add_node(
                Node::new(
                    "D",
                    recording(calls, "sum", |i| Ok(ActionOutput::new().with("y", i.int("left")? + i.int("right")?))),
                )
                .input("left", InputSlot::required(SlotType::Int))
                .input("right", InputSlot::required(SlotType::Int))
                .output("y", SlotType::Int),
            )
            .unwrap();

        builder.connect(a, "y", b, "x").unwrap();
        builder.connect(a, "y", c, "x").unwrap();
        builder.connect(b, "y", d, "left").unwrap();
        builder.connect(c, "y", d, "right").unwrap();
        builder.finalize().unwrap()
    }

    fn states(record: &RunRecord, names: &[&str]) -> Vec<NodeState> {
        names
            .iter()
            .map(|name| record.state_of(name).unwrap_or_else(|| panic!("no node named {}", name)))
            .collect()
    }

    fn output(record: &RunRecord, name: &str, slot: &str) -> Option<Value> {
        let id = record.graph().find(name)?;
        record.output(id, slot).cloned()
    }

    const ABCD: [&str; 4] = ["A", "B", "C", "D"];

    #[tokio::test]
    async fn test_diamond_runs_reuse_unchanged_work() {
        let calls: Calls = Arc::default();
        let cache = Arc::new(MemoryCache::new());
        let scheduler = Scheduler::new(2, cache.clone());

        // Run 1: everything executes
        let run1 = scheduler.run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run1, &ABCD), vec![NodeState::Completed; 4]);
        assert_eq!(output(&run1, "D", "y"), Some(Value::Int(10)));
        assert!(run1.outcome().is_success());

        // Run 2: nothing changed
        let run2 = scheduler.run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run2, &ABCD), vec![NodeState::Cached; 4]);
        assert!(run2.in_state(NodeState::Running).is_empty());
        assert_eq!(output(&run2, "D", "y"), Some(Value::Int(10)));
        assert_eq!(calls.lock().unwrap().len(), 4);

        // Run 3: A's input changed, every node descends from A
        let run3 = scheduler.run(diamond(2, 3, &calls)).await;
        assert_eq!(states(&run3, &ABCD), vec![NodeState::Completed; 4]);
        assert_eq!(output(&run3, "D", "y"), Some(Value::Int(15)));

        // Run 4: only C's input changed
        let run4 = scheduler.run(diamond(2, 5, &calls)).await;
        assert_eq!(
            states(&run4, &ABCD),
            vec![NodeState::Cached, NodeState::Cached, NodeState::Completed, NodeState::Completed]
        );
        assert_eq!(output(&run4, "D", "y"), Some(Value::Int(21)));
    }

    #[tokio::test]
    async fn test_filesystem_cache_survives_across_store_instances() {
        let dir = TempDir::new().unwrap();
        let calls: Calls = Arc::default();

        let first = Scheduler::new(4, Arc::new(FsCache::new(dir.path()).unwrap()));
        let run1 = first.run(diamond(1, 3, &calls)).await;
        assert_eq!(run1.executed().len(), 4);

        let second = Scheduler::new(4, Arc::new(FsCache::new(dir.path()).unwrap()));
        let run2 = second.run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run2, &ABCD), vec![NodeState::Cached; 4]);
        assert_eq!(output(&run2, "D", "y"), Some(Value::Int(10)));
        assert_eq!(calls.lock().unwrap().len(), 4);

        for id in run1.graph().topological_order() {
            assert_eq!(run1.fingerprint(*id), run2.fingerprint(*id));
        }
    }

    /// load → psd per subject, all psd gathered into one group node. Loading s2 fails.
    fn subjects_with_failing_load(calls: &Calls) -> Graph {
        let mut builder = GraphBuilder::new();
        let space = IterationSpace::new().field("subject_id", ["s1", "s2", "s3"]);

        let load = Node::new(
            "load",
            recording(calls, "load", |i| {
                if i.text("subject_id")? == "s2" {
                    return Err(ActionError::failed("corrupt recording"));
                }
                Ok(ActionOutput::new().with("data", vec![1.0, 2.0]))
            }),
        )
        .input("subject_id", InputSlot::required(SlotType::Text))
        .output("data", SlotType::list_of(SlotType::Float));
        let loads = builder.expand(load, &space).unwrap();

        let psd = Node::new(
            "psd",
            recording(calls, "psd", |i| {
                let total: f64 = i.list("data")?.iter().filter_map(Value::as_float).sum();
                Ok(ActionOutput::new().with("power", total))
            }),
        )
        .input("data", InputSlot::required(SlotType::list_of(SlotType::Float)))
        .output("power", SlotType::Float);
        let psds = builder.expand_like(psd, &loads).unwrap();
        builder.connect_zip(&loads, "data", &psds, "data").unwrap();

        let group = builder
            .add_node(
                Node::new(
                    "group",
                    recording(calls, "mean", |i| {
                        let powers = i.list("powers")?;
                        let total: f64 = powers.iter().filter_map(Value::as_float).sum();
                        Ok(ActionOutput::new().with("mean", total / powers.len() as f64))
                    }),
                )
                .input("powers", InputSlot::required(SlotType::list_of(SlotType::Float)))
                .output("mean", SlotType::Float),
            )
            .unwrap();
        builder.connect_gather(&psds, "power", group, "powers").unwrap();
        builder.finalize().unwrap()
    }

    #[tokio::test]
    async fn test_failed_member_blocks_only_its_descendants() {
        let calls: Calls = Arc::default();
        let scheduler = Scheduler::new(2, Arc::new(MemoryCache::new()));
        let record = scheduler.run(subjects_with_failing_load(&calls)).await;

        assert_eq!(
            states(
                &record,
                &[
                    "load[subject_id=s1]",
                    "load[subject_id=s2]",
                    "load[subject_id=s3]",
                    "psd[subject_id=s1]",
                    "psd[subject_id=s2]",
                    "psd[subject_id=s3]",
                    "group",
                ]
            ),
            vec![
                NodeState::Completed,
                NodeState::Failed,
                NodeState::Completed,
                NodeState::Completed,
                NodeState::Blocked,
                NodeState::Completed,
                NodeState::Blocked,
            ]
        );
        assert!(!invocations(&calls).contains(&"psd[subject_id=s2]".to_string()));

        match record.outcome() {
            RunOutcome::PartialFailure {
                failed,
                blocked,
                cancelled,
            } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].name, "load[subject_id=s2]");
                assert_eq!(failed[0].error, ActionError::failed("corrupt recording"));
                assert_eq!(blocked.len(), 2);
                assert!(blocked.iter().all(|b| b.blocked_by_name == "load[subject_id=s2]"));
                assert!(cancelled.is_empty());
            }
            RunOutcome::Success => panic!("expected a partial failure"),
        }

        let labeled = gather_template(&record, "psd", "power", &AggregationPolicy::Labeled).unwrap();
        let labeled = labeled.as_labeled().unwrap();
        assert_eq!(
            labeled.values(),
            vec![
                ("subject_id=s1", &Value::Float(3.0)),
                ("subject_id=s3", &Value::Float(3.0))
            ]
        );
        assert_eq!(
            labeled.get("subject_id=s2"),
            Some(&Err(BranchError::Blocked {
                by: "load[subject_id=s2]".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_force_rerun_bypasses_lookup_but_keeps_downstream_cached() {
        let calls: Calls = Arc::default();
        let cache = Arc::new(MemoryCache::new());

        Scheduler::new(2, cache.clone()).run(diamond(1, 3, &calls)).await;
        let record = Scheduler::new(2, cache.clone())
            .with_force_rerun(["B"])
            .run(diamond(1, 3, &calls))
            .await;

        assert_eq!(
            states(&record, &ABCD),
            vec![NodeState::Cached, NodeState::Completed, NodeState::Cached, NodeState::Cached]
        );
    }

    #[tokio::test]
    async fn test_force_rerun_by_template_name_covers_every_member() {
        let calls: Calls = Arc::default();
        let cache = Arc::new(MemoryCache::new());

        Scheduler::new(2, cache.clone()).run(subjects_with_failing_load(&calls)).await;
        let record = Scheduler::new(2, cache.clone())
            .with_force_rerun(["psd"])
            .run(subjects_with_failing_load(&calls))
            .await;

        assert_eq!(record.state_of("load[subject_id=s1]"), Some(NodeState::Cached));
        assert_eq!(record.state_of("psd[subject_id=s1]"), Some(NodeState::Completed));
        assert_eq!(record.state_of("psd[subject_id=s3]"), Some(NodeState::Completed));
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch_and_lets_running_nodes_finish() {
        let token = CancellationToken::new();
        let mut builder = GraphBuilder::new();

        let trigger = token.clone();
        let a = builder
            .add_node(
                Node::new(
                    "A",
                    Arc::new(FnAction::new("cancel_then_finish", "1", move |_| {
                        trigger.cancel();
                        Ok(ActionOutput::new().with("y", 1i64))
                    })),
                )
                .output("y", SlotType::Int),
            )
            .unwrap();
        let calls: Calls = Arc::default();
        let mut downstream = Vec::new();
        for name in ["B", "C"] {
            let id = builder
                .add_node(
                    Node::new(name, recording(&calls, "noop", |i| Ok(ActionOutput::new().with("y", i.int("x")?))))
                        .input("x", InputSlot::required(SlotType::Int))
                        .output("y", SlotType::Int),
                )
                .unwrap();
            builder.connect(a, "y", id, "x").unwrap();
            downstream.push(id);
        }
        let d = builder
            .add_node(
                Node::new("D", recording(&calls, "noop2", |_| Ok(ActionOutput::new().with("y", 0i64))))
                    .input("left", InputSlot::required(SlotType::Int))
                    .input("right", InputSlot::required(SlotType::Int))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        builder.connect(downstream[0], "y", d, "left").unwrap();
        builder.connect(downstream[1], "y", d, "right").unwrap();
        let graph = builder.finalize().unwrap();

        let cache = Arc::new(MemoryCache::new());
        let record = Scheduler::new(1, cache.clone()).run_with_cancel(graph, token).await;

        assert_eq!(
            states(&record, &ABCD),
            vec![
                NodeState::Completed,
                NodeState::Cancelled,
                NodeState::Cancelled,
                NodeState::Cancelled
            ]
        );
        assert!(calls.lock().unwrap().is_empty());
        // A finished after cancellation and still committed its result
        assert_eq!(cache.len(), 1);
        assert_eq!(record.summary().cancelled, 3);
        assert!(!record.outcome().is_success());
    }

    /// Sleeps while tracking how many invocations overlap.
    struct Tracked {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for Tracked {
        fn identity(&self) -> ActionIdentity {
            ActionIdentity::new("tracked", "1")
        }

        async fn run(&self, inputs: Inputs, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ActionOutput::new().with("i", inputs.int("i")?))
        }
    }

    #[tokio::test]
    async fn test_worker_bound_limits_concurrent_actions() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let action: Arc<dyn Action> = Arc::new(Tracked {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
        });

        let mut builder = GraphBuilder::new();
        for i in 0..6i64 {
            builder
                .add_node(
                    Node::new(format!("epoch{}", i), Arc::clone(&action))
                        .input("i", InputSlot::required(SlotType::Int))
                        .output("i", SlotType::Int)
                        .with_literal("i", i),
                )
                .unwrap();
        }

        let record = Scheduler::new(2, Arc::new(MemoryCache::new()))
            .run(builder.finalize().unwrap())
            .await;

        assert_eq!(record.executed().len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }

    struct Saturates;

    #[async_trait]
    impl Action for Saturates {
        fn identity(&self) -> ActionIdentity {
            ActionIdentity::new("saturates", "1")
        }

        async fn run(&self, _inputs: Inputs, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
            panic!("amplifier saturated");
        }
    }

    #[tokio::test]
    async fn test_panicking_action_fails_its_node_not_the_run() {
        let calls: Calls = Arc::default();
        let mut builder = GraphBuilder::new();
        let bad = builder
            .add_node(Node::new("amp", Arc::new(Saturates)).output("y", SlotType::Int))
            .unwrap();
        let after = builder
            .add_node(
                Node::new("filter", recording(&calls, "filter", |_| Ok(ActionOutput::new().with("y", 0i64))))
                    .input("x", InputSlot::required(SlotType::Int))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        builder
            .add_node(
                Node::new("independent", recording(&calls, "other", |_| Ok(ActionOutput::new().with("y", 1i64))))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        builder.connect(bad, "y", after, "x").unwrap();

        let record = Scheduler::new(2, Arc::new(MemoryCache::new()))
            .run(builder.finalize().unwrap())
            .await;

        assert_eq!(
            record.error(bad),
            Some(&ActionError::Panicked {
                message: "amplifier saturated".to_string()
            })
        );
        assert_eq!(record.state(after), NodeState::Blocked);
        assert_eq!(record.state_of("independent"), Some(NodeState::Completed));
        assert_eq!(invocations(&calls), vec!["independent".to_string()]);
    }

    #[tokio::test]
    async fn test_undeclared_output_fails_node_and_blocks_descendants() {
        let calls: Calls = Arc::default();
        let mut builder = GraphBuilder::new();
        let bad = builder
            .add_node(
                Node::new("load", recording(&calls, "load", |_| Ok(ActionOutput::new().with("z", 1i64))))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        let after = builder
            .add_node(
                Node::new("psd", recording(&calls, "psd", |_| Ok(ActionOutput::new().with("y", 0i64))))
                    .input("x", InputSlot::required(SlotType::Int))
                    .output("y", SlotType::Int),
            )
            .unwrap();
        builder.connect(bad, "y", after, "x").unwrap();

        let cache = Arc::new(MemoryCache::new());
        let record = Scheduler::new(1, cache.clone()).run(builder.finalize().unwrap()).await;

        assert!(matches!(record.error(bad), Some(ActionError::UndeclaredOutput { slot }) if slot == "z"));
        assert_eq!(record.state(after), NodeState::Blocked);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_treated_as_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FsCache::new(dir.path()).unwrap());
        let calls: Calls = Arc::default();

        let run1 = Scheduler::new(2, cache.clone()).run(diamond(1, 3, &calls)).await;
        let a = run1.graph().find("A").unwrap();
        let fp = run1.fingerprint(a).cloned().unwrap();
        std::fs::write(cache.entry_dir(&fp).join("entry.json"), b"{ not json").unwrap();

        let run2 = Scheduler::new(2, cache.clone()).run(diamond(1, 3, &calls)).await;
        assert_eq!(
            states(&run2, &ABCD),
            vec![NodeState::Completed, NodeState::Cached, NodeState::Cached, NodeState::Cached]
        );

        // The re-execution repaired the entry
        let run3 = Scheduler::new(2, cache).run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run3, &ABCD), vec![NodeState::Cached; 4]);
    }

    fn report_writer(calls: &Calls) -> Graph {
        let calls = Arc::clone(calls);
        let action = FnAction::with_context("report", "1", move |inputs, ctx| {
            calls.lock().unwrap().push(ctx.node.clone());
            let dir = ctx
                .work_dir
                .ok_or_else(|| ActionError::failed("no working directory"))?;
            let path = dir.join("report.html");
            std::fs::write(&path, format!("<p>{}</p>", inputs.text("subject_id")?))?;
            Ok(ActionOutput::new().with("report", path.clone()).artifact(path))
        });

        let mut builder = GraphBuilder::new();
        builder
            .add_node(
                Node::new("report", Arc::new(action))
                    .input("subject_id", InputSlot::required(SlotType::Text))
                    .output("report", SlotType::Path)
                    .with_literal("subject_id", "sub-01"),
            )
            .unwrap();
        builder.finalize().unwrap()
    }

    #[tokio::test]
    async fn test_missing_artifact_forces_re_execution() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FsCache::new(dir.path()).unwrap());
        let calls: Calls = Arc::default();
        let scheduler = Scheduler::new(1, cache);

        let run1 = scheduler.run(report_writer(&calls)).await;
        assert_eq!(run1.state_of("report"), Some(NodeState::Completed));
        let path = output(&run1, "report", "report").unwrap();
        let path = path.as_path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));

        let run2 = scheduler.run(report_writer(&calls)).await;
        assert_eq!(run2.state_of("report"), Some(NodeState::Cached));

        std::fs::remove_file(&path).unwrap();
        let run3 = scheduler.run(report_writer(&calls)).await;
        assert_eq!(run3.state_of("report"), Some(NodeState::Completed));
        assert!(path.exists());
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_fingerprint_twice_in_one_run_executes_both() {
        let calls: Calls = Arc::default();
        let mut builder = GraphBuilder::new();
        let mut ids = Vec::new();
        for name in ["dup_a", "dup_b"] {
            let id = builder
                .add_node(
                    Node::new(name, recording(&calls, "detrend", |i| Ok(ActionOutput::new().with("y", i.int("x")?))))
                        .input("x", InputSlot::required(SlotType::Int))
                        .output("y", SlotType::Int)
                        .with_literal("x", 7i64),
                )
                .unwrap();
            ids.push(id);
        }
        let graph = Arc::new(builder.finalize().unwrap());
        let scheduler = Scheduler::new(1, Arc::new(MemoryCache::new()));

        let run1 = scheduler.run(Arc::clone(&graph)).await;
        assert_eq!(run1.fingerprint(ids[0]), run1.fingerprint(ids[1]));
        assert_eq!(run1.executed(), ids);

        let run2 = scheduler.run(graph).await;
        assert_eq!(run2.cached(), ids);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_classification_does_not_depend_on_worker_count() {
        let calls: Calls = Arc::default();
        let serial = Scheduler::new(1, Arc::new(MemoryCache::new()))
            .run(subjects_with_failing_load(&calls))
            .await;
        let parallel = Scheduler::new(8, Arc::new(MemoryCache::new()))
            .run(subjects_with_failing_load(&calls))
            .await;

        for id in serial.graph().topological_order() {
            assert_eq!(serial.state(*id), parallel.state(*id));
            assert_eq!(serial.fingerprint(*id), parallel.fingerprint(*id));
            assert_eq!(serial.node(*id).map(|r| &r.outputs), parallel.node(*id).map(|r| &r.outputs));
        }
    }

    #[tokio::test]
    async fn test_manifest_and_dot_describe_the_run() {
        let dir = TempDir::new().unwrap();
        let calls: Calls = Arc::default();
        let record = Scheduler::new(0, Arc::new(MemoryCache::new()))
            .run(diamond(1, 3, &calls))
            .await;

        let path = dir.path().join("runs").join("manifest.json");
        record.write_manifest(&path).unwrap();
        let written: RunSummary = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, record.summary());
        assert!(written.success);
        assert_eq!(written.executed, 4);
        let names: Vec<&str> = written.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ABCD.to_vec());

        let dot = record.to_dot();
        assert!(dot.contains("n0 -> n1"));
        assert!(dot.contains("palegreen"));
        assert!(record.summary().to_string().starts_with("success: 4 executed"));
    }

    /// One node passing a float through, counting invocations.
    fn passthrough(x: f64, calls: &Calls) -> Graph {
        let mut builder = GraphBuilder::new();
        builder
            .add_node(
                Node::new("clip", recording(calls, "clip", |i| Ok(ActionOutput::new().with("y", i.float("x")?))))
                    .input("x", InputSlot::required(SlotType::Float))
                    .output("y", SlotType::Float)
                    .with_literal("x", x),
            )
            .unwrap();
        builder.finalize().unwrap()
    }

    #[tokio::test]
    async fn test_opposite_infinities_are_different_inputs() {
        let calls: Calls = Arc::default();
        let scheduler = Scheduler::new(1, Arc::new(MemoryCache::new()));

        let run1 = scheduler.run(passthrough(f64::INFINITY, &calls)).await;
        assert_eq!(run1.state_of("clip"), Some(NodeState::Completed));

        let run2 = scheduler.run(passthrough(f64::NEG_INFINITY, &calls)).await;
        assert_eq!(run2.state_of("clip"), Some(NodeState::Completed));
        assert_eq!(output(&run2, "clip", "y"), Some(Value::Float(f64::NEG_INFINITY)));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_nan_output_is_served_from_filesystem_cache() {
        let dir = TempDir::new().unwrap();
        let calls: Calls = Arc::default();
        let scheduler = Scheduler::new(1, Arc::new(FsCache::new(dir.path()).unwrap()));

        let run1 = scheduler.run(passthrough(f64::NAN, &calls)).await;
        assert_eq!(run1.state_of("clip"), Some(NodeState::Completed));

        let run2 = scheduler.run(passthrough(f64::NAN, &calls)).await;
        assert_eq!(run2.state_of("clip"), Some(NodeState::Cached));
        assert!(matches!(output(&run2, "clip", "y"), Some(Value::Float(y)) if y.is_nan()));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    /// Lookups always miss; every commit fails with an I/O error.
    struct ReadOnlyCache {
        commits: AtomicUsize,
    }

    impl CacheStore for ReadOnlyCache {
        fn lookup(&self, _fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
            Ok(None)
        }

        fn commit(&self, entry: CacheEntry) -> Result<(), CacheError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Io {
                path: PathBuf::from("/mnt/cache").join(entry.fingerprint.as_str()),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system"),
            })
        }
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_node_completed() {
        let calls: Calls = Arc::default();
        let cache = Arc::new(ReadOnlyCache {
            commits: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(2, cache.clone());

        let run1 = scheduler.run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run1, &ABCD), vec![NodeState::Completed; 4]);
        assert!(run1.outcome().is_success());
        assert_eq!(output(&run1, "D", "y"), Some(Value::Int(10)));
        assert_eq!(cache.commits.load(Ordering::SeqCst), 4);

        // nothing was stored, so everything runs again
        let run2 = scheduler.run(diamond(1, 3, &calls)).await;
        assert_eq!(states(&run2, &ABCD), vec![NodeState::Completed; 4]);
        assert_eq!(calls.lock().unwrap().len(), 8);
    }

    /// Every lookup fails with an I/O error; commits land in memory.
    #[derive(Default)]
    struct UnreachableIndex {
        stored: MemoryCache,
    }

    impl CacheStore for UnreachableIndex {
        fn lookup(&self, _fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Io {
                path: PathBuf::from("/mnt/cache/index"),
                source: io::Error::new(io::ErrorKind::NotConnected, "share unavailable"),
            })
        }

        fn commit(&self, entry: CacheEntry) -> Result<(), CacheError> {
            self.stored.commit(entry)
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_is_a_miss() {
        let calls: Calls = Arc::default();
        let cache = Arc::new(UnreachableIndex::default());
        let scheduler = Scheduler::new(2, cache.clone());

        for _ in 0..2 {
            let record = scheduler.run(diamond(1, 3, &calls)).await;
            assert_eq!(states(&record, &ABCD), vec![NodeState::Completed; 4]);
            assert!(record.outcome().is_success());
        }
        assert_eq!(cache.stored.len(), 4);
        assert_eq!(calls.lock().unwrap().len(), 8);
    }

    /// Two differently named nodes with identical action and inputs.
    fn twins(calls: &Calls) -> Graph {
        let mut builder = GraphBuilder::new();
        for name in ["dup_a", "dup_b"] {
            builder
                .add_node(
                    Node::new(name, recording(calls, "detrend", |i| Ok(ActionOutput::new().with("y", i.int("x")?))))
                        .input("x", InputSlot::required(SlotType::Int))
                        .output("y", SlotType::Int)
                        .with_literal("x", 7i64),
                )
                .unwrap();
        }
        builder.finalize().unwrap()
    }

    #[tokio::test]
    async fn test_forced_twin_does_not_change_the_other_twins_classification() {
        for workers in [1, 2] {
            for (forced, kept) in [("dup_a", "dup_b"), ("dup_b", "dup_a")] {
                let calls: Calls = Arc::default();
                let cache = Arc::new(MemoryCache::new());
                Scheduler::new(workers, cache.clone()).run(twins(&calls)).await;

                let record = Scheduler::new(workers, cache)
                    .with_force_rerun([forced])
                    .run(twins(&calls))
                    .await;
                assert_eq!(record.state_of(forced), Some(NodeState::Completed));
                assert_eq!(record.state_of(kept), Some(NodeState::Cached));
            }
        }
    }

    /// Collects the `node` field of every `node` span opened.
    #[derive(Clone, Default)]
    struct NodeSpans(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for NodeSpans {
        fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: layer::Context<'_, S>) {
            if attrs.metadata().name() != "node" {
                return;
            }
            let mut field = NodeField(None);
            attrs.record(&mut field);
            if let Some(node) = field.0 {
                self.0.lock().unwrap().push(node);
            }
        }
    }

    struct NodeField(Option<String>);

    impl Visit for NodeField {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "node" {
                self.0 = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    }

    #[tokio::test]
    async fn test_each_dispatched_node_opens_an_execution_span() {
        let spans = NodeSpans::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        let calls: Calls = Arc::default();
        let cache = Arc::new(MemoryCache::new());
        let scheduler = Scheduler::new(2, cache);
        scheduler.run(diamond(1, 3, &calls)).await;

        let mut opened = spans.0.lock().unwrap().clone();
        opened.sort();
        assert_eq!(opened, vec!["A", "B", "C", "D"]);

        // cache hits are not dispatched
        scheduler.run(diamond(1, 3, &calls)).await;
        assert_eq!(spans.0.lock().unwrap().len(), 4);
    }
}
