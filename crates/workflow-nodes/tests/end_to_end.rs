//! End-to-end runs of the built-in nodes through the engine, cache and queue

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use node_engine::{
    CacheConfig, CacheLayer, CacheStrategyKind, Engine, ErrorKind, ExecutionReport, InputPort,
    NodeCategory, NodeContext, NodeEngineError, NodeExecutor, NodeInputs, NodeOutcome,
    NodeRegistry, NodeSchema, NodeStatus, OutputPort, PortDataType, PortId, Prompt, RunStatus,
    WorkflowBuilder, WorkflowEvent, WorkflowGraph,
};
use node_engine::events::VecEventSink;
use prompt_queue::{CancelOutcome, PromptQueue, PromptWorker};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use workflow_nodes::builtin_registry;

/// Records which nodes actually ran
#[derive(Default)]
struct Invocations(Mutex<Vec<String>>);

impl Invocations {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

struct Counting {
    inner: Arc<dyn NodeExecutor>,
    calls: Arc<Invocations>,
}

#[async_trait]
impl NodeExecutor for Counting {
    fn check_lazy_status(&self, ctx: &NodeContext, inputs: &NodeInputs, pending: &[PortId]) -> Vec<PortId> {
        self.inner.check_lazy_status(ctx, inputs, pending)
    }

    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> node_engine::Result<NodeOutcome> {
        self.calls.0.lock().unwrap().push(ctx.node_id().to_string());
        self.inner.execute(ctx, inputs).await
    }
}

/// Built-ins plus test-only `explode` and `slow`, every one counted
fn counted_registry(output_dir: &std::path::Path, calls: &Arc<Invocations>) -> NodeRegistry {
    let mut base = builtin_registry(output_dir);
    base.register_fn(
        NodeSchema::new("explode", NodeCategory::Math)
            .input(InputPort::optional("value", PortDataType::Any))
            .output(OutputPort::new("value", PortDataType::Any)),
        |ctx, _inputs| Err(NodeEngineError::failed(ctx.node_id(), "exploded")),
    );
    base.register_callback(
        NodeSchema::new("slow", NodeCategory::Math)
            .input(InputPort::required("value", PortDataType::Any))
            .output(OutputPort::new("value", PortDataType::Any)),
        |_ctx, inputs| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(NodeOutcome::values(vec![inputs
                .get("value")
                .cloned()
                .unwrap_or_default()]))
        },
    );

    let mut registry = NodeRegistry::new();
    for node_type in base.node_types() {
        let (Some(schema), Some(inner)) = (base.get_schema(node_type), base.get_executor(node_type)) else {
            continue;
        };
        registry.register(
            schema.clone(),
            Arc::new(Counting {
                inner,
                calls: calls.clone(),
            }),
        );
    }
    registry
}

struct Harness {
    engine: Engine,
    calls: Arc<Invocations>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn with_cache(cache: Arc<CacheLayer>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Invocations::default());
        let registry = counted_registry(dir.path(), &calls);
        Self {
            engine: Engine::new(Arc::new(registry), cache),
            calls,
            _dir: dir,
        }
    }

    fn new() -> Self {
        Self::with_cache(Arc::new(CacheLayer::default()))
    }

    async fn run(&self, graph: WorkflowGraph, outputs: &[&str]) -> ExecutionReport {
        let prompt = Prompt::new(graph).with_outputs(outputs.iter().copied());
        self.engine.execute(prompt, CancellationToken::new()).await
    }

    fn invoked(&self) -> Vec<String> {
        let mut calls = self.calls.take();
        calls.sort();
        calls
    }
}

/// A = constant, B = A + 1, C = B * 2, D = independent constant
fn chain(a: i64) -> WorkflowGraph {
    WorkflowBuilder::new("chain")
        .add_node("A", "constant")
        .literal("value", json!(a))
        .add_node("B", "add")
        .link("a", "A", 0)
        .add_node("C", "multiply")
        .link("a", "B", 0)
        .add_node("D", "constant")
        .literal("value", json!("unrelated"))
        .build()
}

#[tokio::test]
async fn test_incremental_rerun_recomputes_only_changed_nodes() {
    let h = Harness::new();

    let report = h.run(chain(5), &["C", "D"]).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.value("C", 0), Some(&json!(12)));
    assert_eq!(h.invoked(), vec!["A", "B", "C", "D"]);

    let report = h.run(chain(6), &["C", "D"]).await;
    assert_eq!(report.value("C", 0), Some(&json!(14)));
    assert_eq!(h.invoked(), vec!["A", "B", "C"]);
    assert_eq!(report.status_of("D"), Some(NodeStatus::Cached));
}

#[tokio::test]
async fn test_warm_cache_invokes_nothing() {
    let h = Harness::new();
    let cold = h.run(chain(5), &["C"]).await;
    h.invoked();

    let warm = h.run(chain(5), &["C"]).await;
    assert!(h.invoked().is_empty());
    assert_eq!(cold.outputs, warm.outputs);
}

#[tokio::test]
async fn test_unrequested_nodes_are_pruned() {
    let h = Harness::new();
    let report = h.run(chain(5), &["B"]).await;
    assert_eq!(h.invoked(), vec!["A", "B"]);
    assert!(report.status_of("C").is_none());
    assert!(report.status_of("D").is_none());
}

#[tokio::test]
async fn test_output_nodes_selected_by_default() {
    let h = Harness::new();
    let graph = WorkflowBuilder::new("outputs")
        .add_node("x", "constant")
        .literal("value", json!(3))
        .add_node("shown", "preview")
        .link("value", "x", 0)
        .add_node("stray", "constant")
        .literal("value", json!(4))
        .build();

    let report = h.run(graph.clone(), &[]).await;
    assert!(report.is_success());
    assert_eq!(report.value("shown", 0), Some(&json!(3)));
    assert_eq!(h.invoked(), vec!["shown", "x"]);

    // An explicit selection excludes output nodes not asked for
    h.run(graph, &["stray"]).await;
    assert_eq!(h.invoked(), vec!["stray"]);
}

#[tokio::test]
async fn test_no_output_nodes_is_graph_error() {
    let h = Harness::new();
    let graph = WorkflowBuilder::new("none")
        .add_node("x", "constant")
        .literal("value", json!(1))
        .build();
    let report = h.run(graph, &[]).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.errors[0].kind, ErrorKind::GraphError);
}

#[tokio::test]
async fn test_cycle_is_rejected_before_running() {
    let h = Harness::new();
    let graph = WorkflowBuilder::new("cycle")
        .add_node("A", "add")
        .link("a", "B", 0)
        .add_node("B", "add")
        .link("a", "A", 0)
        .build();

    let report = h.run(graph, &["A"]).await;
    assert_eq!(report.status, RunStatus::Failed);
    let error = &report.errors[0];
    assert_eq!(error.kind, ErrorKind::GraphError);
    assert!(error.nodes.contains(&"A".to_string()));
    assert!(error.nodes.contains(&"B".to_string()));
    assert!(h.invoked().is_empty());
}

#[tokio::test]
async fn test_type_mismatch_is_type_error() {
    let h = Harness::new();
    let graph = WorkflowBuilder::new("types")
        .add_node("t", "concat")
        .literal("a", json!("x"))
        .literal("b", json!("y"))
        .add_node("n", "add")
        .link("a", "t", 0)
        .build();
    let report = h.run(graph, &["n"]).await;
    assert_eq!(report.errors[0].kind, ErrorKind::TypeError);
    assert_eq!(report.errors[0].node_id(), Some("n"));
    assert_eq!(report.errors[0].port.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_lazy_switch_computes_one_branch() {
    let h = Harness::new();
    let graph = |condition: bool| {
        WorkflowBuilder::new("switch")
            .add_node("cheap", "constant")
            .literal("value", json!("cheap"))
            .add_node("costly", "slow")
            .literal("value", json!("costly"))
            .add_node("pick", "switch")
            .literal("condition", json!(condition))
            .link("on_true", "cheap", 0)
            .link("on_false", "costly", 0)
            .build()
    };

    let report = h.run(graph(true), &["pick"]).await;
    assert_eq!(report.value("pick", 0), Some(&json!("cheap")));
    assert_eq!(h.invoked(), vec!["cheap", "pick"]);

    let report = h.run(graph(false), &["pick"]).await;
    assert_eq!(report.value("pick", 0), Some(&json!("costly")));
    assert_eq!(h.invoked(), vec!["costly", "pick"]);
}

#[tokio::test]
async fn test_repeat_expands_and_is_cached() {
    let sink = Arc::new(VecEventSink::new());
    let mut h = Harness::new();
    h.engine = h.engine.with_event_sink(sink.clone());
    let graph = || {
        WorkflowBuilder::new("repeat")
            .add_node("start", "constant")
            .literal("value", json!(10))
            .add_node("r", "repeat-add")
            .link("value", "start", 0)
            .literal("step", json!(5))
            .literal("times", json!(3))
            .add_node("out", "preview")
            .link("value", "r", 0)
            .build()
    };

    let report = h.run(graph(), &[]).await;
    assert!(report.is_success(), "{:?}", report.errors);
    assert_eq!(report.value("out", 0), Some(&json!(25)));
    assert_eq!(
        h.invoked(),
        vec!["out", "r", "r.step0", "r.step1", "r.step2", "start"]
    );
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::NodeExpanded { node_id, .. } if node_id == "r")));

    let report = h.run(graph(), &[]).await;
    assert_eq!(report.status_of("r"), Some(NodeStatus::Cached));
    assert!(h.invoked().is_empty());
}

#[tokio::test]
async fn test_failure_skips_dependents_but_not_siblings() {
    let h = Harness::new();
    let graph = WorkflowBuilder::new("failure")
        .add_node("src", "constant")
        .literal("value", json!(1))
        .add_node("bad", "explode")
        .link("value", "src", 0)
        .add_node("after", "preview")
        .link("value", "bad", 0)
        .add_node("fine", "preview")
        .link("value", "src", 0)
        .build();

    let report = h.run(graph, &[]).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].node_id(), Some("bad"));
    assert_eq!(report.errors[0].kind, ErrorKind::NodeExecutionError);
    assert_eq!(report.skipped, vec!["after"]);
    assert_eq!(report.value("fine", 0), Some(&json!(1)));
}

#[tokio::test]
async fn test_save_text_reports_artifact() {
    let sink = Arc::new(VecEventSink::new());
    let mut h = Harness::new();
    h.engine = h.engine.with_event_sink(sink.clone());
    let graph = WorkflowBuilder::new("save")
        .add_node("t", "concat")
        .literal("a", json!("hello"))
        .literal("b", json!("world"))
        .literal("separator", json!(", "))
        .add_node("s", "save-text")
        .link("text", "t", 0)
        .build();

    let report = h.run(graph, &[]).await;
    assert!(report.is_success(), "{:?}", report.errors);
    let saved = report.output("s").unwrap();
    assert_eq!(saved.artifacts.len(), 1);
    assert_eq!(saved.artifacts[0].kind, "text");

    let written = std::fs::read_to_string(h._dir.path().join(&saved.artifacts[0].path)).unwrap();
    assert_eq!(written, "hello, world");
    assert!(sink.events().iter().any(|e| matches!(
        e,
        WorkflowEvent::NodeCompleted { node_id, artifacts, .. } if node_id == "s" && artifacts.len() == 1
    )));
}

#[tokio::test]
async fn test_concurrent_identical_runs_compute_once() {
    let cache = Arc::new(CacheLayer::default());
    let first = Harness::with_cache(cache.clone());
    let second = Harness::with_cache(cache);
    let graph = || {
        WorkflowBuilder::new("dedup")
            .add_node("x", "constant")
            .literal("value", json!(7))
            .add_node("s", "slow")
            .link("value", "x", 0)
            .build()
    };

    let (a, b) = tokio::join!(first.run(graph(), &["s"]), second.run(graph(), &["s"]));
    assert_eq!(a.value("s", 0), Some(&json!(7)));
    assert_eq!(b.value("s", 0), Some(&json!(7)));

    let mut slow_calls: Vec<String> = first.invoked();
    slow_calls.extend(second.invoked());
    assert_eq!(slow_calls.iter().filter(|id| *id == "s").count(), 1);
}

#[tokio::test]
async fn test_lru_capacity_evicts_oldest() {
    let cache = Arc::new(CacheLayer::from_config(&CacheConfig {
        strategy: CacheStrategyKind::Lru,
        lru_capacity: 2,
    }));
    let h = Harness::with_cache(cache.clone());
    let single = |v: i64| {
        WorkflowBuilder::new("lru")
            .add_node("c", "constant")
            .literal("value", json!(v))
            .build()
    };

    for v in [1, 2, 3] {
        h.run(single(v), &["c"]).await;
    }
    assert_eq!(cache.len(), 2);
    h.invoked();

    h.run(single(1), &["c"]).await;
    assert_eq!(h.invoked(), vec!["c"]);
    h.run(single(3), &["c"]).await;
    assert!(h.invoked().is_empty());
    assert!(cache.stats().evictions >= 2);
}

#[tokio::test]
async fn test_dependency_aware_cache_matches_classic() {
    let cache = Arc::new(CacheLayer::from_config(&CacheConfig {
        strategy: CacheStrategyKind::DependencyAware,
        ..CacheConfig::default()
    }));
    let h = Harness::with_cache(cache);

    assert_eq!(h.run(chain(5), &["C"]).await.value("C", 0), Some(&json!(12)));
    h.invoked();
    assert_eq!(h.run(chain(5), &["C"]).await.value("C", 0), Some(&json!(12)));
    assert!(h.invoked().is_empty());
    assert_eq!(h.run(chain(6), &["C"]).await.value("C", 0), Some(&json!(14)));
    assert_eq!(h.invoked(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_queue_cancels_running_run() {
    let h = Harness::new();
    let cache = h.engine.cache().clone();
    let engine = Arc::new(h.engine);
    let queue = Arc::new(PromptQueue::default());
    let shutdown = CancellationToken::new();
    let worker = PromptWorker::new(queue.clone(), engine).spawn(shutdown.clone());

    let graph = WorkflowBuilder::new("cancel")
        .add_node("x", "constant")
        .literal("value", json!(1))
        .add_node("s", "slow")
        .link("value", "x", 0)
        .add_node("shown", "preview")
        .link("value", "s", 0)
        .build();
    let submission = queue.submit(Prompt::new(graph), 0).unwrap();

    while queue.status(&submission.run_id) != Some(RunStatus::Running) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.cancel(&submission.run_id), Ok(CancelOutcome::Signalled));

    let report = queue.wait_for(&submission.run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.status_of("shown").is_none());
    // Work finished before the cancellation stays cached
    assert_eq!(cache.len(), 2);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_queue_runs_by_priority() {
    let h = Harness::new();
    let calls = h.calls.clone();
    let engine = Arc::new(h.engine);
    let queue = Arc::new(PromptQueue::default());

    let single = |v: i64| {
        WorkflowBuilder::new("q")
            .add_node(format!("c{}", v), "constant")
            .literal("value", json!(v))
            .build()
    };
    for (v, priority) in [(1, 0), (2, 0), (3, 10)] {
        let prompt = Prompt::new(single(v))
            .with_run_id(format!("run{}", v))
            .with_outputs([format!("c{}", v)]);
        queue.submit(prompt, priority).unwrap();
    }

    // Start consuming only after everything is queued
    let shutdown = CancellationToken::new();
    let worker = PromptWorker::new(queue.clone(), engine).spawn(shutdown.clone());
    for run_id in ["run1", "run2", "run3"] {
        let report = queue.wait_for(run_id).await.unwrap();
        assert!(report.is_success());
    }
    assert_eq!(calls.take(), vec!["c3", "c1", "c2"]);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_demo_prompts_run() {
    #[derive(serde::Deserialize)]
    struct DemoPrompt {
        graph: WorkflowGraph,
        #[serde(default)]
        outputs: Vec<String>,
    }

    let h = Harness::new();
    let demos = [
        (include_str!("../../../demos/chain.json"), "show", json!(12)),
        (include_str!("../../../demos/switch.json"), "pick", json!("taken")),
        (include_str!("../../../demos/repeat.json"), "show", json!(20.0)),
    ];
    for (source, node, expected) in demos {
        let demo: DemoPrompt = serde_json::from_str(source).unwrap();
        let outputs: Vec<&str> = demo.outputs.iter().map(String::as_str).collect();
        let report = h.run(demo.graph, &outputs).await;
        assert!(report.is_success(), "{:?}", report.errors);
        assert_eq!(report.value(node, 0), Some(&expected));
    }
    // The untaken branch of the switch demo never expanded
    assert!(!h.invoked().iter().any(|id| id.starts_with("no")));
}
