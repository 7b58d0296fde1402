//! Prompt executor
//!
//! Runs one prompt at a time over a pruned, dependency-ordered worklist:
//!
//! 1. validate the graph and plan the nodes reachable from the requested
//!    outputs
//! 2. for each node, fingerprint it and consult the shared cache
//! 3. on a miss, resolve inputs, asking the node which lazy inputs it needs
//!    and scheduling those first, then invoke it
//! 4. if the node expands, splice the subgraph in, re-validate, schedule the
//!    new nodes ahead of the expanding node, and resolve the expanding node's
//!    outputs once they are done
//!
//! A failing node does not stop unrelated branches; its dependents are
//! skipped. Cancellation is checked between nodes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheLayer, InflightGuard, Lookup};
use crate::config::EngineConfig;
use crate::descriptor::NodeSchema;
use crate::error::{ErrorKind, NodeEngineError, Result};
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::fingerprint::Fingerprinter;
use crate::registry::{NodeContext, NodeInputs, NodeOutcome, NodeRegistry};
use crate::types::{GraphNode, NodeId, NodeInput, NodeOutputs, PortId, WorkflowGraph};
use crate::validation::{DiscoveryOrder, NodeOrdering, ValidationError, ValidationFailure, Validator};

/// One submitted graph execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub run_id: String,
    pub graph: WorkflowGraph,
    /// Output nodes to realize. Empty selects every output node.
    #[serde(default)]
    pub outputs: Vec<NodeId>,
}

impl Prompt {
    /// New prompt with a fresh run ID
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            graph,
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

/// Run lifecycle: `Queued -> Validating -> Running -> {Completed, Failed, Cancelled}`
///
/// `Validating` may go straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Validating,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Validating => "validating",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal state of one node in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Served from cache
    Cached,
    /// Computed this run
    Executed,
    /// The node itself failed
    Failed,
    /// Not run because an input it needed failed
    Skipped,
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub kind: ErrorKind,
    /// Nodes the error is about; a cycle names every node on it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortId>,
    pub message: String,
}

impl ErrorEntry {
    /// The first node named, if any
    pub fn node_id(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    fn from_validation(error: &ValidationError) -> Self {
        Self {
            kind: error.kind(),
            nodes: error.node_ids().into_iter().map(str::to_string).collect(),
            port: error.port().map(str::to_string),
            message: error.to_string(),
        }
    }

    fn from_node_error(node_id: &str, error: &NodeEngineError) -> Self {
        let message = match error {
            NodeEngineError::NodeExecution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: error.kind(),
            nodes: vec![node_id.to_string()],
            port: None,
            message,
        }
    }
}

/// Terminal report of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Realized outputs of every node that was cached or executed
    pub outputs: HashMap<NodeId, NodeOutputs>,
    pub node_status: HashMap<NodeId, NodeStatus>,
    /// One entry per validation problem or originally failing node
    pub errors: Vec<ErrorEntry>,
    /// Nodes not run because something upstream failed, in the order reached
    pub skipped: Vec<NodeId>,
}

impl ExecutionReport {
    fn rejected(run_id: String, failure: &ValidationFailure) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed,
            outputs: HashMap::new(),
            node_status: HashMap::new(),
            errors: failure.errors.iter().map(ErrorEntry::from_validation).collect(),
            skipped: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn output(&self, node_id: &str) -> Option<&NodeOutputs> {
        self.outputs.get(node_id)
    }

    /// Value in output slot `slot` of `node_id`
    pub fn value(&self, node_id: &str, slot: usize) -> Option<&serde_json::Value> {
        self.outputs.get(node_id).and_then(|o| o.get(slot))
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_status.get(node_id).copied()
    }

    /// Nodes computed (not served from cache) this run, sorted
    pub fn executed(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .node_status
            .iter()
            .filter(|(_, s)| **s == NodeStatus::Executed)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// What to do with a node after visiting it
enum Visit {
    Done,
    /// Run these first, then visit the node again
    Requeue(Vec<NodeId>),
}

/// Run-local state: the graph (mutated by expansion), output table and
/// per-node bookkeeping
struct RunState {
    run_id: String,
    graph: WorkflowGraph,
    registry: Arc<NodeRegistry>,
    validator: Validator,
    fingerprints: Fingerprinter,
    outputs: HashMap<NodeId, Arc<NodeOutputs>>,
    status: HashMap<NodeId, NodeStatus>,
    /// Claims on fingerprints this run is computing
    claims: HashMap<NodeId, InflightGuard>,
    /// Lazy ports already demanded, per node
    demanded: HashMap<NodeId, HashSet<PortId>>,
    expanded: HashSet<NodeId>,
    errors: Vec<ErrorEntry>,
    skipped: Vec<NodeId>,
}

impl RunState {
    fn is_terminal(&self, node_id: &str) -> bool {
        self.status.contains_key(node_id)
    }

    fn is_lazy(&self, node: &GraphNode, port: &str) -> bool {
        self.registry
            .get_schema(&node.node_type)
            .map(|s| s.is_lazy(port))
            .unwrap_or(false)
    }

    /// First needed upstream node that failed or was skipped
    fn failed_dependency(&self, node: &GraphNode) -> Option<NodeId> {
        let demanded = self.demanded.get(&node.id);
        node.links()
            .filter(|(port, _)| {
                !self.is_lazy(node, port) || demanded.map(|d| d.contains(*port)).unwrap_or(false)
            })
            .map(|(_, source)| source)
            .chain(node.expansion.iter().flatten())
            .map(|source| &source.node_id)
            .find(|id| {
                matches!(
                    self.status.get(id.as_str()),
                    Some(NodeStatus::Failed | NodeStatus::Skipped)
                )
            })
            .cloned()
    }

    /// Not-yet-terminal nodes of `order`, excluding `node_id`
    fn pending(&self, order: Vec<NodeId>, node_id: &str) -> Vec<NodeId> {
        order
            .into_iter()
            .filter(|id| id != node_id && !self.is_terminal(id))
            .collect()
    }

    fn upstream_value(&self, node_id: &str, port: &str, source: &crate::types::OutputRef) -> Result<Option<serde_json::Value>> {
        let Some(outputs) = self.outputs.get(&source.node_id) else {
            return Ok(None);
        };
        outputs.get(source.output).cloned().map(Some).ok_or_else(|| {
            NodeEngineError::failed(
                node_id,
                format!(
                    "input '{}' reads output {} of '{}', which produced {} value(s)",
                    port,
                    source.output,
                    source.node_id,
                    outputs.values.len()
                ),
            )
        })
    }
}

/// Convert a failed re-validation into a single error
fn validation_error(failure: ValidationFailure) -> NodeEngineError {
    let type_error = failure
        .errors
        .first()
        .map(|e| e.kind() == ErrorKind::TypeError)
        .unwrap_or(false);
    let message = failure.to_string();
    if type_error {
        NodeEngineError::Type(message)
    } else {
        NodeEngineError::Graph(message)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Executes prompts against a registry and a shared cache
///
/// Several engines may share one [`CacheLayer`].
pub struct Engine {
    registry: RwLock<Arc<NodeRegistry>>,
    cache: Arc<CacheLayer>,
    event_sink: Arc<dyn EventSink>,
    ordering: Arc<dyn NodeOrdering>,
    sequence: AtomicU64,
}

impl Engine {
    pub fn new(registry: Arc<NodeRegistry>, cache: Arc<CacheLayer>) -> Self {
        Self {
            registry: RwLock::new(registry),
            cache,
            event_sink: Arc::new(NullEventSink),
            ordering: Arc::new(DiscoveryOrder),
            sequence: AtomicU64::new(0),
        }
    }

    /// Engine with a fresh cache built from `config`
    pub fn from_config(registry: Arc<NodeRegistry>, config: &EngineConfig) -> Self {
        Self::new(registry, Arc::new(CacheLayer::from_config(&config.cache)))
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Tie-break for independent nodes
    pub fn with_ordering(mut self, ordering: Arc<dyn NodeOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Current node definitions
    pub fn registry(&self) -> Arc<NodeRegistry> {
        match self.registry.read() {
            Ok(registry) => registry.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap node definitions and invalidate the cache
    ///
    /// Runs already in progress keep the definitions they started with.
    pub fn reload_registry(&self, registry: Arc<NodeRegistry>) {
        match self.registry.write() {
            Ok(mut current) => *current = registry,
            Err(poisoned) => *poisoned.into_inner() = registry,
        }
        self.cache.invalidate_all();
        log::info!("Node definitions reloaded");
    }

    /// Validator over the current definitions
    pub fn validator(&self) -> Validator {
        Validator::new(self.registry()).with_ordering(self.ordering.clone())
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::debug!("Event sink rejected event: {}", e);
        }
    }

    /// Execute `prompt` to completion, failure or cancellation
    pub async fn execute(&self, prompt: Prompt, cancel: CancellationToken) -> ExecutionReport {
        let (status, _) = watch::channel(RunStatus::Queued);
        self.execute_tracked(prompt, cancel, &status).await
    }

    /// Like [`execute`](Self::execute), publishing each status transition
    pub async fn execute_tracked(
        &self,
        prompt: Prompt,
        cancel: CancellationToken,
        status: &watch::Sender<RunStatus>,
    ) -> ExecutionReport {
        let Prompt {
            run_id,
            graph,
            outputs,
        } = prompt;
        status.send_replace(RunStatus::Validating);

        let validator = self.validator();
        let plan = match validator.validate(&graph, &outputs) {
            Ok(plan) => plan,
            Err(failure) => {
                log::warn!("[{}] {}", run_id, failure);
                let report = ExecutionReport::rejected(run_id, &failure);
                self.emit(WorkflowEvent::RunFinished {
                    run_id: report.run_id.clone(),
                    status: report.status.to_string(),
                });
                status.send_replace(report.status);
                return report;
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = RunState {
            run_id: run_id.clone(),
            graph,
            registry: validator.registry().clone(),
            validator,
            fingerprints: Fingerprinter::new(sequence).with_history(self.cache.clone()),
            outputs: HashMap::new(),
            status: HashMap::new(),
            claims: HashMap::new(),
            demanded: HashMap::new(),
            expanded: HashSet::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        };

        status.send_replace(RunStatus::Running);
        log::info!(
            "[{}] running {} node(s) for output(s) {:?}",
            run_id,
            plan.order.len(),
            plan.outputs
        );
        self.emit(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            node_count: plan.order.len(),
        });

        let mut cancelled = false;
        let mut worklist: VecDeque<NodeId> = plan.order.into();
        while let Some(node_id) = worklist.pop_front() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if state.is_terminal(&node_id) {
                continue;
            }

            match self.visit(&mut state, &node_id, &cancel).await {
                Ok(Visit::Done) => {}
                Ok(Visit::Requeue(before)) => {
                    worklist.push_front(node_id);
                    for id in before.into_iter().rev() {
                        worklist.push_front(id);
                    }
                }
                Err(NodeEngineError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => self.fail(&mut state, &node_id, e),
            }
        }

        // Unfinished claims are released so waiting runs can take over
        state.claims.clear();
        self.cache.release_run(&run_id);
        log::debug!(
            "[{}] fingerprinted {} node(s), hashed {}",
            run_id,
            state.fingerprints.resolved(),
            state.fingerprints.hashed()
        );

        let final_status = if cancelled {
            RunStatus::Cancelled
        } else if state.errors.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        log::info!(
            "[{}] {} ({} error(s), {} skipped)",
            run_id,
            final_status,
            state.errors.len(),
            state.skipped.len()
        );
        self.emit(WorkflowEvent::RunFinished {
            run_id: run_id.clone(),
            status: final_status.to_string(),
        });
        status.send_replace(final_status);

        ExecutionReport {
            run_id,
            status: final_status,
            outputs: state
                .outputs
                .into_iter()
                .map(|(id, outputs)| (id, Arc::unwrap_or_clone(outputs)))
                .collect(),
            node_status: state.status,
            errors: state.errors,
            skipped: state.skipped,
        }
    }

    /// Record a node failure
    fn fail(&self, state: &mut RunState, node_id: &str, error: NodeEngineError) {
        state.claims.remove(node_id);
        log::warn!("[{}] node '{}' failed: {}", state.run_id, node_id, error);
        let entry = ErrorEntry::from_node_error(node_id, &error);
        self.emit(WorkflowEvent::NodeFailed {
            run_id: state.run_id.clone(),
            node_id: node_id.to_string(),
            error: entry.message.clone(),
        });
        state.errors.push(entry);
        state.status.insert(node_id.to_string(), NodeStatus::Failed);
    }

    fn skip(&self, state: &mut RunState, node_id: &str, upstream: &str) {
        state.claims.remove(node_id);
        log::debug!(
            "[{}] skipping '{}': upstream '{}' failed",
            state.run_id,
            node_id,
            upstream
        );
        self.emit(WorkflowEvent::NodeFailed {
            run_id: state.run_id.clone(),
            node_id: node_id.to_string(),
            error: format!("skipped: upstream node '{}' failed", upstream),
        });
        state.skipped.push(node_id.to_string());
        state.status.insert(node_id.to_string(), NodeStatus::Skipped);
    }

    /// Store a node's final outputs
    fn finish(&self, state: &mut RunState, node_id: &str, schema: &NodeSchema, outputs: NodeOutputs) -> Result<()> {
        if outputs.values.len() != schema.outputs.len() {
            return Err(NodeEngineError::failed(
                node_id,
                format!(
                    "returned {} output(s), '{}' declares {}",
                    outputs.values.len(),
                    schema.node_type,
                    schema.outputs.len()
                ),
            ));
        }

        let outputs = Arc::new(outputs);
        if let Some(guard) = state.claims.remove(node_id) {
            self.cache.complete(guard, outputs.clone());
        }
        self.emit(WorkflowEvent::node_completed(&state.run_id, node_id, &outputs));
        state.outputs.insert(node_id.to_string(), outputs);
        state.status.insert(node_id.to_string(), NodeStatus::Executed);
        Ok(())
    }

    async fn visit(&self, state: &mut RunState, node_id: &str, cancel: &CancellationToken) -> Result<Visit> {
        let node = state
            .graph
            .get_node(node_id)
            .cloned()
            .ok_or_else(|| NodeEngineError::graph(format!("Node '{}' not found", node_id)))?;
        let schema = state
            .registry
            .get_schema(&node.node_type)
            .cloned()
            .ok_or_else(|| NodeEngineError::graph(format!("Unknown node type '{}'", node.node_type)))?;

        if let Some(upstream) = state.failed_dependency(&node) {
            self.skip(state, node_id, &upstream);
            return Ok(Visit::Done);
        }

        if !state.claims.contains_key(node_id) {
            let fingerprint = state
                .fingerprints
                .fingerprint(&state.graph, &state.registry, node_id)?;
            match self.cache.acquire(fingerprint, &state.run_id, cancel).await? {
                Lookup::Hit(outputs) => {
                    self.emit(WorkflowEvent::NodeCached {
                        run_id: state.run_id.clone(),
                        node_id: node_id.to_string(),
                    });
                    state.outputs.insert(node_id.to_string(), outputs);
                    state.status.insert(node_id.to_string(), NodeStatus::Cached);
                    return Ok(Visit::Done);
                }
                Lookup::Compute(guard) => {
                    state.claims.insert(node_id.to_string(), guard);
                    self.emit(WorkflowEvent::NodeStarted {
                        run_id: state.run_id.clone(),
                        node_id: node_id.to_string(),
                    });
                }
            }
        }

        if state.expanded.contains(node_id) {
            let outputs = self.resolve_expansion(state, &node)?;
            self.finish(state, node_id, &schema, outputs)?;
            return Ok(Visit::Done);
        }

        let executor = state.registry.get_executor(&node.node_type).ok_or_else(|| {
            NodeEngineError::failed(
                node_id,
                format!("no executor registered for '{}'", node.node_type),
            )
        })?;
        let ctx = NodeContext::new(&state.run_id, node_id, self.event_sink.clone());

        // First phase: gather what is available and find what is missing
        let mut inputs = NodeInputs::new();
        let mut missing: Vec<NodeId> = Vec::new();
        let mut pending_lazy: Vec<PortId> = Vec::new();
        let already_demanded = state.demanded.get(node_id).cloned().unwrap_or_default();
        for (port, input) in &node.inputs {
            match input {
                NodeInput::Literal(value) => {
                    inputs.insert(port.clone(), value.clone());
                }
                NodeInput::Link(source) => match state.upstream_value(node_id, port, source)? {
                    Some(value) => {
                        inputs.insert(port.clone(), value);
                    }
                    None if schema.is_lazy(port) => {
                        if !already_demanded.contains(port) {
                            pending_lazy.push(port.clone());
                        }
                    }
                    None => missing.push(source.node_id.clone()),
                },
            }
        }
        for port in &schema.inputs {
            if !node.inputs.contains_key(&port.id) {
                if let Some(default) = &port.default_value {
                    inputs.insert(port.id.clone(), default.clone());
                }
            }
        }

        if !pending_lazy.is_empty() {
            let wanted = executor.check_lazy_status(&ctx, &inputs, &pending_lazy);
            for port in wanted {
                if !pending_lazy.contains(&port) {
                    continue;
                }
                if let Some(NodeInput::Link(source)) = node.inputs.get(&port) {
                    log::debug!(
                        "[{}] '{}' demands lazy input '{}' from '{}'",
                        state.run_id,
                        node_id,
                        port,
                        source.node_id
                    );
                    missing.push(source.node_id.clone());
                }
                state
                    .demanded
                    .entry(node_id.to_string())
                    .or_default()
                    .insert(port);
            }

            // A newly demanded source may already have failed earlier in the run
            if let Some(upstream) = state.failed_dependency(&node) {
                self.skip(state, node_id, &upstream);
                return Ok(Visit::Done);
            }
        }

        if !missing.is_empty() {
            let plan = state
                .validator
                .validate(&state.graph, &missing)
                .map_err(validation_error)?;
            let before = state.pending(plan.order, node_id);
            if before.is_empty() {
                return Err(NodeEngineError::graph(format!(
                    "Inputs of '{}' cannot be resolved: {:?}",
                    node_id, missing
                )));
            }
            return Ok(Visit::Requeue(before));
        }

        // Second phase: invoke with exactly the resolved inputs
        let result = AssertUnwindSafe(executor.execute(&ctx, inputs))
            .catch_unwind()
            .await;
        let outcome = match result {
            Ok(outcome) => outcome?,
            Err(payload) => return Err(NodeEngineError::failed(node_id, panic_message(payload))),
        };

        match outcome {
            NodeOutcome::Outputs(outputs) => {
                self.finish(state, node_id, &schema, outputs)?;
                Ok(Visit::Done)
            }
            NodeOutcome::Expand(subgraph) => {
                let new_nodes = state.graph.expand(node_id, subgraph)?;
                let plan = state
                    .validator
                    .validate(&state.graph, &[node_id.to_string()])
                    .map_err(validation_error)?;
                state.expanded.insert(node_id.to_string());
                log::debug!(
                    "[{}] '{}' expanded into {:?}",
                    state.run_id,
                    node_id,
                    new_nodes
                );
                self.emit(WorkflowEvent::NodeExpanded {
                    run_id: state.run_id.clone(),
                    node_id: node_id.to_string(),
                    new_nodes,
                });
                Ok(Visit::Requeue(state.pending(plan.order, node_id)))
            }
        }
    }

    /// Outputs of an expanded node, read through its aliases
    fn resolve_expansion(&self, state: &RunState, node: &GraphNode) -> Result<NodeOutputs> {
        let mut values = Vec::new();
        let mut artifacts = Vec::new();
        for (slot, alias) in node.expansion.iter().flatten().enumerate() {
            let port = format!("<output {}>", slot);
            let value = state.upstream_value(&node.id, &port, alias)?.ok_or_else(|| {
                NodeEngineError::graph(format!(
                    "Expansion output {} of '{}' was never computed",
                    slot, node.id
                ))
            })?;
            values.push(value);
            if let Some(outputs) = state.outputs.get(&alias.node_id) {
                for artifact in &outputs.artifacts {
                    if !artifacts.contains(artifact) {
                        artifacts.push(artifact.clone());
                    }
                }
            }
        }
        Ok(NodeOutputs { values, artifacts })
    }
}
