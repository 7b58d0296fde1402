//! Node type registry for dynamic node resolution
//!
//! This module provides a registry that maps node type strings to their
//! schema and executor. The executor never sees node source; it asks the
//! registry for a type's ports during validation and for its callable
//! during execution.
//!
//! # Usage
//!
//! ```ignore
//! use node_engine::{NodeRegistry, NodeSchema, NodeOutcome};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register_fn(double_schema(), |_ctx, inputs| {
//!     let v = inputs["value"].as_i64().unwrap_or(0);
//!     Ok(NodeOutcome::values(vec![json!(v * 2)]))
//! });
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::{NodeCategory, NodeSchema};
use crate::error::Result;
use crate::events::{EventSink, WorkflowEvent};
use crate::expansion::Subgraph;
use crate::types::{NodeOutputs, PortId};

/// Resolved input values handed to a node body, keyed by port
pub type NodeInputs = HashMap<String, serde_json::Value>;

/// What a node body produced
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// One value per declared output slot
    Outputs(NodeOutputs),
    /// A subgraph that takes over this node's computation
    Expand(Subgraph),
}

impl NodeOutcome {
    /// Outputs without artifacts
    pub fn values(values: Vec<serde_json::Value>) -> Self {
        Self::Outputs(NodeOutputs::new(values))
    }
}

/// Per-invocation context handed to a node body
#[derive(Clone)]
pub struct NodeContext {
    run_id: String,
    node_id: String,
    sink: Arc<dyn EventSink>,
}

impl NodeContext {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
            sink,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Report progress (e.g. sampler steps) to the run's event sink
    pub fn progress(&self, current: u64, total: u64) {
        let event = WorkflowEvent::node_progress(&self.run_id, &self.node_id, current, total);
        if let Err(e) = self.sink.send(event) {
            log::debug!("Dropped progress event for '{}': {}", self.node_id, e);
        }
    }
}

/// Per-node-type executor
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// First phase of lazy input resolution.
    ///
    /// `inputs` holds everything already available; `pending` names the lazy
    /// inputs that are bound to not-yet-computed upstream outputs. Return the
    /// subset that must be computed before [`execute`](Self::execute) runs.
    /// The default demands all of them.
    fn check_lazy_status(&self, _ctx: &NodeContext, _inputs: &NodeInputs, pending: &[PortId]) -> Vec<PortId> {
        pending.to_vec()
    }

    /// Execute this node type with the given inputs
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome>;
}

/// A registration entry combining a schema with an optional executor
struct RegistryEntry {
    schema: NodeSchema,
    executor: Option<Arc<dyn NodeExecutor>>,
}

/// Registry of node types with their schemas and executors
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::new();
/// // Register built-in nodes...
/// registry.merge(plugin_registry);
/// ```
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node type with its schema and executor
    pub fn register(&mut self, schema: NodeSchema, executor: Arc<dyn NodeExecutor>) {
        self.entries.insert(
            schema.node_type.clone(),
            RegistryEntry {
                schema,
                executor: Some(executor),
            },
        );
    }

    /// Register a node type backed by an async callback
    pub fn register_callback<F, Fut>(&mut self, schema: NodeSchema, callback: F)
    where
        F: Fn(NodeContext, NodeInputs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<NodeOutcome>> + Send + 'static,
    {
        let executor = Arc::new(CallbackNodeExecutor {
            callback: Box::new(move |ctx, inputs| Box::pin(callback(ctx, inputs))),
        });
        self.register(schema, executor);
    }

    /// Register a node type backed by a synchronous closure
    pub fn register_fn(
        &mut self,
        schema: NodeSchema,
        callback: impl Fn(&NodeContext, NodeInputs) -> Result<NodeOutcome> + Send + Sync + 'static,
    ) {
        self.register(schema, Arc::new(SyncCallbackNodeExecutor::new(callback)));
    }

    /// Register a schema without an executor
    ///
    /// Graphs using such a type validate but fail at execution time.
    pub fn register_schema(&mut self, schema: NodeSchema) {
        self.entries.insert(
            schema.node_type.clone(),
            RegistryEntry {
                schema,
                executor: None,
            },
        );
    }

    /// Get the schema for a node type
    pub fn get_schema(&self, node_type: &str) -> Option<&NodeSchema> {
        self.entries.get(node_type).map(|e| &e.schema)
    }

    /// Get all registered schemas
    pub fn all_schemas(&self) -> Vec<&NodeSchema> {
        self.entries.values().map(|e| &e.schema).collect()
    }

    /// Get schemas grouped by category
    pub fn schemas_by_category(&self) -> HashMap<NodeCategory, Vec<&NodeSchema>> {
        let mut grouped: HashMap<NodeCategory, Vec<&NodeSchema>> = HashMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.schema.category)
                .or_default()
                .push(&entry.schema);
        }
        grouped
    }

    /// Get the executor for a node type
    pub fn get_executor(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.entries.get(node_type).and_then(|e| e.executor.clone())
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedCallback = Box<
    dyn Fn(NodeContext, NodeInputs) -> Pin<Box<dyn std::future::Future<Output = Result<NodeOutcome>> + Send>>
        + Send
        + Sync,
>;

/// Async callback-based NodeExecutor
pub struct CallbackNodeExecutor {
    callback: BoxedCallback,
}

#[async_trait]
impl NodeExecutor for CallbackNodeExecutor {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        (self.callback)(ctx.clone(), inputs).await
    }
}

/// Synchronous callback-based NodeExecutor
pub struct SyncCallbackNodeExecutor {
    callback: Box<dyn Fn(&NodeContext, NodeInputs) -> Result<NodeOutcome> + Send + Sync>,
}

impl SyncCallbackNodeExecutor {
    pub fn new(
        callback: impl Fn(&NodeContext, NodeInputs) -> Result<NodeOutcome> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl NodeExecutor for SyncCallbackNodeExecutor {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        (self.callback)(ctx, inputs)
    }
}
