//! Node Engine - incremental execution of node graphs
//!
//! A workflow is a directed acyclic graph of typed nodes. Running it for a
//! set of requested outputs only computes what those outputs need, and only
//! what changed since the last run:
//!
//! - Every node gets a content fingerprint covering its type, literal
//!   inputs and the fingerprints of everything upstream
//! - Outputs are cached by fingerprint and shared across runs, with at most
//!   one in-flight computation per fingerprint
//! - Lazy inputs are only computed when the consuming node asks for them
//! - A node may expand into a subgraph at runtime
//!
//! # Architecture
//!
//! - [`NodeRegistry`]: node types, their port schemas and executors
//! - [`Validator`]: structural checks and the pruned execution order
//! - [`CacheLayer`]: classic, LRU or dependency-aware output cache
//! - [`Engine`]: runs one prompt against a registry and cache
//! - [`EventSink`]: progress and lifecycle events
//!
//! # Example
//!
//! ```ignore
//! use node_engine::{Engine, CacheLayer, Prompt, WorkflowBuilder};
//!
//! let graph = WorkflowBuilder::new("wf")
//!     .add_node("a", "constant")
//!     .literal("value", json!(5))
//!     .add_node("b", "add1")
//!     .link("value", "a", 0)
//!     .build();
//!
//! let engine = Engine::new(registry, Arc::new(CacheLayer::default()));
//! let report = engine
//!     .execute(Prompt::new(graph).with_outputs(["b"]), CancellationToken::new())
//!     .await;
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod expansion;
pub mod fingerprint;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use cache::{CacheLayer, CacheStats, CacheStrategy};
pub use config::{CacheConfig, CacheStrategyKind, EngineConfig, QueueConfig};
pub use descriptor::{InputPort, NodeCategory, NodeDescriptor, NodeSchema, OutputPort};
pub use engine::{Engine, ErrorEntry, ExecutionReport, NodeStatus, Prompt, RunStatus};
pub use error::{ErrorKind, NodeEngineError, Result};
pub use events::{EventSink, LogEventSink, NullEventSink, WorkflowEvent};
pub use expansion::Subgraph;
pub use fingerprint::Fingerprint;
pub use registry::{NodeContext, NodeExecutor, NodeInputs, NodeOutcome, NodeRegistry};
pub use types::{
    Artifact, GraphNode, NodeId, NodeInput, NodeOutputs, OutputRef, PortDataType, PortId,
    WorkflowGraph,
};
pub use validation::{ExecutionPlan, NodeOrdering, ValidationError, ValidationFailure, Validator};

// Cancellation is part of the execute API
pub use tokio_util::sync::CancellationToken;
