//! Event types for streaming run progress
//!
//! Events are sent from the executor to any consumer (socket bridge,
//! log, UI) to report progress, cache hits, failures and run completion.
//! Sinks are pure consumers: nothing they do feeds back into scheduling.

use serde::{Deserialize, Serialize};

use crate::types::{Artifact, NodeOutputs};

/// Trait for sending run events
///
/// This abstracts over the transport mechanism (channel, socket, log)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a run, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// Validation passed and the run entered its node loop
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, node_count: usize },

    /// A node is about to be resolved
    #[serde(rename_all = "camelCase")]
    NodeStarted { run_id: String, node_id: String },

    /// A node was served from cache
    #[serde(rename_all = "camelCase")]
    NodeCached { run_id: String, node_id: String },

    /// Progress reported by a running node body
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        run_id: String,
        node_id: String,
        current: u64,
        total: u64,
    },

    /// A node expanded into new nodes
    #[serde(rename_all = "camelCase")]
    NodeExpanded {
        run_id: String,
        node_id: String,
        new_nodes: Vec<String>,
    },

    /// A node completed successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        run_id: String,
        node_id: String,
        output_summary: serde_json::Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        artifacts: Vec<Artifact>,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
    },

    /// The run reached a terminal status
    #[serde(rename_all = "camelCase")]
    RunFinished { run_id: String, status: String },
}

impl WorkflowEvent {
    /// Create a node progress event
    pub fn node_progress(run_id: &str, node_id: &str, current: u64, total: u64) -> Self {
        Self::NodeProgress {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            current,
            total,
        }
    }

    /// Create a node completed event, summarizing the outputs
    pub fn node_completed(run_id: &str, node_id: &str, outputs: &NodeOutputs) -> Self {
        Self::NodeCompleted {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            output_summary: summarize_outputs(outputs),
            artifacts: outputs.artifacts.clone(),
        }
    }

    /// Node the event refers to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCached { node_id, .. }
            | Self::NodeProgress { node_id, .. }
            | Self::NodeExpanded { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. } => Some(node_id),
            Self::RunStarted { .. } | Self::RunFinished { .. } => None,
        }
    }
}

/// Scalars pass through; composite values are reduced to a shape tag so
/// large tensors never travel over the event stream.
pub fn summarize_outputs(outputs: &NodeOutputs) -> serde_json::Value {
    let values = outputs
        .values
        .iter()
        .map(|v| match v {
            serde_json::Value::Array(items) => serde_json::json!(format!("<array:{}>", items.len())),
            serde_json::Value::Object(map) => serde_json::json!(format!("<object:{}>", map.len())),
            serde_json::Value::String(s) if s.len() > 256 => {
                serde_json::json!(format!("<string:{}>", s.len()))
            }
            scalar => scalar.clone(),
        })
        .collect::<Vec<_>>();
    serde_json::Value::Array(values)
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// An event sink that writes every event to the log at debug level
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        match &event {
            WorkflowEvent::NodeFailed { run_id, node_id, error } => {
                log::warn!("[{}] node '{}' failed: {}", run_id, node_id, error);
            }
            other => log::debug!("{:?}", other),
        }
        Ok(())
    }
}

/// An event sink that forwards events into a tokio channel
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}
