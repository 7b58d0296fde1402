//! Error types for the node engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// Malformed reference, cycle, or a failed expansion splice
    #[error("Graph error: {0}")]
    Graph(String),

    /// Port type mismatch or missing required input
    #[error("Type error: {0}")]
    Type(String),

    /// A node callable failed
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// Cache strategy misconfiguration or internal inconsistency
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Create a graph error with a message
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// Create a node execution error. Node bodies usually return this.
    pub fn failed(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }

    /// Classify this error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Graph(_) => ErrorKind::GraphError,
            Self::Type(_) => ErrorKind::TypeError,
            Self::Cache(_) => ErrorKind::CacheError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NodeExecution { .. }
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::NodeExecutionError,
        }
    }
}

/// Reporting taxonomy shared by validation and execution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    GraphError,
    TypeError,
    NodeExecutionError,
    CacheError,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GraphError => "GraphError",
            Self::TypeError => "TypeError",
            Self::NodeExecutionError => "NodeExecutionError",
            Self::CacheError => "CacheError",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}
