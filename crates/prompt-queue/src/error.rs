//! Error types for the prompt queue

use node_engine::RunStatus;
use thiserror::Error;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur when submitting or controlling runs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Run '{0}' is already queued, running or recorded")]
    DuplicateRunId(String),

    #[error("Unknown run '{0}'")]
    UnknownRun(String),

    #[error("Run '{run_id}' already finished: {status}")]
    AlreadyFinished { run_id: String, status: RunStatus },
}
