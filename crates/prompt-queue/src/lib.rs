//! Prompt queue for node-engine
//!
//! Holds submitted prompts by priority and feeds them, one at a time, to an
//! [`Engine`](node_engine::Engine) through a single [`PromptWorker`] loop.
//! Finished runs are kept in a bounded history for status queries.

pub mod error;
pub mod queue;
pub mod worker;

pub use error::{QueueError, Result};
pub use queue::{CancelOutcome, PromptQueue, QueueEntry, QueueSnapshot, Submission};
pub use worker::PromptWorker;
