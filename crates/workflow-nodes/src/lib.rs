//! Workflow Nodes
//!
//! Built-in node implementations for node-engine.
//! Each node is an atomic building block that can be composed into workflows.
//!
//! # Categories
//!
//! - **Input**: literal values
//! - **Processing**: arithmetic and text
//! - **Control**: lazy branching and runtime expansion
//! - **Output**: nodes a run is for (preview, save to file)

pub mod builtins;
pub mod control;
pub mod input;
pub mod output;
pub mod processing;

// Re-export all nodes for convenience
pub use builtins::{builtin_registry, register_builtin_nodes};
pub use control::*;
pub use input::*;
pub use output::*;
pub use processing::*;
