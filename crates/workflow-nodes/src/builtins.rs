//! Built-in node registration
//!
//! Hosts call [`register_builtin_nodes`] at startup, then merge in their own
//! node types.

use std::path::PathBuf;
use std::sync::Arc;

use node_engine::{NodeDescriptor, NodeRegistry};

use crate::control::{RepeatAddNode, SwitchNode};
use crate::input::ConstantNode;
use crate::output::{PreviewNode, SaveTextNode};
use crate::processing::{AddNode, ConcatNode, MultiplyNode};

/// Register every built-in node type
///
/// `output_dir` is where `save-text` writes its files.
///
/// # Example
///
/// ```ignore
/// let mut registry = NodeRegistry::new();
/// workflow_nodes::register_builtin_nodes(&mut registry, "output");
/// registry.merge(plugin_registry);
/// ```
pub fn register_builtin_nodes(registry: &mut NodeRegistry, output_dir: impl Into<PathBuf>) {
    registry.register(ConstantNode::descriptor(), Arc::new(ConstantNode));
    registry.register(AddNode::descriptor(), Arc::new(AddNode));
    registry.register(MultiplyNode::descriptor(), Arc::new(MultiplyNode));
    registry.register(ConcatNode::descriptor(), Arc::new(ConcatNode));
    registry.register(SwitchNode::descriptor(), Arc::new(SwitchNode));
    registry.register(RepeatAddNode::descriptor(), Arc::new(RepeatAddNode));
    registry.register(PreviewNode::descriptor(), Arc::new(PreviewNode));
    registry.register(
        SaveTextNode::descriptor(),
        Arc::new(SaveTextNode::new(output_dir)),
    );
    log::debug!("Registered {} built-in node type(s)", registry.node_types().len());
}

/// A registry holding only the built-in node types
pub fn builtin_registry(output_dir: impl Into<PathBuf>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_builtin_nodes(&mut registry, output_dir);
    registry
}
