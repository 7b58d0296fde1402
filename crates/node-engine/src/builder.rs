//! Fluent builder for workflow graphs
//!
//! Provides a fluent API for constructing graphs programmatically.

use crate::error::Result;
use crate::types::{GraphNode, NodeInput, OutputRef, WorkflowGraph};

/// Fluent builder for constructing workflow graphs
///
/// # Example
///
/// ```ignore
/// let graph = WorkflowBuilder::new("wf-1")
///     .add_node("a", "constant")
///     .literal("value", json!(5))
///     .add_node("b", "add")
///     .link("a", "a", 0)
///     .literal("b", json!(1))
///     .build();
/// ```
pub struct WorkflowBuilder {
    id: String,
    nodes: Vec<GraphNode>,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    /// Add a node to the graph
    pub fn add_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.nodes.push(GraphNode::new(id, node_type));
        self
    }

    /// Bind a literal on the most recently added node
    ///
    /// Must be called after `add_node`.
    pub fn literal(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.inputs.insert(port.into(), NodeInput::Literal(value));
        }
        self
    }

    /// Bind an input of the most recently added node to `source`'s output slot
    ///
    /// The source may be added later.
    pub fn link(mut self, port: impl Into<String>, source: impl Into<String>, output: usize) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.inputs
                .insert(port.into(), NodeInput::Link(OutputRef::new(source, output)));
        }
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(self.id);
        graph.nodes = self.nodes;
        graph
    }

    /// Build the graph, rejecting duplicate node IDs
    pub fn try_build(self) -> Result<WorkflowGraph> {
        let mut graph = WorkflowGraph::new(self.id);
        for node in self.nodes {
            graph.add_node(node)?;
        }
        Ok(graph)
    }
}
