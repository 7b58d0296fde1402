//! Run-time subgraph expansion
//!
//! A node may answer an invocation with a [`Subgraph`] instead of outputs.
//! The subgraph is spliced into the run's graph: its node IDs are namespaced
//! under the expanding node, its exposed inputs are bound to whatever the
//! expanding node's inputs were bound to, and the expanding node's outputs
//! become aliases for the subgraph's exposed outputs.
//!
//! # Example
//!
//! ```ignore
//! // "repeat" unrolls one multiply step and feeds the parent's `value` into it
//! let sub = Subgraph::new()
//!     .with_node(GraphNode::new("step", "multiply").with_literal("b", json!(2)))
//!     .expose_input("value", "step", "a")
//!     .expose_output("step", 0);
//! graph.expand("repeat-1", sub)?; // adds "repeat-1.step"
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{NodeEngineError, Result};
use crate::types::{GraphNode, NodeId, NodeInput, OutputRef, PortId, WorkflowGraph};

/// A graph fragment produced by a node at run time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    /// Nodes with IDs local to the subgraph
    pub nodes: Vec<GraphNode>,
    /// Parent inputs forwarded into subgraph nodes
    pub exposed_inputs: Vec<InputMapping>,
    /// Subgraph outputs that replace the parent's outputs, by slot
    pub exposed_outputs: Vec<OutputRef>,
}

/// Forwards one input of the expanding node into a subgraph node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    /// Input port on the expanding node
    pub parent_port: PortId,
    /// Local ID of the receiving subgraph node
    pub internal_node_id: NodeId,
    /// Input port on the receiving subgraph node
    pub internal_port_id: PortId,
}

impl Subgraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Forward the parent's `parent_port` into `node_id.port`
    pub fn expose_input(
        mut self,
        parent_port: impl Into<String>,
        node_id: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.exposed_inputs.push(InputMapping {
            parent_port: parent_port.into(),
            internal_node_id: node_id.into(),
            internal_port_id: port.into(),
        });
        self
    }

    /// Expose `node_id`'s output slot as the parent's next output slot
    pub fn expose_output(mut self, node_id: impl Into<String>, output: usize) -> Self {
        self.exposed_outputs.push(OutputRef::new(node_id, output));
        self
    }

    /// Local node IDs
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

/// ID a subgraph node receives once spliced under `parent`
pub fn namespaced_id(parent: &str, local: &str) -> NodeId {
    format!("{}.{}", parent, local)
}

impl WorkflowGraph {
    /// Splice `subgraph` into the graph in place of `node_id`'s own
    /// computation.
    ///
    /// Returns the namespaced IDs of the inserted nodes, in subgraph order.
    /// The graph is left unchanged when this fails.
    pub fn expand(&mut self, node_id: &str, subgraph: Subgraph) -> Result<Vec<NodeId>> {
        let parent = self
            .get_node(node_id)
            .ok_or_else(|| NodeEngineError::graph(format!("Cannot expand unknown node '{}'", node_id)))?;
        if parent.expansion.is_some() {
            return Err(NodeEngineError::graph(format!(
                "Node '{}' has already been expanded",
                node_id
            )));
        }
        let parent_inputs = parent.inputs.clone();

        let local: HashSet<&str> = subgraph.nodes.iter().map(|n| n.id.as_str()).collect();
        if local.len() != subgraph.nodes.len() {
            return Err(NodeEngineError::graph(format!(
                "Expansion of '{}' contains duplicate node IDs",
                node_id
            )));
        }

        let rebind = |r: &OutputRef| -> Result<OutputRef> {
            if local.contains(r.node_id.as_str()) {
                Ok(OutputRef::new(namespaced_id(node_id, &r.node_id), r.output))
            } else if self.contains(&r.node_id) {
                Ok(r.clone())
            } else {
                Err(NodeEngineError::graph(format!(
                    "Expansion of '{}' references unknown node '{}'",
                    node_id, r.node_id
                )))
            }
        };

        let mut inserted: Vec<GraphNode> = Vec::with_capacity(subgraph.nodes.len());
        for node in &subgraph.nodes {
            let mut spliced = GraphNode::new(namespaced_id(node_id, &node.id), node.node_type.clone());
            for (port, input) in &node.inputs {
                let input = match input {
                    NodeInput::Link(r) => NodeInput::Link(rebind(r)?),
                    literal => literal.clone(),
                };
                spliced.inputs.insert(port.clone(), input);
            }
            if self.contains(&spliced.id) {
                return Err(NodeEngineError::graph(format!(
                    "Expansion of '{}' collides with existing node '{}'",
                    node_id, spliced.id
                )));
            }
            inserted.push(spliced);
        }

        for mapping in &subgraph.exposed_inputs {
            if !local.contains(mapping.internal_node_id.as_str()) {
                return Err(NodeEngineError::graph(format!(
                    "Expansion of '{}' exposes input into unknown subgraph node '{}'",
                    node_id, mapping.internal_node_id
                )));
            }
            // Unbound optional parent inputs stay unbound inside the subgraph
            let Some(binding) = parent_inputs.get(&mapping.parent_port) else {
                continue;
            };
            let target_id = namespaced_id(node_id, &mapping.internal_node_id);
            if let Some(target) = inserted.iter_mut().find(|n| n.id == target_id) {
                target
                    .inputs
                    .insert(mapping.internal_port_id.clone(), binding.clone());
            }
        }

        let aliases = subgraph
            .exposed_outputs
            .iter()
            .map(rebind)
            .collect::<Result<Vec<_>>>()?;

        let inserted_ids: Vec<NodeId> = inserted.iter().map(|n| n.id.clone()).collect();
        self.nodes.extend(inserted);
        if let Some(parent) = self.get_node_mut(node_id) {
            parent.expansion = Some(aliases);
        }

        if self.reaches(node_id, node_id) {
            self.nodes.retain(|n| !inserted_ids.contains(&n.id));
            if let Some(parent) = self.get_node_mut(node_id) {
                parent.expansion = None;
            }
            return Err(NodeEngineError::graph(format!(
                "Expansion of '{}' would introduce a cycle",
                node_id
            )));
        }

        log::debug!(
            "Expanded '{}' into {} node(s): {:?}",
            node_id,
            inserted_ids.len(),
            inserted_ids
        );
        Ok(inserted_ids)
    }

    /// Whether `target` is reachable upstream from `start`'s inputs
    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut stack: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        if let Some(node) = self.get_node(start) {
            stack.extend(node.upstream_refs().map(|r| r.node_id.as_str()));
        }
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.get_node(id) {
                stack.extend(node.upstream_refs().map(|r| r.node_id.as_str()));
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("g");
        graph
            .add_node(GraphNode::new("src", "constant").with_literal("value", json!(3)))
            .unwrap();
        graph
            .add_node(GraphNode::new("rep", "repeat").with_link("value", "src", 0))
            .unwrap();
        graph
            .add_node(GraphNode::new("out", "preview").with_link("value", "rep", 0))
            .unwrap();
        graph
    }

    #[test]
    fn test_expand_rebinds_inputs_and_outputs() {
        let mut graph = make_graph();
        let sub = Subgraph::new()
            .with_node(GraphNode::new("x", "multiply").with_literal("b", json!(2)))
            .with_node(GraphNode::new("y", "add").with_link("a", "x", 0).with_literal("b", json!(1)))
            .expose_input("value", "x", "a")
            .expose_output("y", 0);

        let ids = graph.expand("rep", sub).unwrap();
        assert_eq!(ids, vec!["rep.x", "rep.y"]);

        let x = graph.get_node("rep.x").unwrap();
        assert_eq!(x.inputs["a"], NodeInput::Link(OutputRef::new("src", 0)));
        let y = graph.get_node("rep.y").unwrap();
        assert_eq!(y.inputs["a"], NodeInput::Link(OutputRef::new("rep.x", 0)));

        let rep = graph.get_node("rep").unwrap();
        assert_eq!(rep.expansion, Some(vec![OutputRef::new("rep.y", 0)]));
        assert_eq!(graph.get_dependencies("rep"), vec!["src", "rep.y"]);
    }

    #[test]
    fn test_expand_rejects_cycle() {
        let mut graph = make_graph();
        // The subgraph reads the expanding node's own output
        let sub = Subgraph::new()
            .with_node(GraphNode::new("loop", "add").with_link("a", "rep", 0))
            .expose_output("loop", 0);

        let err = graph.expand("rep", sub).unwrap_err();
        assert!(matches!(err, NodeEngineError::Graph(ref m) if m.contains("cycle")));
        assert!(!graph.contains("rep.loop"));
        assert!(graph.get_node("rep").unwrap().expansion.is_none());
    }

    #[test]
    fn test_expand_rejects_unknown_reference() {
        let mut graph = make_graph();
        let sub = Subgraph::new()
            .with_node(GraphNode::new("x", "add").with_link("a", "nowhere", 0))
            .expose_output("x", 0);
        assert!(graph.expand("rep", sub).is_err());
        assert_eq!(graph.nodes.len(), 3);
    }

    #[test]
    fn test_expand_twice_fails() {
        let mut graph = make_graph();
        let sub = || {
            Subgraph::new()
                .with_node(GraphNode::new("x", "constant").with_literal("value", json!(1)))
                .expose_output("x", 0)
        };
        graph.expand("rep", sub()).unwrap();
        assert!(graph.expand("rep", sub()).is_err());
    }

    #[test]
    fn test_unbound_parent_input_stays_unbound() {
        let mut graph = make_graph();
        let sub = Subgraph::new()
            .with_node(GraphNode::new("x", "add"))
            .expose_input("missing_port", "x", "a")
            .expose_output("x", 0);
        graph.expand("rep", sub).unwrap();
        assert!(graph.get_node("rep.x").unwrap().inputs.is_empty());
    }
}
