//! Core types for workflow graphs
//!
//! These types define the graph model: nodes, their typed input bindings,
//! and the edges derived from those bindings. A graph is owned by one run
//! and only mutated by that run's executor (see [`crate::expansion`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NodeEngineError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an input port
pub type PortId = String;

/// The data type of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any type
    Any,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// Text string
    String,
    /// Boolean value
    Boolean,
    /// JSON object
    Json,
    /// Image batch
    Image,
    /// Single-channel mask
    Mask,
    /// Latent-space tensor
    Latent,
    /// Reference to a loaded diffusion model
    Model,
    /// Reference to a loaded text encoder
    Clip,
    /// Reference to a loaded autoencoder
    Vae,
    /// Encoded conditioning
    Conditioning,
}

impl PortDataType {
    /// Check if a value of this type can flow into a port of `other` type
    pub fn is_compatible_with(&self, other: &PortDataType) -> bool {
        // Any type is compatible with everything
        if matches!(self, PortDataType::Any) || matches!(other, PortDataType::Any) {
            return true;
        }

        // Integers widen to floats
        if matches!(self, PortDataType::Int) && matches!(other, PortDataType::Float) {
            return true;
        }

        self == other
    }
}

impl std::fmt::Display for PortDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

/// Reference to one output slot of another node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRef {
    /// Source node ID
    pub node_id: NodeId,
    /// Index into the source node's declared outputs
    pub output: usize,
}

impl OutputRef {
    pub fn new(node_id: impl Into<String>, output: usize) -> Self {
        Self {
            node_id: node_id.into(),
            output,
        }
    }
}

/// What an input port is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeInput {
    /// A constant value supplied with the graph
    Literal(serde_json::Value),
    /// The output of another node
    Link(OutputRef),
}

impl NodeInput {
    /// The upstream reference, if this input is an edge
    pub fn as_link(&self) -> Option<&OutputRef> {
        match self {
            NodeInput::Link(r) => Some(r),
            NodeInput::Literal(_) => None,
        }
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Node type (references a registered NodeSchema)
    pub node_type: String,
    /// Input bindings keyed by port name
    #[serde(default)]
    pub inputs: BTreeMap<PortId, NodeInput>,
    /// Set once this node has expanded: its outputs are aliases for these
    /// subgraph outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Vec<OutputRef>>,
}

impl GraphNode {
    /// Create a node with no inputs bound
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            inputs: BTreeMap::new(),
            expansion: None,
        }
    }

    /// Bind an input to a literal value
    pub fn with_literal(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(port.into(), NodeInput::Literal(value));
        self
    }

    /// Bind an input to another node's output
    pub fn with_link(mut self, port: impl Into<String>, node_id: impl Into<String>, output: usize) -> Self {
        self.inputs
            .insert(port.into(), NodeInput::Link(OutputRef::new(node_id, output)));
        self
    }

    /// Iterate over inputs bound to upstream outputs
    pub fn links(&self) -> impl Iterator<Item = (&PortId, &OutputRef)> {
        self.inputs
            .iter()
            .filter_map(|(port, input)| input.as_link().map(|r| (port, r)))
    }

    /// Every upstream output this node reads, including expansion aliases
    pub fn upstream_refs(&self) -> impl Iterator<Item = &OutputRef> {
        self.links()
            .map(|(_, r)| r)
            .chain(self.expansion.iter().flatten())
    }
}

/// An edge derived from an input binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Source node and output slot
    pub source: OutputRef,
    /// Target node ID
    pub target: NodeId,
    /// Target input port
    pub target_port: PortId,
}

/// A complete workflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// Nodes in the graph, in submission order
    pub nodes: Vec<GraphNode>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    /// Find a node by ID
    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Check whether a node exists
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Add a node. Fails if the ID is already taken.
    pub fn add_node(&mut self, node: GraphNode) -> Result<()> {
        if self.contains(&node.id) {
            return Err(NodeEngineError::graph(format!(
                "Node '{}' already exists in graph '{}'",
                node.id, self.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node by ID. Inputs of other nodes that referenced it are
    /// left dangling; validation reports them.
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(pos))
    }

    /// Bind (or rebind) one input of a node
    pub fn set_input(&mut self, node_id: &str, port: impl Into<String>, input: NodeInput) -> Result<()> {
        let node = self
            .get_node_mut(node_id)
            .ok_or_else(|| NodeEngineError::graph(format!("Node '{}' not found", node_id)))?;
        node.inputs.insert(port.into(), input);
        Ok(())
    }

    /// All edges in the graph
    pub fn edges(&self) -> impl Iterator<Item = GraphEdge> + '_ {
        self.nodes.iter().flat_map(|n| {
            n.links().map(move |(port, source)| GraphEdge {
                source: source.clone(),
                target: n.id.clone(),
                target_port: port.clone(),
            })
        })
    }

    /// Get edges coming into a node
    pub fn incoming_edges(&self, node_id: &str) -> Vec<GraphEdge> {
        self.edges().filter(|e| e.target == node_id).collect()
    }

    /// Get edges going out of a node
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<GraphEdge> {
        self.edges().filter(|e| e.source.node_id == node_id).collect()
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes),
    /// in port order without duplicates
    pub fn get_dependencies(&self, node_id: &str) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = Vec::new();
        if let Some(node) = self.get_node(node_id) {
            for r in node.upstream_refs() {
                if !deps.contains(&r.node_id) {
                    deps.push(r.node_id.clone());
                }
            }
        }
        deps
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.upstream_refs().any(|r| r.node_id == node_id))
            .map(|n| n.id.clone())
            .collect()
    }
}

/// A side-channel artifact reported by a node (e.g. a file it wrote)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact kind, e.g. "image" or "text"
    pub kind: String,
    /// Location of the artifact, relative to the host's output directory
    pub path: String,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
        }
    }
}

/// The realized outputs of one node: one value per declared output slot,
/// plus any artifacts the node reported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutputs {
    pub values: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl NodeOutputs {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self {
            values,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Value in output slot `index`
    pub fn get(&self, index: usize) -> Option<&serde_json::Value> {
        self.values.get(index)
    }
}
