//! Graph validation and execution planning
//!
//! Validates a graph against the registry before anything runs. Checks run
//! in a fixed order:
//!
//! 0. node ids are unique
//! 1. every required input is bound (and every reference resolves)
//! 2. every edge carries a type the destination port accepts
//! 3. the eager (non-lazy) subgraph reachable from the requested outputs is
//!    acyclic, via three-color depth-first search
//! 4. no lazy input depends on its own consumer
//!
//! All problems are collected, not just the first. On success the result is
//! an [`ExecutionPlan`]: the pruned, topologically ordered node list.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::registry::NodeRegistry;
use crate::types::{GraphNode, NodeId, NodeInput, OutputRef, PortDataType, WorkflowGraph};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationError {
    /// Two or more nodes share an id
    DuplicateNodeId { node_id: NodeId },
    /// Nothing to execute: no outputs requested and no output nodes present
    NoOutputs,
    /// A requested output node is not in the graph
    UnknownOutput { node_id: NodeId },
    /// A node has an unknown type (not in registry)
    UnknownNodeType { node_id: NodeId, node_type: String },
    /// An input references a node that does not exist
    UnknownNode {
        node_id: NodeId,
        port: String,
        missing: NodeId,
    },
    /// An input references an output slot the source does not declare
    UnknownOutputSlot {
        node_id: NodeId,
        port: String,
        source: OutputRef,
        available: usize,
    },
    /// An input is bound on a port the node type does not declare
    UnknownInputPort { node_id: NodeId, port: String },
    /// A required input is not bound and has no default
    MissingRequiredInput { node_id: NodeId, port: String },
    /// An edge connects incompatible port types
    IncompatiblePortTypes {
        node_id: NodeId,
        port: String,
        source: OutputRef,
        source_type: PortDataType,
        accepted: Vec<PortDataType>,
    },
    /// A cycle through eager inputs
    CycleDetected { node_ids: Vec<NodeId> },
    /// A lazy input that (transitively) depends on its own consumer
    LazyCycle {
        node_id: NodeId,
        port: String,
        node_ids: Vec<NodeId>,
    },
}

impl ValidationError {
    /// Reporting category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingRequiredInput { .. } | Self::IncompatiblePortTypes { .. } => {
                ErrorKind::TypeError
            }
            _ => ErrorKind::GraphError,
        }
    }

    /// Nodes this error is about
    pub fn node_ids(&self) -> Vec<&str> {
        match self {
            Self::NoOutputs => Vec::new(),
            Self::CycleDetected { node_ids } => node_ids.iter().map(String::as_str).collect(),
            Self::LazyCycle { node_ids, .. } => node_ids.iter().map(String::as_str).collect(),
            Self::DuplicateNodeId { node_id }
            | Self::UnknownOutput { node_id }
            | Self::UnknownNodeType { node_id, .. }
            | Self::UnknownNode { node_id, .. }
            | Self::UnknownOutputSlot { node_id, .. }
            | Self::UnknownInputPort { node_id, .. }
            | Self::MissingRequiredInput { node_id, .. }
            | Self::IncompatiblePortTypes { node_id, .. } => vec![node_id.as_str()],
        }
    }

    /// Port this error is about, if any
    pub fn port(&self) -> Option<&str> {
        match self {
            Self::UnknownNode { port, .. }
            | Self::UnknownOutputSlot { port, .. }
            | Self::UnknownInputPort { port, .. }
            | Self::MissingRequiredInput { port, .. }
            | Self::IncompatiblePortTypes { port, .. }
            | Self::LazyCycle { port, .. } => Some(port),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => {
                write!(f, "Node id '{}' is used by more than one node", node_id)
            }
            Self::NoOutputs => write!(f, "Graph has no output nodes to execute"),
            Self::UnknownOutput { node_id } => {
                write!(f, "Requested output '{}' is not in the graph", node_id)
            }
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::UnknownNode {
                node_id,
                port,
                missing,
            } => write!(
                f,
                "Input '{}' on node '{}' references unknown node '{}'",
                port, node_id, missing
            ),
            Self::UnknownOutputSlot {
                node_id,
                port,
                source,
                available,
            } => write!(
                f,
                "Input '{}' on node '{}' references output {} of '{}', which has {} output(s)",
                port, node_id, source.output, source.node_id, available
            ),
            Self::UnknownInputPort { node_id, port } => {
                write!(f, "Node '{}' has no input port '{}'", node_id, port)
            }
            Self::MissingRequiredInput { node_id, port } => write!(
                f,
                "Required input '{}' on node '{}' is not bound",
                port, node_id
            ),
            Self::IncompatiblePortTypes {
                node_id,
                port,
                source,
                source_type,
                accepted,
            } => {
                let accepted: Vec<String> = accepted.iter().map(|t| t.to_string()).collect();
                write!(
                    f,
                    "Input '{}' on node '{}' accepts [{}] but '{}' output {} is {}",
                    port,
                    node_id,
                    accepted.join(", "),
                    source.node_id,
                    source.output,
                    source_type
                )
            }
            Self::CycleDetected { node_ids } => {
                write!(f, "Cycle detected between nodes: {}", node_ids.join(" -> "))
            }
            Self::LazyCycle {
                node_id,
                port,
                node_ids,
            } => write!(
                f,
                "Lazy input '{}' on node '{}' depends on its own consumer ({})",
                port,
                node_id,
                node_ids.join(", ")
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// All problems found in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub errors: Vec<ValidationError>,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "Validation failed: {}", messages.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Pruned, dependency-ordered node list for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Output nodes the plan realizes
    pub outputs: Vec<NodeId>,
    /// Nodes reachable from `outputs` through eager inputs, dependencies first
    pub order: Vec<NodeId>,
}

pub type ValidationResult = std::result::Result<ExecutionPlan, ValidationFailure>;

/// Tie-break among nodes with no dependency between them
///
/// Roots and each node's inputs are visited in the order this comparator
/// sorts them (stably), which fixes the order of independent nodes in the
/// plan.
pub trait NodeOrdering: Send + Sync {
    fn compare(&self, a: &GraphNode, b: &GraphNode) -> Ordering;
}

/// Keep discovery order: requested outputs as given, inputs by port name
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryOrder;

impl NodeOrdering for DiscoveryOrder {
    fn compare(&self, _a: &GraphNode, _b: &GraphNode) -> Ordering {
        Ordering::Equal
    }
}

/// Order by node ID, numerically when both IDs are numbers
#[derive(Debug, Default, Clone, Copy)]
pub struct ByNodeId;

impl NodeOrdering for ByNodeId {
    fn compare(&self, a: &GraphNode, b: &GraphNode) -> Ordering {
        match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.id.cmp(&b.id),
        }
    }
}

/// Validates graphs against a registry
#[derive(Clone)]
pub struct Validator {
    registry: Arc<NodeRegistry>,
    ordering: Arc<dyn NodeOrdering>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl Validator {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            ordering: Arc::new(DiscoveryOrder),
        }
    }

    /// Use a different tie-break for independent nodes
    pub fn with_ordering(mut self, ordering: Arc<dyn NodeOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Validate `graph` for the requested outputs
    ///
    /// An empty request selects every node whose type is an output node.
    pub fn validate(&self, graph: &WorkflowGraph, outputs_requested: &[NodeId]) -> ValidationResult {
        // Every later check looks nodes up by id
        let duplicates = Self::duplicate_ids(graph);
        if !duplicates.is_empty() {
            return Err(ValidationFailure { errors: duplicates });
        }

        let mut errors = Vec::new();

        let outputs = self.select_outputs(graph, outputs_requested, &mut errors);
        let index: HashMap<&str, &GraphNode> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let closure = self.closure(&index, &outputs);

        for node in &closure {
            self.check_bindings(node, &index, &mut errors);
        }
        let order = self.eager_order(&index, &outputs, &closure, &mut errors);
        self.check_lazy_inputs(&index, &closure, &mut errors);

        if errors.is_empty() {
            Ok(ExecutionPlan { outputs, order })
        } else {
            Err(ValidationFailure { errors })
        }
    }

    fn duplicate_ids(graph: &WorkflowGraph) -> Vec<ValidationError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut reported: HashSet<&str> = HashSet::new();
        let mut errors = Vec::new();
        for node in &graph.nodes {
            if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        }
        errors
    }

    fn select_outputs(
        &self,
        graph: &WorkflowGraph,
        requested: &[NodeId],
        errors: &mut Vec<ValidationError>,
    ) -> Vec<NodeId> {
        let mut outputs: Vec<NodeId> = Vec::new();
        if requested.is_empty() {
            outputs = graph
                .nodes
                .iter()
                .filter(|n| {
                    self.registry
                        .get_schema(&n.node_type)
                        .map(|s| s.is_output_node)
                        .unwrap_or(false)
                })
                .map(|n| n.id.clone())
                .collect();
        } else {
            for id in requested {
                if !graph.contains(id) {
                    errors.push(ValidationError::UnknownOutput { node_id: id.clone() });
                } else if !outputs.contains(id) {
                    outputs.push(id.clone());
                }
            }
        }

        if outputs.is_empty() && errors.is_empty() {
            errors.push(ValidationError::NoOutputs);
        }
        outputs
    }

    /// Every node reachable from `roots` through any input, lazy included
    fn closure<'a>(&self, index: &HashMap<&str, &'a GraphNode>, roots: &[NodeId]) -> Vec<&'a GraphNode> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        let mut stack: Vec<&str> = roots.iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            let Some(node) = index.get(id).copied() else {
                continue;
            };
            if !seen.insert(node.id.as_str()) {
                continue;
            }
            result.push(node);
            stack.extend(node.upstream_refs().map(|r| r.node_id.as_str()));
        }
        result
    }

    /// Checks 1 and 2: bindings resolve and carry compatible types
    fn check_bindings(
        &self,
        node: &GraphNode,
        index: &HashMap<&str, &GraphNode>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(schema) = self.registry.get_schema(&node.node_type) else {
            errors.push(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
            return;
        };

        for port in &schema.inputs {
            if port.required && port.default_value.is_none() && !node.inputs.contains_key(&port.id) {
                errors.push(ValidationError::MissingRequiredInput {
                    node_id: node.id.clone(),
                    port: port.id.clone(),
                });
            }
        }

        for (port_id, input) in &node.inputs {
            let Some(port) = schema.find_input(port_id) else {
                errors.push(ValidationError::UnknownInputPort {
                    node_id: node.id.clone(),
                    port: port_id.clone(),
                });
                continue;
            };
            let NodeInput::Link(source) = input else {
                continue;
            };
            let Some(source_type) = self.source_type(node, port_id, source, index, errors) else {
                continue;
            };
            if !port.accepts_type(&source_type) {
                errors.push(ValidationError::IncompatiblePortTypes {
                    node_id: node.id.clone(),
                    port: port_id.clone(),
                    source: source.clone(),
                    source_type,
                    accepted: port.accepts.clone(),
                });
            }
        }

        for alias in node.expansion.iter().flatten() {
            self.source_type(node, "<expansion>", alias, index, errors);
        }
    }

    /// Resolve the declared type of `source`, reporting dangling references
    fn source_type(
        &self,
        node: &GraphNode,
        port: &str,
        source: &OutputRef,
        index: &HashMap<&str, &GraphNode>,
        errors: &mut Vec<ValidationError>,
    ) -> Option<PortDataType> {
        let Some(upstream) = index.get(source.node_id.as_str()) else {
            errors.push(ValidationError::UnknownNode {
                node_id: node.id.clone(),
                port: port.to_string(),
                missing: source.node_id.clone(),
            });
            return None;
        };
        // Unknown upstream types are reported on the upstream node itself
        let upstream_schema = self.registry.get_schema(&upstream.node_type)?;
        match upstream_schema.outputs.get(source.output) {
            Some(out) => Some(out.data_type),
            None => {
                errors.push(ValidationError::UnknownOutputSlot {
                    node_id: node.id.clone(),
                    port: port.to_string(),
                    source: source.clone(),
                    available: upstream_schema.outputs.len(),
                });
                None
            }
        }
    }

    fn eager_deps<'a>(&self, node: &'a GraphNode) -> Vec<&'a str> {
        let schema = self.registry.get_schema(&node.node_type);
        let mut deps: Vec<&str> = Vec::new();
        for (port, source) in node.links() {
            if schema.map(|s| s.is_lazy(port)).unwrap_or(false) {
                continue;
            }
            if !deps.contains(&source.node_id.as_str()) {
                deps.push(&source.node_id);
            }
        }
        for alias in node.expansion.iter().flatten() {
            if !deps.contains(&alias.node_id.as_str()) {
                deps.push(&alias.node_id);
            }
        }
        deps
    }

    fn sorted<'a>(&self, index: &HashMap<&str, &'a GraphNode>, ids: Vec<&str>) -> Vec<&'a str> {
        let mut nodes: Vec<&GraphNode> = ids.iter().filter_map(|id| index.get(id).copied()).collect();
        nodes.sort_by(|a, b| self.ordering.compare(a, b));
        nodes.into_iter().map(|n| n.id.as_str()).collect()
    }

    /// Check 3: three-color DFS over eager inputs.
    ///
    /// Post-order from the requested outputs gives the plan. Nodes only
    /// reachable through lazy inputs are walked too (from each lazy source)
    /// so cycles among them are caught, but they stay out of the plan.
    fn eager_order<'a>(
        &self,
        index: &HashMap<&str, &'a GraphNode>,
        outputs: &[NodeId],
        closure: &[&'a GraphNode],
        errors: &mut Vec<ValidationError>,
    ) -> Vec<NodeId> {
        let mut marks: HashMap<&'a str, Mark> = HashMap::new();
        let mut order = Vec::new();

        let roots = self.sorted(index, outputs.iter().map(String::as_str).collect());
        for root in roots {
            self.visit(index, root, &mut marks, Some(&mut order), errors);
        }

        for &node in closure {
            let schema = self.registry.get_schema(&node.node_type);
            for (port, source) in node.links() {
                if schema.map(|s| s.is_lazy(port)).unwrap_or(false) {
                    self.visit(index, &source.node_id, &mut marks, None, errors);
                }
            }
        }
        order
    }

    fn visit<'a>(
        &self,
        index: &HashMap<&str, &'a GraphNode>,
        root: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        mut order: Option<&mut Vec<NodeId>>,
        errors: &mut Vec<ValidationError>,
    ) {
        if marks.contains_key(root) || !index.contains_key(root) {
            return;
        }

        // Explicit stack of (node, children, next child index)
        let mut stack: Vec<(&'a str, Vec<&'a str>, usize)> = Vec::new();
        marks.insert(root, Mark::InProgress);
        let children = self.sorted(index, self.eager_deps(index[root]));
        stack.push((root, children, 0));

        while let Some((id, children, next)) = stack.last_mut() {
            let id: &'a str = *id;
            if *next >= children.len() {
                marks.insert(id, Mark::Done);
                if let Some(order) = order.as_deref_mut() {
                    order.push(id.to_string());
                }
                stack.pop();
                continue;
            }
            let child: &'a str = children[*next];
            *next += 1;

            match marks.get(child) {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|(n, _, _)| *n == child).unwrap_or(0);
                    let node_ids = stack[start..].iter().map(|(n, _, _)| n.to_string()).collect();
                    errors.push(ValidationError::CycleDetected { node_ids });
                }
                None => {
                    marks.insert(child, Mark::InProgress);
                    let grandchildren = self.sorted(index, self.eager_deps(index[child]));
                    stack.push((child, grandchildren, 0));
                }
            }
        }
    }

    /// Check 4: a lazy input's source must not reach back to its consumer
    fn check_lazy_inputs(
        &self,
        index: &HashMap<&str, &GraphNode>,
        closure: &[&GraphNode],
        errors: &mut Vec<ValidationError>,
    ) {
        for node in closure {
            let Some(schema) = self.registry.get_schema(&node.node_type) else {
                continue;
            };
            for (port, source) in node.links() {
                if !schema.is_lazy(port) {
                    continue;
                }
                if source.node_id == node.id || reaches(index, &source.node_id, &node.id) {
                    errors.push(ValidationError::LazyCycle {
                        node_id: node.id.clone(),
                        port: port.clone(),
                        node_ids: vec![node.id.clone(), source.node_id.clone()],
                    });
                }
            }
        }
    }
}

/// Whether `target` is upstream of `start` through any input
fn reaches(index: &HashMap<&str, &GraphNode>, start: &str, target: &str) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(node) = index.get(id) else {
            continue;
        };
        for r in node.upstream_refs() {
            if r.node_id == target {
                return true;
            }
            stack.push(&r.node_id);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::descriptor::{InputPort, NodeCategory, NodeSchema, OutputPort};
    use serde_json::json;

    fn make_test_registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::new();
        registry.register_schema(
            NodeSchema::new("constant", NodeCategory::Loader)
                .input(InputPort::required("value", PortDataType::Int))
                .output(OutputPort::new("value", PortDataType::Int)),
        );
        registry.register_schema(
            NodeSchema::new("add1", NodeCategory::Math)
                .input(InputPort::required("value", PortDataType::Int))
                .output(OutputPort::new("value", PortDataType::Int)),
        );
        registry.register_schema(
            NodeSchema::new("text", NodeCategory::Loader)
                .input(InputPort::optional("text", PortDataType::String).with_default(json!("")))
                .output(OutputPort::new("text", PortDataType::String)),
        );
        registry.register_schema(
            NodeSchema::new("switch", NodeCategory::Control)
                .input(InputPort::required("select", PortDataType::Boolean).or_accept(PortDataType::Int))
                .input(InputPort::optional("on_true", PortDataType::Any).lazy())
                .input(InputPort::optional("on_false", PortDataType::Any).lazy())
                .output(OutputPort::new("value", PortDataType::Any)),
        );
        registry.register_schema(
            NodeSchema::new("preview", NodeCategory::Output)
                .input(InputPort::required("value", PortDataType::Any))
                .output_node(),
        );
        Arc::new(registry)
    }

    fn validator() -> Validator {
        Validator::new(make_test_registry())
    }

    fn ids(v: &[&str]) -> Vec<NodeId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_graph_orders_dependencies_first() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("c", "add1")
            .link("value", "b", 0)
            .add_node("b", "add1")
            .link("value", "a", 0)
            .add_node("a", "constant")
            .literal("value", json!(5))
            .build();

        let plan = validator().validate(&graph, &ids(&["c"])).unwrap();
        assert_eq!(plan.order, ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_duplicate_node_ids_rejected_first() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("A", "constant")
            .literal("value", json!(1))
            .add_node("A", "constant")
            .literal("value", json!(2))
            .add_node("A", "constant")
            .literal("value", json!(3))
            .add_node("B", "add1")
            .link("value", "A", 0)
            .build();

        let failure = validator().validate(&graph, &ids(&["B"])).unwrap_err();
        assert_eq!(
            failure.errors,
            vec![ValidationError::DuplicateNodeId {
                node_id: "A".to_string()
            }]
        );
        assert_eq!(failure.errors[0].kind(), ErrorKind::GraphError);
        assert_eq!(failure.errors[0].node_ids(), vec!["A"]);
    }

    #[test]
    fn test_prunes_unrequested_nodes() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "constant")
            .literal("value", json!(1))
            .add_node("b", "add1")
            .link("value", "a", 0)
            .add_node("p", "preview")
            .link("value", "a", 0)
            .build();

        let plan = validator().validate(&graph, &ids(&["b"])).unwrap();
        assert_eq!(plan.order, ids(&["a", "b"]));

        // No explicit request falls back to output nodes
        let plan = validator().validate(&graph, &[]).unwrap();
        assert_eq!(plan.outputs, ids(&["p"]));
        assert_eq!(plan.order, ids(&["a", "p"]));
    }

    #[test]
    fn test_no_outputs() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "constant")
            .literal("value", json!(1))
            .build();
        let failure = validator().validate(&graph, &[]).unwrap_err();
        assert_eq!(failure.errors, vec![ValidationError::NoOutputs]);
    }

    #[test]
    fn test_detect_cycle_names_both_nodes() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "add1")
            .link("value", "b", 0)
            .add_node("b", "add1")
            .link("value", "a", 0)
            .build();

        let failure = validator().validate(&graph, &ids(&["a"])).unwrap_err();
        let cycle = failure
            .errors
            .iter()
            .find(|e| matches!(e, ValidationError::CycleDetected { .. }))
            .expect("cycle error");
        assert_eq!(cycle.kind(), ErrorKind::GraphError);
        let mut names = cycle.node_ids();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_required_input() {
        let graph = WorkflowBuilder::new("wf").add_node("b", "add1").build();
        let failure = validator().validate(&graph, &ids(&["b"])).unwrap_err();
        assert_eq!(
            failure.errors,
            vec![ValidationError::MissingRequiredInput {
                node_id: "b".to_string(),
                port: "value".to_string()
            }]
        );
        assert_eq!(failure.errors[0].kind(), ErrorKind::TypeError);
        assert_eq!(failure.errors[0].port(), Some("value"));
    }

    #[test]
    fn test_default_satisfies_optional_input() {
        let graph = WorkflowBuilder::new("wf").add_node("t", "text").build();
        assert!(validator().validate(&graph, &ids(&["t"])).is_ok());
    }

    #[test]
    fn test_incompatible_port_types() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("t", "text")
            .add_node("b", "add1")
            .link("value", "t", 0)
            .build();

        let failure = validator().validate(&graph, &ids(&["b"])).unwrap_err();
        assert!(matches!(
            &failure.errors[0],
            ValidationError::IncompatiblePortTypes { node_id, source_type: PortDataType::String, .. } if node_id == "b"
        ));
    }

    #[test]
    fn test_dangling_references() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "constant")
            .literal("value", json!(1))
            .add_node("b", "add1")
            .link("value", "a", 3)
            .add_node("c", "add1")
            .link("value", "ghost", 0)
            .add_node("d", "nope")
            .build();

        let failure = validator()
            .validate(&graph, &ids(&["b", "c", "d", "zzz"]))
            .unwrap_err();
        let rules: Vec<&ValidationError> = failure.errors.iter().collect();
        assert!(rules.iter().any(|e| matches!(e, ValidationError::UnknownOutput { node_id } if node_id == "zzz")));
        assert!(rules.iter().any(|e| matches!(e, ValidationError::UnknownOutputSlot { available: 1, .. })));
        assert!(rules.iter().any(|e| matches!(e, ValidationError::UnknownNode { missing, .. } if missing == "ghost")));
        assert!(rules.iter().any(|e| matches!(e, ValidationError::UnknownNodeType { .. })));
    }

    #[test]
    fn test_unknown_input_port() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "constant")
            .literal("value", json!(1))
            .literal("extra", json!(2))
            .build();
        let failure = validator().validate(&graph, &ids(&["a"])).unwrap_err();
        assert!(matches!(&failure.errors[0], ValidationError::UnknownInputPort { port, .. } if port == "extra"));
    }

    #[test]
    fn test_lazy_inputs_stay_out_of_plan() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("yes", "constant")
            .literal("value", json!(1))
            .add_node("no", "constant")
            .literal("value", json!(2))
            .add_node("s", "switch")
            .literal("select", json!(true))
            .link("on_true", "yes", 0)
            .link("on_false", "no", 0)
            .build();

        let plan = validator().validate(&graph, &ids(&["s"])).unwrap();
        assert_eq!(plan.order, ids(&["s"]));
    }

    #[test]
    fn test_lazy_cycle_rejected() {
        // s lazily reads a, and a eagerly reads s
        let graph = WorkflowBuilder::new("wf")
            .add_node("s", "switch")
            .literal("select", json!(true))
            .link("on_true", "a", 0)
            .add_node("a", "add1")
            .link("value", "s", 0)
            .build();

        let failure = validator().validate(&graph, &ids(&["s"])).unwrap_err();
        assert!(failure
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::LazyCycle { node_id, port, .. } if node_id == "s" && port == "on_true")));
    }

    #[test]
    fn test_cycle_behind_lazy_input_detected() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("s", "switch")
            .literal("select", json!(true))
            .link("on_true", "x", 0)
            .add_node("x", "add1")
            .link("value", "y", 0)
            .add_node("y", "add1")
            .link("value", "x", 0)
            .build();

        let failure = validator().validate(&graph, &ids(&["s"])).unwrap_err();
        assert!(failure
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected { .. })));
    }

    #[test]
    fn test_ordering_comparator() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("10", "constant")
            .literal("value", json!(1))
            .add_node("9", "constant")
            .literal("value", json!(2))
            .build();

        let discovery = validator().validate(&graph, &ids(&["10", "9"])).unwrap();
        assert_eq!(discovery.order, ids(&["10", "9"]));

        let by_id = validator()
            .with_ordering(Arc::new(ByNodeId))
            .validate(&graph, &ids(&["10", "9"]))
            .unwrap();
        assert_eq!(by_id.order, ids(&["9", "10"]));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let graph = WorkflowBuilder::new("wf")
            .add_node("a", "unknown-type-1")
            .add_node("b", "add1")
            .build();

        let failure = validator().validate(&graph, &ids(&["a", "b"])).unwrap_err();
        assert_eq!(failure.errors.len(), 2);
        assert!(failure.to_string().starts_with("Validation failed"));
    }
}
