//! Node descriptor trait and schema types
//!
//! A node type describes its ports once, in a [`NodeSchema`]. The validator
//! checks graphs against the schema and the executor uses it to decide which
//! inputs are lazy, which defaults apply, and how many outputs to expect.

use serde::{Deserialize, Serialize};

use crate::types::PortDataType;

/// Trait for node implementations that can describe their schema
///
/// # Example
///
/// ```ignore
/// impl NodeDescriptor for AddNode {
///     fn descriptor() -> NodeSchema {
///         NodeSchema::new("add", NodeCategory::Math)
///             .input(InputPort::required("a", PortDataType::Int))
///             .input(InputPort::required("b", PortDataType::Int))
///             .output(OutputPort::new("sum", PortDataType::Int))
///     }
/// }
/// ```
pub trait NodeDescriptor {
    /// Get the static schema for this node type
    fn descriptor() -> NodeSchema
    where
        Self: Sized;
}

/// Category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Model, checkpoint and constant loaders
    Loader,
    /// Samplers and other heavy processing
    Sampling,
    /// Text and conditioning encoders
    Conditioning,
    /// Image operations
    Image,
    /// Scalar math and text utilities
    Math,
    /// Control flow (switches, loops)
    Control,
    /// Output sinks (save, preview)
    Output,
}

/// Complete schema for a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchema {
    /// Unique type identifier (e.g., "add")
    pub node_type: String,
    /// Category for grouping
    pub category: NodeCategory,
    /// Human-readable label
    pub label: String,
    /// Description of what the node does
    pub description: String,
    /// Input port definitions
    pub inputs: Vec<InputPort>,
    /// Output port definitions, in slot order
    pub outputs: Vec<OutputPort>,
    /// Output nodes are realized when no explicit outputs are requested
    #[serde(default)]
    pub is_output_node: bool,
    /// Volatile nodes are never served from a previous run's cache
    #[serde(default)]
    pub volatile: bool,
}

impl NodeSchema {
    /// Create a schema with no ports
    pub fn new(node_type: impl Into<String>, category: NodeCategory) -> Self {
        let node_type = node_type.into();
        Self {
            label: node_type.clone(),
            node_type,
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            is_output_node: false,
            volatile: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append an input port
    pub fn input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    /// Append an output port
    pub fn output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    /// Mark this node type as an output node
    pub fn output_node(mut self) -> Self {
        self.is_output_node = true;
        self
    }

    /// Mark this node type as volatile
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Look up an input port by name
    pub fn find_input(&self, id: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.id == id)
    }

    /// Whether the named input is declared lazy
    pub fn is_lazy(&self, id: &str) -> bool {
        self.find_input(id).map(|p| p.lazy).unwrap_or(false)
    }
}

/// Schema of one input port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPort {
    /// Port identifier
    pub id: String,
    /// Types this port accepts
    pub accepts: Vec<PortDataType>,
    /// Whether this input must be bound
    pub required: bool,
    /// Lazy inputs are only computed when the node asks for them
    #[serde(default)]
    pub lazy: bool,
    /// Value used when an optional input is left unbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl InputPort {
    /// Create a required port accepting a single type
    pub fn required(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            accepts: vec![data_type],
            required: true,
            lazy: false,
            default_value: None,
        }
    }

    /// Create an optional port accepting a single type
    pub fn optional(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            required: false,
            ..Self::required(id, data_type)
        }
    }

    /// Accept an additional type
    pub fn or_accept(mut self, data_type: PortDataType) -> Self {
        self.accepts.push(data_type);
        self
    }

    /// Mark this port lazy
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Set a default value for this port
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Whether a value of `data_type` may flow into this port
    pub fn accepts_type(&self, data_type: &PortDataType) -> bool {
        self.accepts.iter().any(|t| data_type.is_compatible_with(t))
    }
}

/// Schema of one output slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPort {
    /// Slot name
    pub id: String,
    /// Produced type
    pub data_type: PortDataType,
}

impl OutputPort {
    pub fn new(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
        }
    }
}
