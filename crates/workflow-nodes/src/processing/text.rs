//! Text nodes

use async_trait::async_trait;
use node_engine::{
    InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeExecutor, NodeInputs, NodeOutcome,
    NodeSchema, OutputPort, PortDataType, Result,
};
use serde_json::{json, Value};

/// Render a value as text: strings as-is, everything else as JSON
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Joins `a` and `b` with `separator`
pub struct ConcatNode;

impl ConcatNode {
    pub const NODE_TYPE: &'static str = "concat";
    pub const PORT_A: &'static str = "a";
    pub const PORT_B: &'static str = "b";
    pub const PORT_SEPARATOR: &'static str = "separator";
    pub const PORT_TEXT: &'static str = "text";
}

impl NodeDescriptor for ConcatNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Math)
            .with_label("Concatenate")
            .with_description("Joins two values as text")
            .input(InputPort::required(Self::PORT_A, PortDataType::String).or_accept(PortDataType::Any))
            .input(InputPort::required(Self::PORT_B, PortDataType::String).or_accept(PortDataType::Any))
            .input(InputPort::optional(Self::PORT_SEPARATOR, PortDataType::String).with_default(json!("")))
            .output(OutputPort::new(Self::PORT_TEXT, PortDataType::String))
    }
}

#[async_trait]
impl NodeExecutor for ConcatNode {
    async fn execute(&self, _ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let part = |port: &str| inputs.get(port).map(as_text).unwrap_or_default();
        let text = format!(
            "{}{}{}",
            part(Self::PORT_A),
            part(Self::PORT_SEPARATOR),
            part(Self::PORT_B)
        );
        Ok(NodeOutcome::values(vec![json!(text)]))
    }
}
