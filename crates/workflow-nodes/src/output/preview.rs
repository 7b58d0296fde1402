//! Preview node
//!
//! An output node that passes its input through so the value appears in the
//! run report.

use async_trait::async_trait;
use node_engine::{
    InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError, NodeExecutor,
    NodeInputs, NodeOutcome, NodeSchema, OutputPort, PortDataType, Result,
};

pub struct PreviewNode;

impl PreviewNode {
    pub const NODE_TYPE: &'static str = "preview";
    pub const PORT_VALUE: &'static str = "value";
}

impl NodeDescriptor for PreviewNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Output)
            .with_label("Preview")
            .with_description("Shows a value in the run results")
            .input(InputPort::required(Self::PORT_VALUE, PortDataType::Any))
            .output(OutputPort::new(Self::PORT_VALUE, PortDataType::Any))
            .output_node()
    }
}

#[async_trait]
impl NodeExecutor for PreviewNode {
    async fn execute(&self, ctx: &NodeContext, mut inputs: NodeInputs) -> Result<NodeOutcome> {
        let value = inputs.remove(Self::PORT_VALUE).ok_or_else(|| {
            NodeEngineError::failed(ctx.node_id(), "Missing required input 'value'")
        })?;
        Ok(NodeOutcome::values(vec![value]))
    }
}
