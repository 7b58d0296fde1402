//! Constant node
//!
//! Emits its literal `value` input unchanged. The usual way to feed values
//! into a graph.

use async_trait::async_trait;
use node_engine::{
    InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError, NodeExecutor,
    NodeInputs, NodeOutcome, NodeSchema, OutputPort, PortDataType, Result,
};

/// Emits `value`
pub struct ConstantNode;

impl ConstantNode {
    pub const NODE_TYPE: &'static str = "constant";
    pub const PORT_VALUE: &'static str = "value";
}

impl NodeDescriptor for ConstantNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Loader)
            .with_label("Constant")
            .with_description("Emits a literal value")
            .input(InputPort::required(Self::PORT_VALUE, PortDataType::Any))
            .output(OutputPort::new(Self::PORT_VALUE, PortDataType::Any))
    }
}

#[async_trait]
impl NodeExecutor for ConstantNode {
    async fn execute(&self, ctx: &NodeContext, mut inputs: NodeInputs) -> Result<NodeOutcome> {
        let value = inputs.remove(Self::PORT_VALUE).ok_or_else(|| {
            NodeEngineError::failed(ctx.node_id(), "Missing required input 'value'")
        })?;
        Ok(NodeOutcome::values(vec![value]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_engine::NullEventSink;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_descriptor() {
        let schema = ConstantNode::descriptor();
        assert_eq!(schema.node_type, "constant");
        assert_eq!(schema.category, NodeCategory::Loader);
        assert_eq!(schema.inputs.len(), 1);
        assert_eq!(schema.outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_emits_value() {
        let ctx = NodeContext::new("run", "c", Arc::new(NullEventSink));
        let inputs = NodeInputs::from([("value".to_string(), json!({"a": 1}))]);
        match ConstantNode.execute(&ctx, inputs).await.unwrap() {
            NodeOutcome::Outputs(out) => assert_eq!(out.values, vec![json!({"a": 1})]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_value() {
        let ctx = NodeContext::new("run", "c", Arc::new(NullEventSink));
        let err = ConstantNode.execute(&ctx, NodeInputs::new()).await.unwrap_err();
        assert!(matches!(err, NodeEngineError::NodeExecution { .. }));
    }
}
