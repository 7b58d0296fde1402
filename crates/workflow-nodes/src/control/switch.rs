//! Switch node
//!
//! Picks one of two lazy branches by `condition`. Only the chosen branch is
//! ever computed.

use async_trait::async_trait;
use node_engine::{
    InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError, NodeExecutor,
    NodeInputs, NodeOutcome, NodeSchema, OutputPort, PortDataType, PortId, Result,
};

/// Routes `on_true` or `on_false` to its output
pub struct SwitchNode;

impl SwitchNode {
    pub const NODE_TYPE: &'static str = "switch";
    pub const PORT_CONDITION: &'static str = "condition";
    pub const PORT_ON_TRUE: &'static str = "on_true";
    pub const PORT_ON_FALSE: &'static str = "on_false";
    pub const PORT_VALUE: &'static str = "value";

    fn branch(inputs: &NodeInputs) -> Option<&'static str> {
        inputs
            .get(Self::PORT_CONDITION)
            .and_then(|v| v.as_bool())
            .map(|c| if c { Self::PORT_ON_TRUE } else { Self::PORT_ON_FALSE })
    }
}

impl NodeDescriptor for SwitchNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Control)
            .with_label("Switch")
            .with_description("Passes through one of two inputs, computing only that one")
            .input(InputPort::required(Self::PORT_CONDITION, PortDataType::Boolean))
            .input(InputPort::optional(Self::PORT_ON_TRUE, PortDataType::Any).lazy())
            .input(InputPort::optional(Self::PORT_ON_FALSE, PortDataType::Any).lazy())
            .output(OutputPort::new(Self::PORT_VALUE, PortDataType::Any))
    }
}

#[async_trait]
impl NodeExecutor for SwitchNode {
    fn check_lazy_status(&self, _ctx: &NodeContext, inputs: &NodeInputs, pending: &[PortId]) -> Vec<PortId> {
        match Self::branch(inputs) {
            Some(port) => pending.iter().filter(|p| *p == port).cloned().collect(),
            // A bad condition fails in execute; nothing is worth computing
            None => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let port = Self::branch(&inputs).ok_or_else(|| {
            NodeEngineError::failed(ctx.node_id(), "Input 'condition' must be a boolean")
        })?;
        let value = inputs.get(port).cloned().ok_or_else(|| {
            NodeEngineError::failed(ctx.node_id(), format!("Selected input '{}' is unbound", port))
        })?;
        log::debug!("{}: routed '{}'", ctx.node_id(), port);
        Ok(NodeOutcome::values(vec![value]))
    }
}
