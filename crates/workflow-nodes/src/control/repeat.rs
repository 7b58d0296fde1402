//! Repeat node
//!
//! Adds `step` to `value` `times` times by expanding into a chain of `add`
//! nodes. The chain's last node becomes this node's output.

use async_trait::async_trait;
use node_engine::{
    GraphNode, InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError,
    NodeExecutor, NodeInputs, NodeOutcome, NodeSchema, OutputPort, PortDataType, Result, Subgraph,
};
use serde_json::json;

use crate::processing::AddNode;

/// Expands into `times` chained `add` nodes
pub struct RepeatAddNode;

impl RepeatAddNode {
    pub const NODE_TYPE: &'static str = "repeat-add";
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_STEP: &'static str = "step";
    pub const PORT_TIMES: &'static str = "times";
    /// Upper bound on the chain length
    pub const MAX_TIMES: i64 = 1024;

    /// Local ID of the `i`th step in the expansion
    pub fn step_id(i: i64) -> String {
        format!("step{}", i)
    }

    fn chain(times: i64) -> Subgraph {
        let mut subgraph = Subgraph::new()
            .expose_input(Self::PORT_VALUE, Self::step_id(0), "a")
            .expose_input(Self::PORT_STEP, Self::step_id(0), "b");
        for i in 0..times {
            let mut node = GraphNode::new(Self::step_id(i), AddNode::NODE_TYPE);
            if i > 0 {
                node = node.with_link("a", Self::step_id(i - 1), 0);
                subgraph = subgraph.expose_input(Self::PORT_STEP, Self::step_id(i), "b");
            }
            subgraph = subgraph.with_node(node);
        }
        subgraph.expose_output(Self::step_id(times - 1), 0)
    }
}

impl NodeDescriptor for RepeatAddNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Control)
            .with_label("Repeat Add")
            .with_description("Adds a step to a value a number of times")
            .input(InputPort::required(Self::PORT_VALUE, PortDataType::Int).or_accept(PortDataType::Float))
            .input(
                InputPort::optional(Self::PORT_STEP, PortDataType::Int)
                    .or_accept(PortDataType::Float)
                    .with_default(json!(1)),
            )
            .input(InputPort::optional(Self::PORT_TIMES, PortDataType::Int).with_default(json!(1)))
            .output(OutputPort::new(Self::PORT_VALUE, PortDataType::Float))
    }
}

#[async_trait]
impl NodeExecutor for RepeatAddNode {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let times = inputs
            .get(Self::PORT_TIMES)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| NodeEngineError::failed(ctx.node_id(), "Input 'times' must be an integer"))?;
        if times > Self::MAX_TIMES {
            return Err(NodeEngineError::failed(
                ctx.node_id(),
                format!("Input 'times' is {}, at most {} allowed", times, Self::MAX_TIMES),
            ));
        }

        if times <= 0 {
            let value = inputs.get(Self::PORT_VALUE).cloned().ok_or_else(|| {
                NodeEngineError::failed(ctx.node_id(), "Missing required input 'value'")
            })?;
            return Ok(NodeOutcome::values(vec![value]));
        }

        log::debug!("{}: expanding into {} add node(s)", ctx.node_id(), times);
        Ok(NodeOutcome::Expand(Self::chain(times)))
    }
}
