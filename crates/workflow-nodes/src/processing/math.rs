//! Arithmetic nodes
//!
//! `add` and `multiply` keep integers as integers when both operands are
//! integers and fall back to floating point otherwise.

use async_trait::async_trait;
use node_engine::{
    InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError, NodeExecutor,
    NodeInputs, NodeOutcome, NodeSchema, OutputPort, PortDataType, Result,
};
use serde_json::{json, Value};

pub const PORT_A: &str = "a";
pub const PORT_B: &str = "b";
pub const PORT_RESULT: &str = "result";

fn number_port(id: &str) -> InputPort {
    InputPort::required(id, PortDataType::Int).or_accept(PortDataType::Float)
}

fn operand<'a>(ctx: &NodeContext, inputs: &'a NodeInputs, port: &str) -> Result<&'a Value> {
    let value = inputs
        .get(port)
        .ok_or_else(|| NodeEngineError::failed(ctx.node_id(), format!("Missing input '{}'", port)))?;
    if value.is_number() {
        Ok(value)
    } else {
        Err(NodeEngineError::failed(
            ctx.node_id(),
            format!("Input '{}' must be a number, got {}", port, value),
        ))
    }
}

/// Apply `int_op` when both sides are integers and it does not overflow,
/// `float_op` otherwise
fn combine(
    ctx: &NodeContext,
    inputs: &NodeInputs,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let a = operand(ctx, inputs, PORT_A)?;
    let b = operand(ctx, inputs, PORT_B)?;

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(r) = int_op(x, y) {
            return Ok(json!(r));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(float_op(x, y))),
        _ => Err(NodeEngineError::failed(ctx.node_id(), "Operands are not representable as numbers")),
    }
}

/// `result = a + b`; `b` defaults to 1
pub struct AddNode;

impl AddNode {
    pub const NODE_TYPE: &'static str = "add";
}

impl NodeDescriptor for AddNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Math)
            .with_label("Add")
            .with_description("Adds two numbers")
            .input(number_port(PORT_A))
            .input(
                InputPort::optional(PORT_B, PortDataType::Int)
                    .or_accept(PortDataType::Float)
                    .with_default(json!(1)),
            )
            .output(OutputPort::new(PORT_RESULT, PortDataType::Float))
    }
}

#[async_trait]
impl NodeExecutor for AddNode {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let sum = combine(ctx, &inputs, i64::checked_add, |x, y| x + y)?;
        log::debug!("{}: sum = {}", ctx.node_id(), sum);
        Ok(NodeOutcome::values(vec![sum]))
    }
}

/// `result = a * b`; `b` defaults to 2
pub struct MultiplyNode;

impl MultiplyNode {
    pub const NODE_TYPE: &'static str = "multiply";
}

impl NodeDescriptor for MultiplyNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Math)
            .with_label("Multiply")
            .with_description("Multiplies two numbers")
            .input(number_port(PORT_A))
            .input(
                InputPort::optional(PORT_B, PortDataType::Int)
                    .or_accept(PortDataType::Float)
                    .with_default(json!(2)),
            )
            .output(OutputPort::new(PORT_RESULT, PortDataType::Float))
    }
}

#[async_trait]
impl NodeExecutor for MultiplyNode {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let product = combine(ctx, &inputs, i64::checked_mul, |x, y| x * y)?;
        Ok(NodeOutcome::values(vec![product]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_engine::NullEventSink;
    use std::sync::Arc;

    fn ctx() -> NodeContext {
        NodeContext::new("run", "math", Arc::new(NullEventSink))
    }

    fn inputs(a: Value, b: Value) -> NodeInputs {
        NodeInputs::from([(PORT_A.to_string(), a), (PORT_B.to_string(), b)])
    }

    async fn first(node: &dyn NodeExecutor, inputs: NodeInputs) -> Value {
        match node.execute(&ctx(), inputs).await.unwrap() {
            NodeOutcome::Outputs(out) => out.values[0].clone(),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_integer_arithmetic_stays_integer() {
        assert_eq!(first(&AddNode, inputs(json!(5), json!(1))).await, json!(6));
        assert_eq!(first(&MultiplyNode, inputs(json!(6), json!(2))).await, json!(12));
    }

    #[tokio::test]
    async fn test_mixed_operands_use_floats() {
        assert_eq!(first(&AddNode, inputs(json!(1), json!(0.5))).await, json!(1.5));
    }

    #[tokio::test]
    async fn test_overflow_falls_back_to_float() {
        let value = first(&AddNode, inputs(json!(i64::MAX), json!(1))).await;
        assert!(value.is_f64());
    }

    #[tokio::test]
    async fn test_non_number_rejected() {
        let err = AddNode
            .execute(&ctx(), inputs(json!("five"), json!(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_defaults() {
        let add = AddNode::descriptor();
        assert_eq!(add.find_input(PORT_B).and_then(|p| p.default_value.clone()), Some(json!(1)));
        let mul = MultiplyNode::descriptor();
        assert_eq!(mul.find_input(PORT_B).and_then(|p| p.default_value.clone()), Some(json!(2)));
    }
}
