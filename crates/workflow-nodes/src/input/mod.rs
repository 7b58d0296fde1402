//! Input nodes
//!
//! Nodes that bring values into a graph.

mod constant;

pub use constant::ConstantNode;
