//! Control nodes
//!
//! Branching and runtime graph expansion.

mod repeat;
mod switch;

pub use repeat::RepeatAddNode;
pub use switch::SwitchNode;
