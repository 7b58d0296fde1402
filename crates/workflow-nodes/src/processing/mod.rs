//! Processing nodes
//!
//! Arithmetic and text transforms.

mod math;
mod text;

pub use math::{AddNode, MultiplyNode};
pub use text::{as_text, ConcatNode};
