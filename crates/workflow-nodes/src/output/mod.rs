//! Output nodes
//!
//! Nodes whose results a run is for. An empty output selection runs all of
//! them.

mod preview;
mod save_text;

pub use preview::PreviewNode;
pub use save_text::SaveTextNode;
