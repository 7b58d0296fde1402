//! Save Text node
//!
//! Writes its text input to a file under the host's output directory and
//! reports the file as an artifact.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use node_engine::{
    Artifact, InputPort, NodeCategory, NodeContext, NodeDescriptor, NodeEngineError,
    NodeExecutor, NodeInputs, NodeOutcome, NodeOutputs, NodeSchema, OutputPort, PortDataType,
    Result,
};
use serde_json::json;

use crate::processing::as_text;

/// Writes `text` to `<output_dir>/<prefix>_<counter>.txt`
pub struct SaveTextNode {
    output_dir: PathBuf,
    counter: AtomicU64,
}

impl SaveTextNode {
    pub const NODE_TYPE: &'static str = "save-text";
    pub const PORT_TEXT: &'static str = "text";
    pub const PORT_PREFIX: &'static str = "filename_prefix";
    pub const PORT_PATH: &'static str = "path";

    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }
}

impl NodeDescriptor for SaveTextNode {
    fn descriptor() -> NodeSchema {
        NodeSchema::new(Self::NODE_TYPE, NodeCategory::Output)
            .with_label("Save Text")
            .with_description("Writes text to a file in the output directory")
            .input(InputPort::required(Self::PORT_TEXT, PortDataType::String).or_accept(PortDataType::Any))
            .input(InputPort::optional(Self::PORT_PREFIX, PortDataType::String).with_default(json!("output")))
            .output(OutputPort::new(Self::PORT_PATH, PortDataType::String))
            .output_node()
    }
}

#[async_trait]
impl NodeExecutor for SaveTextNode {
    async fn execute(&self, ctx: &NodeContext, inputs: NodeInputs) -> Result<NodeOutcome> {
        let text = inputs
            .get(Self::PORT_TEXT)
            .map(as_text)
            .ok_or_else(|| NodeEngineError::failed(ctx.node_id(), "Missing required input 'text'"))?;
        let prefix = inputs
            .get(Self::PORT_PREFIX)
            .and_then(|v| v.as_str())
            .unwrap_or("output");
        if prefix.contains(['/', '\\']) || prefix.contains("..") {
            return Err(NodeEngineError::failed(
                ctx.node_id(),
                format!("Invalid filename prefix '{}'", prefix),
            ));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let (file_name, path) = loop {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let file_name = format!("{}_{:05}.txt", prefix, n);
            let path = self.output_dir.join(&file_name);
            if !tokio::fs::try_exists(&path).await? {
                break (file_name, path);
            }
        };
        tokio::fs::write(&path, text.as_bytes()).await?;
        ctx.progress(1, 1);
        log::info!("{}: wrote {} byte(s) to {:?}", ctx.node_id(), text.len(), path);

        let outputs = NodeOutputs::new(vec![json!(file_name)]).with_artifact(Artifact::new("text", file_name));
        Ok(NodeOutcome::Outputs(outputs))
    }
}
