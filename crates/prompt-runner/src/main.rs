//! Prompt runner
//!
//! Loads engine configuration and prompt files, runs the prompts through a
//! queue with the built-in nodes, and prints each run's report as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use node_engine::{Engine, EngineConfig, LogEventSink, NodeId, Prompt, WorkflowGraph};
use prompt_queue::{PromptQueue, PromptWorker};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Run node graphs incrementally with a shared output cache
#[derive(Parser)]
#[command(name = "prompt-runner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); missing means defaults
    #[arg(long, global = true, default_value = "engine.json")]
    config: PathBuf,

    /// Directory output nodes write files to
    #[arg(long, global = true, default_value = "output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run prompt files in priority order
    Run {
        /// Prompt files (JSON)
        #[arg(required = true)]
        prompts: Vec<PathBuf>,

        /// Submit every prompt this many times; later rounds hit the cache
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Log node lifecycle events
        #[arg(long)]
        events: bool,

        /// Print cache statistics when done
        #[arg(long)]
        stats: bool,
    },

    /// List the available node types
    Nodes,
}

/// On-disk prompt: a graph plus what to compute
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFile {
    #[serde(default)]
    run_id: Option<String>,
    graph: WorkflowGraph,
    #[serde(default)]
    outputs: Vec<NodeId>,
    #[serde(default)]
    priority: i32,
}

impl PromptFile {
    fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt file {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing prompt file {}", path.display()))
    }

    /// Prompt for submission `round` (0-based)
    fn prompt(&self, round: usize) -> Prompt {
        let mut prompt = Prompt::new(self.graph.clone()).with_outputs(self.outputs.iter().cloned());
        if let Some(run_id) = &self.run_id {
            prompt = match round {
                0 => prompt.with_run_id(run_id.clone()),
                n => prompt.with_run_id(format!("{}-{}", run_id, n)),
            };
        }
        prompt
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(workflow_nodes::builtin_registry(&cli.output_dir));

    match cli.command {
        Commands::Nodes => {
            let mut schemas = registry.all_schemas();
            schemas.sort_by(|a, b| a.node_type.cmp(&b.node_type));
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            Ok(())
        }
        Commands::Run {
            prompts,
            repeat,
            events,
            stats,
        } => {
            let config = EngineConfig::load(&cli.config)
                .await
                .with_context(|| format!("loading config {}", cli.config.display()))?;
            log::info!(
                "Cache strategy {:?}, output directory {}",
                config.cache.strategy,
                cli.output_dir.display()
            );

            let mut engine = Engine::from_config(registry, &config);
            if events {
                engine = engine.with_event_sink(Arc::new(LogEventSink));
            }
            let engine = Arc::new(engine);
            run_prompts(engine, &config, &prompts, repeat, stats).await
        }
    }
}

async fn run_prompts(
    engine: Arc<Engine>,
    config: &EngineConfig,
    paths: &[PathBuf],
    repeat: usize,
    stats: bool,
) -> Result<()> {
    let files = paths
        .iter()
        .map(|p| PromptFile::load(p))
        .collect::<Result<Vec<_>>>()?;

    let queue = Arc::new(PromptQueue::new(&config.queue));
    let shutdown = CancellationToken::new();
    let worker = PromptWorker::new(queue.clone(), engine.clone()).spawn(shutdown.clone());

    let mut run_ids = Vec::new();
    for round in 0..repeat.max(1) {
        for file in &files {
            let submission = queue.submit(file.prompt(round), file.priority)?;
            run_ids.push(submission.run_id);
        }
    }

    let mut unfinished = 0;
    for run_id in &run_ids {
        let report = tokio::select! {
            report = queue.wait_for(run_id) => report,
            _ = tokio::signal::ctrl_c() => {
                log::warn!("Interrupted, cancelling remaining runs");
                interrupt(&queue, run_id);
                queue.wait_for(run_id).await
            }
        };
        let report = report.with_context(|| format!("run '{}' left the queue without a report", run_id))?;
        if !report.is_success() {
            unfinished += 1;
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    shutdown.cancel();
    worker.await.context("prompt worker panicked")?;

    if stats {
        eprintln!("{}", serde_json::to_string_pretty(&engine.cache().stats())?);
    }
    if unfinished > 0 {
        anyhow::bail!("{} of {} run(s) did not complete", unfinished, run_ids.len());
    }
    Ok(())
}

/// Drop every queued run and cancel `run_id`
///
/// `run_id` may already be gone (cleared with the pending runs, or just
/// finished); that is only worth a debug line.
fn interrupt(queue: &PromptQueue, run_id: &str) {
    queue.clear_pending();
    if let Err(e) = queue.cancel(run_id) {
        log::debug!("Run '{}' not cancelled: {}", run_id, e);
    }
}
