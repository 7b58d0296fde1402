//! Single worker loop
//!
//! Takes one run at a time from the queue and executes it to completion.

use std::sync::Arc;

use node_engine::Engine;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::PromptQueue;

/// Consumes a [`PromptQueue`] with one [`Engine`]
///
/// # Usage
///
/// ```ignore
/// let queue = Arc::new(PromptQueue::new(&config.queue));
/// let shutdown = CancellationToken::new();
/// let handle = PromptWorker::new(queue.clone(), engine).spawn(shutdown.clone());
///
/// let submission = queue.submit(prompt, 0)?;
/// let report = queue.wait_for(&submission.run_id).await;
///
/// shutdown.cancel();
/// handle.await?;
/// ```
pub struct PromptWorker {
    queue: Arc<PromptQueue>,
    engine: Arc<Engine>,
}

impl PromptWorker {
    pub fn new(queue: Arc<PromptQueue>, engine: Arc<Engine>) -> Self {
        Self { queue, engine }
    }

    /// Run the loop on the current runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Execute queued runs until `shutdown` fires
    ///
    /// Shutdown also cancels the run in progress, which stops at its next
    /// node boundary and is recorded as cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("Prompt worker started");
        loop {
            let started = loop {
                if shutdown.is_cancelled() {
                    log::info!("Prompt worker stopped");
                    return;
                }
                if let Some(started) = self.queue.start_next(shutdown.child_token()) {
                    break started;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = self.queue.available() => {}
                }
            };

            let run_id = started.prompt.run_id.clone();
            let report = self
                .engine
                .execute_tracked(started.prompt, started.cancel, &started.status)
                .await;
            log::debug!("Run '{}' finished: {}", run_id, report.status);
            self.queue.finish(report);
        }
    }
}
