//! Pending runs, the running run, and a bounded history of finished runs
//!
//! Pending runs are dequeued by priority (higher first), then by submission
//! number (lower first). Only one run is running at a time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use node_engine::{ExecutionReport, Prompt, QueueConfig, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, Result};

/// Receipt for a submitted prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub run_id: String,
    /// Monotonic submission number
    pub number: u64,
}

/// What `cancel` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was still pending and has been dropped
    Removed,
    /// The run is executing; it stops at the next node boundary
    Signalled,
}

/// One row of a queue snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub run_id: String,
    pub number: u64,
    pub priority: i32,
    pub status: RunStatus,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub running: Option<QueueEntry>,
    /// Pending runs in the order they will be dequeued
    pub pending: Vec<QueueEntry>,
}

struct Pending {
    number: u64,
    priority: i32,
    prompt: Prompt,
}

impl Pending {
    fn entry(&self) -> QueueEntry {
        QueueEntry {
            run_id: self.prompt.run_id.clone(),
            number: self.number,
            priority: self.priority,
            status: RunStatus::Queued,
        }
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.number.cmp(&self.number))
    }
}

struct Running {
    entry: QueueEntry,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
}

#[derive(Default)]
struct QueueState {
    next_number: u64,
    pending: BinaryHeap<Pending>,
    running: Option<Running>,
    history: VecDeque<ExecutionReport>,
}

impl QueueState {
    fn knows(&self, run_id: &str) -> bool {
        self.pending.iter().any(|p| p.prompt.run_id == run_id)
            || self.running.as_ref().map(|r| r.entry.run_id == run_id).unwrap_or(false)
            || self.history.iter().any(|r| r.run_id == run_id)
    }

    fn record(&mut self, report: ExecutionReport, max_history: usize) {
        self.history.push_back(report);
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

/// A run handed to the worker
pub(crate) struct StartedRun {
    pub prompt: Prompt,
    pub cancel: CancellationToken,
    pub status: watch::Sender<RunStatus>,
}

/// Report for a run that was cancelled before it started
fn cancelled_report(prompt: &Prompt) -> ExecutionReport {
    ExecutionReport {
        run_id: prompt.run_id.clone(),
        status: RunStatus::Cancelled,
        outputs: HashMap::new(),
        node_status: HashMap::new(),
        errors: Vec::new(),
        skipped: Vec::new(),
    }
}

/// Priority queue of prompts waiting for the worker
pub struct PromptQueue {
    state: Mutex<QueueState>,
    max_history: usize,
    available: Notify,
    finished: watch::Sender<u64>,
}

impl PromptQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::default()),
            max_history: config.max_history,
            available: Notify::new(),
            finished,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                log::error!("Prompt queue lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Queue `prompt`. Higher `priority` runs sooner.
    pub fn submit(&self, prompt: Prompt, priority: i32) -> Result<Submission> {
        let mut state = self.lock();
        if state.knows(&prompt.run_id) {
            return Err(QueueError::DuplicateRunId(prompt.run_id));
        }
        state.next_number += 1;
        let submission = Submission {
            run_id: prompt.run_id.clone(),
            number: state.next_number,
        };
        log::info!(
            "Queued run '{}' (#{}, priority {})",
            submission.run_id,
            submission.number,
            priority
        );
        state.pending.push(Pending {
            number: submission.number,
            priority,
            prompt,
        });
        drop(state);
        self.available.notify_one();
        Ok(submission)
    }

    /// Cancel a pending or running run
    pub fn cancel(&self, run_id: &str) -> Result<CancelOutcome> {
        let mut state = self.lock();

        if let Some(running) = state.running.as_ref().filter(|r| r.entry.run_id == run_id) {
            running.cancel.cancel();
            log::info!("Cancellation requested for running run '{}'", run_id);
            return Ok(CancelOutcome::Signalled);
        }

        let mut removed = None;
        state.pending.retain(|p| {
            if p.prompt.run_id == run_id {
                removed = Some(cancelled_report(&p.prompt));
                false
            } else {
                true
            }
        });
        if let Some(report) = removed {
            state.record(report, self.max_history);
            drop(state);
            self.finished.send_modify(|n| *n += 1);
            log::info!("Removed pending run '{}'", run_id);
            return Ok(CancelOutcome::Removed);
        }

        match state.history.iter().find(|r| r.run_id == run_id) {
            Some(report) => Err(QueueError::AlreadyFinished {
                run_id: run_id.to_string(),
                status: report.status,
            }),
            None => Err(QueueError::UnknownRun(run_id.to_string())),
        }
    }

    /// Drop every pending run, returning how many were dropped
    pub fn clear_pending(&self) -> usize {
        let mut state = self.lock();
        let drained: Vec<Pending> = state.pending.drain().collect();
        for pending in &drained {
            state.record(cancelled_report(&pending.prompt), self.max_history);
        }
        drop(state);
        if !drained.is_empty() {
            self.finished.send_modify(|n| *n += 1);
            log::info!("Cleared {} pending run(s)", drained.len());
        }
        drained.len()
    }

    /// Current status of `run_id`, if the queue still knows it
    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        let state = self.lock();
        if let Some(running) = state.running.as_ref().filter(|r| r.entry.run_id == run_id) {
            return Some(*running.status.borrow());
        }
        if state.pending.iter().any(|p| p.prompt.run_id == run_id) {
            return Some(RunStatus::Queued);
        }
        state
            .history
            .iter()
            .find(|r| r.run_id == run_id)
            .map(|r| r.status)
    }

    /// Terminal report of `run_id`, while it is still in history
    pub fn report(&self, run_id: &str) -> Option<ExecutionReport> {
        self.lock()
            .history
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
    }

    /// Finished runs, oldest first
    pub fn history(&self) -> Vec<ExecutionReport> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let running = state.running.as_ref().map(|r| QueueEntry {
            status: *r.status.borrow(),
            ..r.entry.clone()
        });
        let mut pending: Vec<&Pending> = state.pending.iter().collect();
        pending.sort_by(|a, b| b.cmp(a));
        QueueSnapshot {
            running,
            pending: pending.into_iter().map(Pending::entry).collect(),
        }
    }

    /// Number of pending runs
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until `run_id` is finished and return its report
    ///
    /// Returns `None` for runs the queue does not know, or whose report has
    /// already left history.
    pub async fn wait_for(&self, run_id: &str) -> Option<ExecutionReport> {
        let mut finished = self.finished.subscribe();
        loop {
            {
                let state = self.lock();
                if let Some(report) = state.history.iter().find(|r| r.run_id == run_id) {
                    return Some(report.clone());
                }
                if !state.knows(run_id) {
                    return None;
                }
            }
            if finished.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Move the next pending run to running
    pub(crate) fn start_next(&self, cancel: CancellationToken) -> Option<StartedRun> {
        let mut state = self.lock();
        if state.running.is_some() {
            return None;
        }
        let next = state.pending.pop()?;
        let (status, receiver) = watch::channel(RunStatus::Queued);
        state.running = Some(Running {
            entry: next.entry(),
            cancel: cancel.clone(),
            status: receiver,
        });
        log::debug!("Starting run '{}' (#{})", next.prompt.run_id, next.number);
        Some(StartedRun {
            prompt: next.prompt,
            cancel,
            status,
        })
    }

    /// Record the running run's report
    pub(crate) fn finish(&self, report: ExecutionReport) {
        let mut state = self.lock();
        if state
            .running
            .as_ref()
            .map(|r| r.entry.run_id == report.run_id)
            .unwrap_or(false)
        {
            state.running = None;
        }
        state.record(report, self.max_history);
        drop(state);
        self.finished.send_modify(|n| *n += 1);
    }

    /// Resolves once a run may be available
    pub(crate) async fn available(&self) {
        self.available.notified().await
    }
}

impl Default for PromptQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_engine::WorkflowGraph;

    fn prompt(run_id: &str) -> Prompt {
        Prompt::new(WorkflowGraph::new("wf")).with_run_id(run_id)
    }

    fn order(queue: &PromptQueue) -> Vec<String> {
        queue
            .queue_snapshot()
            .pending
            .into_iter()
            .map(|e| e.run_id)
            .collect()
    }

    #[test]
    fn test_priority_then_submission_order() {
        let queue = PromptQueue::default();
        queue.submit(prompt("a"), 0).unwrap();
        queue.submit(prompt("b"), 5).unwrap();
        queue.submit(prompt("c"), 0).unwrap();
        queue.submit(prompt("d"), 5).unwrap();

        assert_eq!(order(&queue), vec!["b", "d", "a", "c"]);

        let started = queue.start_next(CancellationToken::new()).unwrap();
        assert_eq!(started.prompt.run_id, "b");
        // One run at a time
        assert!(queue.start_next(CancellationToken::new()).is_none());
    }

    #[test]
    fn test_submission_numbers_increase() {
        let queue = PromptQueue::default();
        let first = queue.submit(prompt("a"), 0).unwrap();
        let second = queue.submit(prompt("b"), 0).unwrap();
        assert!(second.number > first.number);
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let queue = PromptQueue::default();
        queue.submit(prompt("a"), 0).unwrap();
        assert_eq!(
            queue.submit(prompt("a"), 0),
            Err(QueueError::DuplicateRunId("a".to_string()))
        );
    }

    #[test]
    fn test_cancel_pending_removes() {
        let queue = PromptQueue::default();
        queue.submit(prompt("a"), 0).unwrap();
        queue.submit(prompt("b"), 0).unwrap();

        assert_eq!(queue.cancel("a"), Ok(CancelOutcome::Removed));
        assert_eq!(order(&queue), vec!["b"]);
        assert_eq!(queue.status("a"), Some(RunStatus::Cancelled));
        assert!(matches!(
            queue.cancel("a"),
            Err(QueueError::AlreadyFinished { status: RunStatus::Cancelled, .. })
        ));
        assert_eq!(queue.cancel("zzz"), Err(QueueError::UnknownRun("zzz".to_string())));
    }

    #[test]
    fn test_cancel_running_signals_token() {
        let queue = PromptQueue::default();
        queue.submit(prompt("a"), 0).unwrap();
        let started = queue.start_next(CancellationToken::new()).unwrap();

        assert_eq!(queue.cancel("a"), Ok(CancelOutcome::Signalled));
        assert!(started.cancel.is_cancelled());
    }

    #[test]
    fn test_status_follows_running_run() {
        let queue = PromptQueue::default();
        queue.submit(prompt("a"), 0).unwrap();
        assert_eq!(queue.status("a"), Some(RunStatus::Queued));

        let started = queue.start_next(CancellationToken::new()).unwrap();
        started.status.send_replace(RunStatus::Running);
        assert_eq!(queue.status("a"), Some(RunStatus::Running));
        assert_eq!(
            queue.queue_snapshot().running.map(|e| e.status),
            Some(RunStatus::Running)
        );

        let mut report = cancelled_report(&started.prompt);
        report.status = RunStatus::Completed;
        queue.finish(report);
        assert_eq!(queue.status("a"), Some(RunStatus::Completed));
        assert!(queue.queue_snapshot().running.is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let queue = PromptQueue::new(&QueueConfig { max_history: 2 });
        for id in ["a", "b", "c"] {
            queue.submit(prompt(id), 0).unwrap();
        }
        assert_eq!(queue.clear_pending(), 3);
        assert!(queue.is_empty());

        let kept: Vec<String> = queue.history().into_iter().map(|r| r.run_id).collect();
        assert_eq!(kept.len(), 2);
        assert!(queue.status(&kept[0]).is_some());
    }

    #[tokio::test]
    async fn test_wait_for_sees_finish() {
        let queue = std::sync::Arc::new(PromptQueue::default());
        queue.submit(prompt("a"), 0).unwrap();
        let started = queue.start_next(CancellationToken::new()).unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for("a").await })
        };
        tokio::task::yield_now().await;

        let mut report = cancelled_report(&started.prompt);
        report.status = RunStatus::Completed;
        queue.finish(report);

        let report = waiter.await.unwrap().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert!(queue.wait_for("unknown").await.is_none());
    }
}
