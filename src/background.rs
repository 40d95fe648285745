//! Best-effort side effects run off the request path.
//!
//! Failures are logged and published on a channel; they never reach the
//! caller whose request triggered the task.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTask {
    SnapshotPersist,
    AggregateRefresh,
    HistoryInvalidation,
}

impl BackgroundTask {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SnapshotPersist => "snapshot_persist",
            Self::AggregateRefresh => "aggregate_refresh",
            Self::HistoryInvalidation => "history_invalidation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEffortFailure {
    pub task: BackgroundTask,
    pub message: String,
}

pub struct BackgroundTasks {
    failures: mpsc::UnboundedSender<BestEffortFailure>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    /// The receiver may be dropped; failures are still logged.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BestEffortFailure>) {
        let (failures, receiver) = mpsc::unbounded_channel();
        let tasks = Self {
            failures,
            in_flight: Mutex::new(Vec::new()),
        };
        (tasks, receiver)
    }

    pub fn spawn<F>(&self, task: BackgroundTask, work: F)
    where
        F: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let failures = self.failures.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = work.await {
                tracing::warn!(task = task.label(), error = %err, "best-effort task failed");
                let _ = failures.send(BestEffortFailure {
                    task,
                    message: err.to_string(),
                });
            }
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    /// Waits for every task spawned so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.in_flight.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "best-effort task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failures_are_published_not_returned() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn(BackgroundTask::SnapshotPersist, async {
            Err(StoreError::Unavailable("history offline".to_string()))
        });
        tasks.spawn(BackgroundTask::AggregateRefresh, async { Ok(()) });
        tasks.flush().await;

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.task, BackgroundTask::SnapshotPersist);
        assert!(failure.message.contains("history offline"));
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_break_spawning() {
        let (tasks, failures) = BackgroundTasks::new();
        drop(failures);
        tasks.spawn(BackgroundTask::HistoryInvalidation, async {
            Err(StoreError::Corrupt("bad rank".to_string()))
        });
        tasks.flush().await;
    }
}
