use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Failure of a fire-and-forget task.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: &'static str,
    pub error: anyhow::Error,
}

/// Spawns side effects whose failure must not fail the request that caused them.
///
/// Failures are sent to a channel drained by [`log_failures`].
#[derive(Clone)]
pub struct BestEffort {
    failures: mpsc::UnboundedSender<TaskFailure>,
}

impl BestEffort {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        let (failures, receiver) = mpsc::unbounded_channel();
        (Self { failures }, receiver)
    }

    pub fn spawn<F>(&self, task: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let failures = self.failures.clone();
        tokio::spawn(async move {
            if let Err(error) = future.await {
                if failures.send(TaskFailure { task, error }).is_err() {
                    tracing::warn!(task, "Best-effort task failed after the error channel closed");
                }
            }
        })
    }
}

/// Drain the failure channel into the log.
pub fn log_failures(mut receiver: mpsc::UnboundedReceiver<TaskFailure>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = receiver.recv().await {
            tracing::warn!(task = failure.task, "Best-effort task failed: {:#}", failure.error);
        }
    })
}
