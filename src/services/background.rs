use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

const FAILURE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub label: String,
    pub reason: String,
}

/// Spawns best-effort work that runs after a transaction has committed.
///
/// A failing or panicking task never reaches the caller; it is reported to a
/// single sink task that logs it and counts it.
#[derive(Clone)]
pub struct BackgroundTasks {
    failures: mpsc::Sender<TaskFailure>,
    failed: Arc<AtomicU64>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (failures, mut rx) = mpsc::channel::<TaskFailure>(FAILURE_BUFFER);
        tokio::spawn(async move {
            while let Some(failure) = rx.recv().await {
                error!(task = %failure.label, reason = %failure.reason, "background task failed");
            }
        });
        Self {
            failures,
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The returned handle resolves once the task has finished and any failure
    /// has been recorded.
    pub fn spawn<F>(&self, label: impl Into<String>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let failures = self.failures.clone();
        let failed = Arc::clone(&self.failed);
        let handle = tokio::spawn(task);

        tokio::spawn(async move {
            let reason = match handle.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{:#}", e),
                Err(join) if join.is_panic() => "task panicked".to_string(),
                Err(join) => join.to_string(),
            };
            failed.fetch_add(1, Ordering::Relaxed);
            let failure = TaskFailure { label, reason };
            if let Err(mpsc::error::TrySendError::Full(failure) | mpsc::error::TrySendError::Closed(failure)) =
                failures.try_send(failure)
            {
                error!(task = %failure.label, reason = %failure.reason, "background task failed (sink unavailable)");
            }
        })
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
