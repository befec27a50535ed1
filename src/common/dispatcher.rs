//! Bounded fan-out over a batch of work items.
//!
//! A [`BoundedDispatcher`] admits at most `limit` tasks at once through a
//! counting semaphore and joins them in a shared group. Each task reports a
//! typed [`TaskError`]: ordinary failures are tallied in the [`DispatchReport`],
//! while a fatal failure cancels the group and becomes the batch error.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Outcome of a single failed task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Logged and counted; the rest of the batch carries on.
    #[error("{0}")]
    Failed(String),

    /// Cancels the whole batch.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

/// Aggregate result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub admitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
    /// Admission stopped before the item list was exhausted.
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("batch aborted by fatal task error: {message}")]
    Fatal {
        message: String,
        report: DispatchReport,
    },
}

/// One dispatcher per batch; dropped once [`BoundedDispatcher::run`] returns.
pub struct BoundedDispatcher {
    limit: usize,
    cancel: CancellationToken,
}

impl BoundedDispatcher {
    /// `parent` cancels this batch; a fatal task only cancels the batch's child token.
    pub fn new(limit: usize, parent: &CancellationToken) -> Self {
        Self {
            limit: limit.max(1),
            cancel: parent.child_token(),
        }
    }

    /// Run `task` over every item, never exceeding the concurrency limit.
    ///
    /// Returns once every admitted task has finished.
    pub async fn run<T, F, Fut>(
        self,
        items: impl IntoIterator<Item = T>,
        task: F,
    ) -> Result<DispatchReport, DispatchError>
    where
        T: Send + 'static,
        F: Fn(T, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut tasks = JoinSet::new();
        let mut report = DispatchReport::default();
        let mut fatal: Option<String> = None;

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        report.cancelled = true;
                        break;
                    }
                },
            };

            while let Some(joined) = tasks.try_join_next() {
                self.record(joined, &mut report, &mut fatal);
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.admitted += 1;
            let fut = task(item, self.cancel.clone());
            tasks.spawn(async move {
                // Released on every exit path, unwinding included.
                let _permit = permit;
                fut.await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(joined, &mut report, &mut fatal);
        }

        debug!(
            admitted = report.admitted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch finished"
        );

        match fatal {
            Some(message) => Err(DispatchError::Fatal { message, report }),
            None => Ok(report),
        }
    }

    fn record(
        &self,
        joined: Result<Result<(), TaskError>, JoinError>,
        report: &mut DispatchReport,
        fatal: &mut Option<String>,
    ) {
        match joined {
            Ok(Ok(())) => report.succeeded += 1,
            Ok(Err(TaskError::Failed(msg))) => {
                warn!("Task failed: {}", msg);
                report.failed += 1;
            }
            Ok(Err(TaskError::Fatal(msg))) => {
                error!("Task failed fatally, cancelling batch: {}", msg);
                report.failed += 1;
                self.cancel.cancel();
                fatal.get_or_insert(msg);
            }
            Err(e) => {
                error!("Task panicked: {}", e);
                report.panicked += 1;
            }
        }
    }
}
