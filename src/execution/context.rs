//! # Task Lifecycle Context
//!
//! Shared collaborators every worker (and the timeout sweeper) resolves tasks through,
//! together with the resolution steps themselves: persist with retry, complete,
//! retry-or-fail and requeue.
//!
//! Status transitions are written before anything observable happens (results,
//! progress, notifications, requeue). A write rejected because the task already became terminal
//! means an operator cancelled it concurrently; cancellation wins and the attempt's
//! outcome is discarded.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::AnalysisEngine;
use crate::config::WorkerConfig;
use crate::error::{AnalysisError, Result};
use crate::events::Notifier;
use crate::logging::{log_error, log_task_operation};
use crate::models::{AnalysisProgress, AnalysisResult, AnalysisTask};
use crate::progress::ProgressTracker;
use crate::queue::TaskQueue;
use crate::repository::{ResultRepository, TaskRepository};
use crate::resilience::RetryPolicy;

use super::in_flight::InFlightRegistry;

/// How a failed attempt was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Sent back to `pending`; it re-enters the queue after `delay`
    Retrying { retry_count: u32, delay: Duration },
    /// Terminal `failed` with a failure result recorded
    Failed,
    /// The task turned terminal underneath us (operator cancel); nothing recorded
    Superseded,
}

/// How a successful attempt was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    Superseded,
    /// Result or status could not be written even after retries
    PersistFailed,
}

#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn TaskQueue>,
    pub progress: Arc<dyn ProgressTracker>,
    pub tasks: Arc<dyn TaskRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub notifier: Arc<Notifier>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub engine: Arc<dyn AnalysisEngine>,
    pub in_flight: Arc<InFlightRegistry>,
    pub config: WorkerConfig,
    /// Root token; cancelled on process shutdown
    pub shutdown: CancellationToken,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("engine", &self.engine.name())
            .field("retry_policy", &self.retry_policy)
            .field("in_flight", &self.in_flight.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn is_superseded(error: &AnalysisError) -> bool {
    // repositories reject writes to terminal tasks with InvalidArgument
    matches!(error, AnalysisError::InvalidArgument(_))
}

impl WorkerContext {
    /// Run a persistence write, retrying infrastructure failures
    pub async fn persist<F, Fut>(&self, operation: &str, task_id: &str, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.config.persist_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        task_id = %task_id,
                        operation = %operation,
                        attempt,
                        error = %e,
                        "Persistence write failed, retrying"
                    );
                    tokio::time::sleep(self.config.persist_retry_delay()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Store a progress report and fan it out to progress callbacks
    pub async fn report_progress(&self, task_id: &str, stage: &str, percent: u8, message: String) {
        let progress = AnalysisProgress::new(task_id, stage, percent, message);
        self.store_progress(&progress).await;
        self.notifier.notify_progress(&progress);
    }

    /// Store a progress report without notifying; terminal states notify on their own
    pub async fn store_progress(&self, progress: &AnalysisProgress) {
        if let Err(e) = self
            .progress
            .update_progress(&progress.task_id, progress.clone())
            .await
        {
            // advisory only
            warn!(task_id = %progress.task_id, error = %e, "Failed to store progress");
        }
    }

    /// Record a successful attempt: status, result, progress, then callbacks
    pub async fn complete(
        &self,
        mut task: AnalysisTask,
        mut result: AnalysisResult,
        elapsed: Duration,
        worker_id: Option<&str>,
    ) -> CompletionOutcome {
        if let Err(e) = task.mark_completed() {
            warn!(task_id = %task.id, error = %e, "Completed attempt for a terminal task");
            return CompletionOutcome::Superseded;
        }
        match self
            .persist("mark_completed", &task.id, || self.tasks.update(&task))
            .await
        {
            Ok(()) => {}
            Err(e) if is_superseded(&e) => {
                info!(task_id = %task.id, "Task was cancelled while its attempt finished");
                return CompletionOutcome::Superseded;
            }
            Err(e) => {
                log_error(
                    "worker_context",
                    "mark_completed",
                    &e.to_string(),
                    Some(&format!("task_id={}", task.id)),
                );
                return CompletionOutcome::PersistFailed;
            }
        }

        result.bind_to(&task, elapsed);
        let mut outcome = CompletionOutcome::Completed;
        if let Err(e) = self
            .persist("store_result", &task.id, || self.results.create(&result))
            .await
        {
            log_error(
                "worker_context",
                "store_result",
                &e.to_string(),
                Some(&format!("task_id={}", task.id)),
            );
            outcome = CompletionOutcome::PersistFailed;
        }

        self.store_progress(&AnalysisProgress::new(
            &task.id,
            "completed",
            100,
            "analysis completed",
        ))
        .await;
        self.notifier.notify_completed(&task, &result);
        log_task_operation(
            "complete",
            &task.id,
            worker_id,
            "completed",
            Some(&format!("processing_time_ms={}", elapsed.as_millis())),
        );
        outcome
    }

    /// Route a failed attempt through the retry policy
    pub async fn resolve_failure(
        &self,
        mut task: AnalysisTask,
        error: AnalysisError,
        elapsed: Duration,
        worker_id: Option<&str>,
    ) -> Result<FailureOutcome> {
        if self.retry_policy.should_retry(&task, &error) && task.has_retries_left() {
            // delay is a function of the retries used so far
            let delay = self.retry_policy.get_retry_delay(&task);
            task.prepare_retry()?;
            match self
                .persist("schedule_retry", &task.id, || self.tasks.update(&task))
                .await
            {
                Ok(()) => {}
                Err(e) if is_superseded(&e) => return Ok(FailureOutcome::Superseded),
                Err(e) => return Err(e),
            }

            let retry_count = task.retry_count;
            info!(
                task_id = %task.id,
                retry_count,
                max_retries = task.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "🔄 Scheduling retry"
            );
            self.report_progress(
                &task.id,
                "retrying",
                0,
                format!(
                    "attempt {retry_count} failed ({}): {error}; retrying in {}ms",
                    error.category(),
                    delay.as_millis()
                ),
            )
            .await;
            self.requeue(task, delay).await;
            return Ok(FailureOutcome::Retrying { retry_count, delay });
        }

        if let Err(e) = task.mark_failed() {
            debug!(task_id = %task.id, error = %e, "Failed attempt for a terminal task");
            return Ok(FailureOutcome::Superseded);
        }
        match self
            .persist("mark_failed", &task.id, || self.tasks.update(&task))
            .await
        {
            Ok(()) => {}
            Err(e) if is_superseded(&e) => return Ok(FailureOutcome::Superseded),
            Err(e) => return Err(e),
        }

        let failure = AnalysisResult::failure(&task, error.to_string(), elapsed);
        if let Err(e) = self
            .persist("store_failure", &task.id, || self.results.create(&failure))
            .await
        {
            log_error(
                "worker_context",
                "store_failure",
                &e.to_string(),
                Some(&format!("task_id={}", task.id)),
            );
        }
        self.store_progress(&AnalysisProgress::new(
            &task.id,
            "failed",
            100,
            error.to_string(),
        ))
        .await;
        self.notifier.notify_failed(&task, &error);
        log_task_operation(
            "fail",
            &task.id,
            worker_id,
            "failed",
            Some(&format!("retries={} error={error}", task.retry_count)),
        );
        Ok(FailureOutcome::Failed)
    }

    /// Return an abandoned attempt to `pending` without consuming a retry
    pub async fn requeue_abandoned(&self, mut task: AnalysisTask) -> Result<()> {
        task.reset_to_pending();
        match self
            .persist("requeue", &task.id, || self.tasks.update(&task))
            .await
        {
            Ok(()) => {}
            Err(e) if is_superseded(&e) => return Ok(()),
            Err(e) => return Err(e),
        }
        self.report_progress(&task.id, "queued", 0, "attempt abandoned, requeued".to_string())
            .await;
        self.requeue(task, Duration::ZERO).await;
        Ok(())
    }

    /// Push a `pending` task back on the queue after `delay`. A rejected push is
    /// retried every poll interval until it lands or the engine shuts down; a task
    /// given up on stays `pending` for the stranded-task sweep.
    pub async fn requeue(&self, task: AnalysisTask, delay: Duration) {
        if delay.is_zero() {
            match self.queue.push(task.clone()).await {
                Ok(()) => return,
                Err(AnalysisError::InvalidTask(reason)) => {
                    debug!(task_id = %task.id, reason = %reason, "Requeue not needed");
                    return;
                }
                Err(e) => warn!(task_id = %task.id, error = %e, "Requeue rejected, retrying in background"),
            }
        }

        let hold = self.in_flight.hold_requeue(&task.id);
        let queue = Arc::clone(&self.queue);
        let shutdown = self.shutdown.clone();
        let retry_interval = self.config.poll_interval();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // push now so the task is not lost with the timer
                _ = shutdown.cancelled() => {}
            }
            push_until_accepted(queue.as_ref(), task, retry_interval, &shutdown).await;
            drop(hold);
        });
    }
}

/// Keep pushing until the queue takes the task; false when shutdown cut it short
async fn push_until_accepted(
    queue: &dyn TaskQueue,
    task: AnalysisTask,
    retry_interval: Duration,
    shutdown: &CancellationToken,
) -> bool {
    let mut attempt: u32 = 1;
    loop {
        match queue.push(task.clone()).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(task_id = %task.id, attempt, "🔄 Retried task requeued");
                }
                return true;
            }
            // already queued again, or finished in the meantime
            Err(AnalysisError::InvalidTask(reason)) => {
                debug!(task_id = %task.id, reason = %reason, "Requeue not needed");
                return true;
            }
            Err(e) => {
                log_error(
                    "worker_context",
                    "requeue",
                    &e.to_string(),
                    Some(&format!("task_id={} attempt={attempt}", task.id)),
                );
                if shutdown.is_cancelled() {
                    warn!(task_id = %task.id, "Shutting down, task left pending for recovery");
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(retry_interval) => {}
                    _ = shutdown.cancelled() => {}
                }
                attempt += 1;
            }
        }
    }
}
