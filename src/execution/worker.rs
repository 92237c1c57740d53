//! # Analysis Worker
//!
//! One independent claim/analyze/resolve loop. Each iteration blocks on the queue for
//! at most `worker.poll_interval`, so a stop request is observed within one poll.
//!
//! Two tokens shape a worker's lifetime, both children of the engine's root token:
//!
//! - `stop` ends the loop between tasks. The task in hand is always resolved first.
//! - `abort` is the parent of every attempt token. It fires on process shutdown or when
//!   a graceful stop runs out of time, and the attempt is then returned to `pending`
//!   without consuming a retry.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::AttemptContext;
use crate::constants::WorkerState;
use crate::error::{AnalysisError, Result};
use crate::logging::{log_error, log_task_operation};
use crate::models::AnalysisTask;

use super::context::{CompletionOutcome, WorkerContext};
use super::worker_status::{WorkerStats, WorkerStatus};

#[derive(Debug)]
struct WorkerInner {
    id: String,
    ctx: WorkerContext,
    stats: WorkerStats,
    stop: CancellationToken,
    abort: CancellationToken,
}

/// Keeps `loop_alive` truthful however the loop exits
struct LoopGuard(Arc<WorkerInner>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let state = if std::thread::panicking() {
            WorkerState::Error
        } else {
            WorkerState::Stopped
        };
        self.0.stats.set_state(state);
        self.0.stats.set_loop_alive(false);
    }
}

#[derive(Debug)]
pub struct AnalysisWorker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        let id = format!("analysis-worker-{}", Uuid::new_v4());
        let stop = ctx.shutdown.child_token();
        let abort = ctx.shutdown.child_token();
        Self {
            inner: Arc::new(WorkerInner {
                id,
                ctx,
                stats: WorkerStats::new(),
                stop,
                abort,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Spawn the processing loop. A worker runs once; restarts build a new worker.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if self.inner.ctx.shutdown.is_cancelled() {
            return Err(AnalysisError::InvalidArgument(format!(
                "worker {} cannot start: the analysis engine has been shut down",
                self.inner.id
            )));
        }
        if handle.is_some() || self.inner.stop.is_cancelled() {
            return Err(AnalysisError::InvalidArgument(format!(
                "worker {} has already been started",
                self.inner.id
            )));
        }

        self.inner.stats.set_state(WorkerState::Running);
        self.inner.stats.set_loop_alive(true);
        self.inner.stats.heartbeat();
        *handle = Some(tokio::spawn(Arc::clone(&self.inner).run()));

        info!(worker_id = %self.inner.id, "🚀 WORKER: Started");
        Ok(())
    }

    /// Stop after the current task resolves. If that takes longer than `timeout` the
    /// attempt is abandoned back to `pending`.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.inner.stop.cancel();
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        let joined = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    worker_id = %self.inner.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "⏱️ WORKER: Graceful stop timed out, abandoning in-flight attempt"
                );
                self.inner.abort.cancel();
                match tokio::time::timeout(self.inner.ctx.config.stuck_grace(), &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        self.inner.stats.set_state(WorkerState::Error);
                        self.inner.stats.set_loop_alive(false);
                        return Err(AnalysisError::Internal(format!(
                            "worker {} did not stop within {timeout:?}",
                            self.inner.id
                        )));
                    }
                }
            }
        };

        match joined {
            Ok(()) => {
                info!(worker_id = %self.inner.id, "🛑 WORKER: Stopped");
                Ok(())
            }
            Err(e) => Err(AnalysisError::Internal(format!(
                "worker {} loop terminated abnormally: {e}",
                self.inner.id
            ))),
        }
    }

    pub fn get_status(&self) -> WorkerStatus {
        let mut metadata = HashMap::new();
        metadata.insert("engine".to_string(), json!(self.inner.ctx.engine.name()));
        metadata.insert(
            "stop_requested".to_string(),
            json!(self.inner.stop.is_cancelled()),
        );
        self.inner.stats.snapshot(&self.inner.id, metadata)
    }

    pub fn is_healthy(&self) -> bool {
        let config = &self.inner.ctx.config;
        self.inner
            .stats
            .is_healthy(config.health_window(), config.stuck_grace())
    }

    pub fn processed_count(&self) -> u64 {
        self.inner.stats.processed_count()
    }

    pub fn error_count(&self) -> u64 {
        self.inner.stats.error_count()
    }
}

impl WorkerInner {
    async fn run(self: Arc<Self>) {
        let _guard = LoopGuard(Arc::clone(&self));
        let poll_interval = self.ctx.config.poll_interval();
        debug!(worker_id = %self.id, poll_ms = poll_interval.as_millis() as u64, "Worker loop running");

        loop {
            self.stats.heartbeat();
            let popped = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                popped = self.ctx.queue.pop_with_timeout(poll_interval) => popped,
            };

            match popped {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => {}
                Err(e) => {
                    self.stats.record_error();
                    log_error("worker", "queue_pop", &e.to_string(), Some(&format!("worker_id={}", self.id)));
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = self.stop.cancelled() => break,
                    }
                }
            }
        }

        info!(
            worker_id = %self.id,
            processed = self.stats.processed_count(),
            errors = self.stats.error_count(),
            "Worker loop ended"
        );
    }

    async fn process(&self, mut task: AnalysisTask) {
        let task_id = task.id.clone();
        if let Err(e) = task.mark_processing() {
            warn!(worker_id = %self.id, task_id = %task_id, error = %e, "Dequeued a task that cannot be claimed");
            return;
        }
        // registered before the claim write so a second copy of the task is refused
        let Some(guard) = self
            .ctx
            .in_flight
            .try_register(&task_id, &self.id, self.abort.child_token())
        else {
            debug!(worker_id = %self.id, task_id = %task_id, "Skipping task already running elsewhere");
            return;
        };

        match self
            .ctx
            .persist("claim", &task_id, || self.ctx.tasks.update(&task))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() || matches!(e, AnalysisError::InvalidArgument(_)) => {
                // cancelled while queued, or unknown to the repository
                debug!(worker_id = %self.id, task_id = %task_id, error = %e, "Skipping unclaimable task");
                return;
            }
            Err(e) => {
                self.stats.record_error();
                log_error(
                    "worker",
                    "claim",
                    &e.to_string(),
                    Some(&format!("worker_id={} task_id={task_id}", self.id)),
                );
                drop(guard);
                task.reset_to_pending();
                self.ctx.requeue(task, Duration::ZERO).await;
                return;
            }
        }

        let deadline = Instant::now() + task.timeout;
        self.stats.begin_attempt(&task_id, deadline);
        let attempt = task.retry_count + 1;
        log_task_operation(
            "claim",
            &task_id,
            Some(&self.id),
            "processing",
            Some(&format!("attempt={attempt} type={}", task.analysis_type)),
        );
        self.ctx
            .report_progress(
                &task_id,
                "processing",
                10,
                format!("attempt {attempt} started on {}", self.id),
            )
            .await;

        let attempt_ctx = AttemptContext {
            cancel: guard.token().clone(),
            deadline: tokio::time::Instant::from_std(deadline),
            attempt,
            worker_id: self.id.clone(),
        };
        let started = Instant::now();
        let outcome = tokio::select! {
            analyzed = tokio::time::timeout_at(
                attempt_ctx.deadline,
                self.ctx.engine.analyze(&attempt_ctx, &task, &task.payload),
            ) => match analyzed {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::Timeout {
                    task_id: task_id.clone(),
                    timeout: task.timeout,
                }),
            },
            _ = guard.token().cancelled() => Err(AnalysisError::Cancelled(format!(
                "attempt {attempt} of task {task_id} interrupted"
            ))),
        };
        // release anything the capability still holds on the token
        guard.token().cancel();
        let elapsed = started.elapsed();
        let cancel_requested = guard.cancel_requested();
        drop(guard);

        let failed = match outcome {
            Ok(result) => {
                self.ctx.complete(task, result, elapsed, Some(&self.id)).await
                    == CompletionOutcome::PersistFailed
            }
            Err(_) if cancel_requested => {
                info!(worker_id = %self.id, task_id = %task_id, "🚫 WORKER: Attempt cancelled on request");
                false
            }
            Err(e) if self.abort.is_cancelled() && !matches!(e, AnalysisError::Timeout { .. }) => {
                warn!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    "WORKER: Shutting down mid-attempt, returning task to pending"
                );
                if let Err(e) = self.ctx.requeue_abandoned(task).await {
                    log_error("worker", "requeue_abandoned", &e.to_string(), Some(&format!("task_id={task_id}")));
                }
                false
            }
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    category = %e.category(),
                    error = %e,
                    "Attempt failed"
                );
                if let Err(e) = self
                    .ctx
                    .resolve_failure(task, e, elapsed, Some(&self.id))
                    .await
                {
                    log_error("worker", "resolve_failure", &e.to_string(), Some(&format!("task_id={task_id}")));
                }
                true
            }
        };
        self.stats.end_attempt(failed);
    }
}
