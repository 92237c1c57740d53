//! # Analysis Core
//!
//! Single entry point the service layer talks to. It wires the queue, progress
//! tracker, repositories, notifier, retry policy and analysis capability into one
//! [`WorkerContext`], owns the worker pool and the maintenance loop, and holds the
//! root cancellation token every worker and attempt token descends from.
//!
//! ```rust,no_run
//! use analysis_core::{AnalysisCore, AnalysisTask, AnalysisType, EngineConfig};
//! # use analysis_core::analyzer::{AnalysisEngine, AttemptContext};
//! # use analysis_core::{AnalysisResult, Result};
//! # use std::sync::Arc;
//! # struct Engine;
//! # #[async_trait::async_trait]
//! # impl AnalysisEngine for Engine {
//! #     async fn analyze(&self, _: &AttemptContext, task: &AnalysisTask, _: &serde_json::Value) -> Result<AnalysisResult> {
//! #         Ok(AnalysisResult::for_task(task))
//! #     }
//! # }
//! # async fn example() -> Result<()> {
//! let core = AnalysisCore::new(EngineConfig::default(), Arc::new(Engine))?;
//! core.start().await?;
//!
//! core.submit_task(AnalysisTask::new("t1", "alert-42", AnalysisType::RootCause).with_priority(5))
//!     .await?;
//! let status = core.queue_status().await?;
//! println!("{} pending", status.pending_count);
//!
//! core.shutdown(std::time::Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::AnalysisEngine;
use crate::config::EngineConfig;
use crate::constants::{AnalysisType, TaskStatus};
use crate::error::{AnalysisError, Result};
use crate::events::{CallbackHandler, Notifier, PublishedEvent};
use crate::execution::{InFlightRegistry, WorkerContext, WorkerMetrics, WorkerPoolManager, WorkerStatus};
use crate::logging::log_task_operation;
use crate::models::{
    AnalysisProgress, AnalysisResult, AnalysisTask, QueueStatus, TaskRequest,
};
use crate::progress::{InMemoryProgressTracker, ProgressTracker};
use crate::queue::{InMemoryTaskQueue, TaskQueue};
use crate::repository::{
    InMemoryResultRepository, InMemoryTaskRepository, ResultRepository, TaskRepository,
};
use crate::resilience::RetryPolicy;

use super::maintenance::{MaintenanceLoop, MaintenanceReport};

/// Builder for [`AnalysisCore`]. Every collaborator left unset gets its in-memory
/// implementation.
pub struct AnalysisCoreBuilder {
    config: EngineConfig,
    engine: Arc<dyn AnalysisEngine>,
    queue: Option<Arc<dyn TaskQueue>>,
    progress: Option<Arc<dyn ProgressTracker>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    results: Option<Arc<dyn ResultRepository>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl AnalysisCoreBuilder {
    pub fn new(engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            config: EngineConfig::default(),
            engine,
            queue: None,
            progress: None,
            tasks: None,
            results: None,
            retry_policy: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_progress_tracker(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_task_repository(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_result_repository(mut self, results: Arc<dyn ResultRepository>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn build(self) -> Result<AnalysisCore> {
        self.config.validate()?;
        let config = self.config;

        let retry_policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(config.retry.build_policy()?),
        };
        let shutdown = CancellationToken::new();
        let ctx = WorkerContext {
            queue: self
                .queue
                .unwrap_or_else(|| Arc::new(InMemoryTaskQueue::with_capacity(config.queue.capacity))),
            progress: self
                .progress
                .unwrap_or_else(|| Arc::new(InMemoryProgressTracker::new(config.progress.ttl()))),
            tasks: self
                .tasks
                .unwrap_or_else(|| Arc::new(InMemoryTaskRepository::new())),
            results: self
                .results
                .unwrap_or_else(|| Arc::new(InMemoryResultRepository::new())),
            notifier: Arc::new(Notifier::new(
                config.notifier.channel_capacity,
                config.notifier.registration_ttl(),
            )),
            retry_policy,
            engine: self.engine,
            in_flight: Arc::new(InFlightRegistry::new()),
            config: config.worker.clone(),
            shutdown: shutdown.clone(),
        };

        Ok(AnalysisCore {
            pool: WorkerPoolManager::new(ctx.clone(), config.pool.max_workers),
            maintenance_token: shutdown.child_token(),
            maintenance: Mutex::new(None),
            started: AtomicBool::new(false),
            ctx,
            config,
        })
    }
}

#[derive(Debug)]
pub struct AnalysisCore {
    config: EngineConfig,
    ctx: WorkerContext,
    pool: WorkerPoolManager,
    maintenance_token: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl AnalysisCore {
    pub fn builder(engine: Arc<dyn AnalysisEngine>) -> AnalysisCoreBuilder {
        AnalysisCoreBuilder::new(engine)
    }

    /// Engine with in-memory collaborators
    pub fn new(config: EngineConfig, engine: Arc<dyn AnalysisEngine>) -> Result<Self> {
        Self::builder(engine).with_config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPoolManager {
        &self.pool
    }

    pub fn notifier(&self) -> &Notifier {
        &self.ctx.notifier
    }

    /// Start the initial workers and the maintenance loop. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.ctx.shutdown.is_cancelled() {
            return Err(AnalysisError::InvalidArgument(
                "analysis core has been shut down".to_string(),
            ));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Analysis core already started");
            return Ok(());
        }

        if self.config.pool.initial_workers > 0 {
            self.pool
                .start_workers(self.config.pool.initial_workers)
                .await?;
        }
        let maintenance = MaintenanceLoop::new(self.ctx.clone(), &self.config.pool);
        *self.maintenance.lock() = Some(maintenance.spawn(self.maintenance_token.clone()));

        info!(
            workers = self.config.pool.initial_workers,
            engine = %self.ctx.engine.name(),
            "🚀 ANALYSIS CORE: Started"
        );
        Ok(())
    }

    /// Persist a new task as `pending` and enqueue it
    pub async fn submit_task(&self, task: AnalysisTask) -> Result<AnalysisTask> {
        task.validate()?;
        if task.status != TaskStatus::Pending {
            return Err(AnalysisError::InvalidTask(format!(
                "new task {} must be pending, got {}",
                task.id, task.status
            )));
        }

        self.ctx.tasks.create(&task).await?;
        if let Err(e) = self.ctx.queue.push(task.clone()).await {
            // never enqueued; do not leave a phantom pending task behind
            self.record_rejected(&task, &e).await;
            return Err(e);
        }

        self.ctx
            .store_progress(&AnalysisProgress::new(
                &task.id,
                "queued",
                0,
                "waiting for a worker",
            ))
            .await;
        log_task_operation(
            "submit",
            &task.id,
            None,
            "pending",
            Some(&format!(
                "type={} priority={} max_retries={}",
                task.analysis_type, task.priority, task.max_retries
            )),
        );
        Ok(task)
    }

    /// Build a task from a producer request, filling defaults from config and policy
    pub async fn submit_request(&self, request: TaskRequest) -> Result<AnalysisTask> {
        let default_max_retries = request
            .analysis_type
            .as_deref()
            .and_then(|name| name.parse::<AnalysisType>().ok())
            .map(|analysis_type| self.ctx.retry_policy.get_max_retries(analysis_type))
            .unwrap_or(self.config.retry.default_max_retries);
        let task =
            request.into_task(self.config.worker.default_task_timeout(), default_max_retries)?;
        self.submit_task(task).await
    }

    pub fn register_callback(&self, task_id: &str, handler: CallbackHandler) {
        self.ctx.notifier.register_callback(task_id, handler);
    }

    pub fn unregister_callback(&self, task_id: &str) -> bool {
        self.ctx.notifier.unregister_callback(task_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.ctx.notifier.subscribe()
    }

    /// Cancel a pending or processing task. Cancelling a finished task is a no-op.
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut task = self.ctx.tasks.get_by_id(task_id).await?;
        if task.is_terminal() {
            debug!(task_id = %task_id, status = %task.status, "Cancel ignored for finished task");
            return Ok(());
        }

        match self
            .ctx
            .tasks
            .update_status(task_id, TaskStatus::Cancelled)
            .await
        {
            Ok(()) => {}
            // finished between the read and the write
            Err(AnalysisError::InvalidArgument(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        match self.ctx.queue.remove(task_id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "Could not drop cancelled task from queue"),
        }
        let interrupted = self.ctx.in_flight.cancel(task_id);

        task.mark_cancelled()?;
        self.ctx
            .store_progress(&AnalysisProgress::new(
                task_id,
                "cancelled",
                100,
                "cancelled by request",
            ))
            .await;
        self.ctx.notifier.notify_failed(
            &task,
            &AnalysisError::Cancelled(format!("task {task_id} cancelled by request")),
        );
        log_task_operation(
            "cancel",
            task_id,
            None,
            "cancelled",
            Some(&format!("interrupted_attempt={interrupted}")),
        );
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<AnalysisTask> {
        self.ctx.tasks.get_by_id(task_id).await
    }

    pub async fn get_progress(&self, task_id: &str) -> Result<AnalysisProgress> {
        self.ctx.progress.get_progress(task_id).await
    }

    pub async fn get_progress_by_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<HashMap<String, AnalysisProgress>> {
        self.ctx.progress.get_progress_by_tasks(task_ids).await
    }

    pub async fn get_result(&self, task_id: &str) -> Result<AnalysisResult> {
        self.ctx.results.get_by_task_id(task_id).await
    }

    pub async fn get_results_by_alert(&self, alert_id: &str) -> Result<Vec<AnalysisResult>> {
        self.ctx.results.get_by_alert_id(alert_id).await
    }

    /// Waiting tasks from the queue merged with lifecycle counts from the repository
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let mut status = self.ctx.queue.get_status().await?;
        let counts = self.ctx.tasks.count_by_status().await?;
        let count = |s: TaskStatus| counts.get(&s).copied().unwrap_or(0);

        status.processing_count = count(TaskStatus::Processing);
        status.completed_count = count(TaskStatus::Completed);
        status.failed_count = count(TaskStatus::Failed);
        status.last_updated = Utc::now();
        Ok(status)
    }

    pub async fn worker_metrics(&self) -> WorkerMetrics {
        self.pool.get_worker_metrics().await
    }

    pub async fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.pool.get_worker_statuses().await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.pool.health_check().await
    }

    /// Run one maintenance pass immediately
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceLoop::new(self.ctx.clone(), &self.config.pool)
            .run_once()
            .await
    }

    /// Stop maintenance and workers. Attempts still running when `timeout` elapses
    /// are abandoned back to `pending`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!(timeout_ms = timeout.as_millis() as u64, "🛑 ANALYSIS CORE: Shutting down");
        self.maintenance_token.cancel();
        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance loop ended abnormally");
            }
        }

        let stop = self.pool.stop_workers();
        tokio::pin!(stop);
        let result = tokio::select! {
            result = &mut stop => result,
            _ = tokio::time::sleep(timeout) => {
                warn!("⏱️ ANALYSIS CORE: Shutdown timeout reached, abandoning in-flight attempts");
                self.ctx.shutdown.cancel();
                stop.await
            }
        };
        self.ctx.shutdown.cancel();

        info!(in_flight = self.ctx.in_flight.len(), "✅ ANALYSIS CORE: Shutdown complete");
        result
    }

    async fn record_rejected(&self, task: &AnalysisTask, error: &AnalysisError) {
        let mut failed = task.clone();
        if failed.mark_failed().is_err() {
            return;
        }
        if let Err(e) = self.ctx.tasks.update(&failed).await {
            warn!(task_id = %task.id, error = %e, "Could not record rejected task");
            return;
        }
        let result = AnalysisResult::failure(&failed, error.to_string(), Duration::ZERO);
        if let Err(e) = self.ctx.results.create(&result).await {
            warn!(task_id = %task.id, error = %e, "Could not record rejection result");
        }
    }
}

impl Drop for AnalysisCore {
    fn drop(&mut self) {
        self.ctx.shutdown.cancel();
    }
}
