//! Background housekeeping run by the engine core on a fixed interval.
//!
//! - Timeout sweeping: `processing` tasks past their deadline (plus grace) that no live
//!   worker holds are orphans, typically from a worker aborted mid-attempt. They are
//!   routed through the retry policy as timeouts.
//! - Stranded-task sweeping: `pending` tasks that sat untouched past a grace period and
//!   are neither queued, running nor waiting on a deferred requeue are pushed back.
//! - Expired progress reports and notifier registrations are evicted.

use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{AnalysisError, Result};
use crate::execution::{FailureOutcome, WorkerContext};
use crate::logging::log_error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_tasks_recovered: usize,
    pub stranded_tasks_requeued: usize,
    pub progress_evicted: usize,
    pub registrations_evicted: usize,
}

#[derive(Debug, Clone)]
pub struct MaintenanceLoop {
    ctx: WorkerContext,
    interval: Duration,
    expired_task_grace: Duration,
    stranded_task_grace: Duration,
}

impl MaintenanceLoop {
    pub fn new(ctx: WorkerContext, pool: &PoolConfig) -> Self {
        Self {
            ctx,
            interval: pool.maintenance_interval(),
            expired_task_grace: pool.expired_task_grace(),
            stranded_task_grace: pool.stranded_task_grace(),
        }
    }

    /// One full housekeeping pass; individual step failures are logged, not returned
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.sweep_expired_tasks().await {
            Ok(recovered) => report.expired_tasks_recovered = recovered,
            Err(e) => log_error("maintenance", "sweep_expired_tasks", &e.to_string(), None),
        }
        match self.sweep_stranded_tasks().await {
            Ok(requeued) => report.stranded_tasks_requeued = requeued,
            Err(e) => log_error("maintenance", "sweep_stranded_tasks", &e.to_string(), None),
        }
        match self.ctx.progress.cleanup_expired().await {
            Ok(evicted) => report.progress_evicted = evicted,
            Err(e) => warn!(error = %e, "MAINTENANCE: Progress cleanup failed"),
        }
        report.registrations_evicted = self.ctx.notifier.cleanup_expired();

        if report != MaintenanceReport::default() {
            info!(?report, "🧹 MAINTENANCE: Pass complete");
        }
        report
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            debug!("Maintenance loop stopped");
        })
    }

    async fn sweep_expired_tasks(&self) -> Result<usize> {
        let expired = self
            .ctx
            .tasks
            .get_expired_tasks(self.expired_task_grace)
            .await?;
        let mut recovered = 0;
        for task in expired {
            if self.ctx.in_flight.contains(&task.id) {
                // a live worker still owns it; its own deadline will fire
                continue;
            }
            let task_id = task.id.clone();
            warn!(
                task_id = %task_id,
                retry_count = task.retry_count,
                "⏰ MAINTENANCE: Reclaiming task stuck in processing past its deadline"
            );
            let error = AnalysisError::Timeout {
                task_id: task_id.clone(),
                timeout: task.timeout,
            };
            let elapsed = task.timeout;
            match self.ctx.resolve_failure(task, error, elapsed, None).await {
                Ok(FailureOutcome::Superseded) => {}
                Ok(outcome) => {
                    debug!(task_id = %task_id, ?outcome, "Expired task resolved");
                    recovered += 1;
                }
                Err(e) => log_error(
                    "maintenance",
                    "resolve_expired_task",
                    &e.to_string(),
                    Some(&format!("task_id={task_id}")),
                ),
            }
        }
        Ok(recovered)
    }

    async fn sweep_stranded_tasks(&self) -> Result<usize> {
        let stale = self
            .ctx
            .tasks
            .get_stale_pending_tasks(self.stranded_task_grace)
            .await?;
        let mut requeued = 0;
        for task in stale {
            // queue first: a worker pops and registers without yielding in between
            if self.ctx.queue.contains(&task.id).await?
                || self.ctx.in_flight.contains(&task.id)
                || self.ctx.in_flight.awaiting_requeue(&task.id)
            {
                continue;
            }
            let task_id = task.id.clone();
            warn!(
                task_id = %task_id,
                retry_count = task.retry_count,
                "⏰ MAINTENANCE: Re-queueing pending task missing from the queue"
            );
            match self.ctx.queue.push(task).await {
                Ok(()) => requeued += 1,
                Err(AnalysisError::InvalidTask(reason)) => {
                    debug!(task_id = %task_id, reason = %reason, "Stranded task already requeued");
                }
                Err(e) => log_error(
                    "maintenance",
                    "requeue_stranded_task",
                    &e.to_string(),
                    Some(&format!("task_id={task_id}")),
                ),
            }
        }
        Ok(requeued)
    }
}
