//! # Worker Pool Manager
//!
//! Owns the set of live workers keyed by worker id. The id is the only handle callers
//! get: every read returns a snapshot and every mutation of the set happens under the
//! exclusive side of one `RwLock`.
//!
//! Scale-down evicts unhealthy workers first. Among equally healthy workers the
//! least-used one goes first (lowest processed count), then the oldest, then the
//! lexically smallest id, so eviction order is deterministic.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::error::{AnalysisError, Result};

use super::context::WorkerContext;
use super::worker::AnalysisWorker;
use super::worker_status::WorkerStatus;

/// Read-only aggregate over the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub total_workers: usize,
    pub active_workers: usize,
    pub unhealthy_workers: usize,
    pub total_processed: u64,
    pub total_errors: u64,
    /// `total_errors / total_processed`, capped at 1.0
    pub error_rate: f64,
    pub target_count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub struct WorkerPoolManager {
    workers: RwLock<HashMap<String, Arc<AnalysisWorker>>>,
    target_count: AtomicUsize,
    max_workers: usize,
    context: WorkerContext,
}

impl WorkerPoolManager {
    pub fn new(context: WorkerContext, max_workers: usize) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            target_count: AtomicUsize::new(0),
            max_workers,
            context,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count.load(Ordering::Acquire)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Grow the pool to `count` workers; a pool already that large is left alone
    #[instrument(skip(self))]
    pub async fn start_workers(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(AnalysisError::InvalidArgument(
                "worker count must be positive".to_string(),
            ));
        }
        self.check_limit(count)?;

        let mut workers = self.workers.write().await;
        if workers.len() >= count {
            info!(current = workers.len(), requested = count, "🏊 POOL: Already at requested size");
            return Ok(());
        }
        self.target_count.store(count, Ordering::Release);
        let missing = count - workers.len();
        self.spawn_into(&mut workers, missing)?;

        info!(workers = workers.len(), "✅ POOL: Workers started");
        Ok(())
    }

    /// Stop every worker concurrently and clear the set
    #[instrument(skip(self))]
    pub async fn stop_workers(&self) -> Result<()> {
        let mut workers = self.workers.write().await;
        let stopping: Vec<Arc<AnalysisWorker>> = workers.drain().map(|(_, w)| w).collect();
        self.target_count.store(0, Ordering::Release);
        info!(workers = stopping.len(), "🛑 POOL: Stopping all workers");

        self.stop_all(stopping).await
    }

    /// Move the pool to exactly `target` workers
    #[instrument(skip(self))]
    pub async fn scale_workers(&self, target: usize) -> Result<()> {
        self.check_limit(target)?;

        let mut workers = self.workers.write().await;
        let current = workers.len();
        self.target_count.store(target, Ordering::Release);

        if target > current {
            info!(current, target, "📈 POOL: Scaling up");
            return self.spawn_into(&mut workers, target - current);
        }
        if target == current {
            return Ok(());
        }

        let evicted: Vec<Arc<AnalysisWorker>> = eviction_order(&workers)
            .into_iter()
            .take(current - target)
            .filter_map(|id| workers.remove(&id))
            .collect();
        info!(
            current,
            target,
            evicted = ?evicted.iter().map(|w| w.id().to_string()).collect::<Vec<_>>(),
            "📉 POOL: Scaling down"
        );
        self.stop_all(evicted).await
    }

    /// Workers currently passing their health check
    pub async fn get_active_worker_count(&self) -> usize {
        let workers = self.workers.read().await;
        workers.values().filter(|w| w.is_healthy()).count()
    }

    /// Replace a worker with a fresh one. The replacement gets a new id.
    #[instrument(skip(self))]
    pub async fn restart_worker(&self, worker_id: &str) -> Result<String> {
        let mut workers = self.workers.write().await;
        let old = workers
            .remove(worker_id)
            .ok_or_else(|| AnalysisError::not_found("worker", worker_id))?;

        if let Err(e) = old.stop(self.context.config.stop_timeout()).await {
            warn!(worker_id = %worker_id, error = %e, "⚠️ POOL: Old worker did not stop cleanly");
        }

        let replacement = Arc::new(AnalysisWorker::new(self.context.clone()));
        replacement.start()?;
        let new_id = replacement.id().to_string();
        workers.insert(new_id.clone(), replacement);

        info!(old_id = %worker_id, new_id = %new_id, "🔁 POOL: Worker restarted");
        Ok(new_id)
    }

    pub async fn worker_ids(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut ids: Vec<String> = workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_worker_statuses(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.read().await;
        let mut statuses: Vec<WorkerStatus> = workers.values().map(|w| w.get_status()).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn get_worker_metrics(&self) -> WorkerMetrics {
        let workers = self.workers.read().await;
        let total_workers = workers.len();
        let active_workers = workers.values().filter(|w| w.is_healthy()).count();
        let total_processed: u64 = workers.values().map(|w| w.processed_count()).sum();
        let total_errors: u64 = workers.values().map(|w| w.error_count()).sum();
        let error_rate = if total_processed == 0 {
            0.0
        } else {
            (total_errors as f64 / total_processed as f64).min(1.0)
        };

        WorkerMetrics {
            total_workers,
            active_workers,
            unhealthy_workers: total_workers - active_workers,
            total_processed,
            total_errors,
            error_rate,
            target_count: self.target_count(),
            last_updated: Utc::now(),
        }
    }

    /// Coarse pool health: fails with no workers, no healthy workers, or fewer than
    /// half healthy. Reports only; remediation is up to the caller.
    pub async fn health_check(&self) -> Result<()> {
        let workers = self.workers.read().await;
        let total = workers.len();
        if total == 0 {
            return Err(AnalysisError::HealthCheck("no workers running".to_string()));
        }
        let healthy = workers.values().filter(|w| w.is_healthy()).count();
        if healthy == 0 {
            return Err(AnalysisError::HealthCheck(format!(
                "none of {total} workers are healthy"
            )));
        }
        if healthy * 2 < total {
            return Err(AnalysisError::HealthCheck(format!(
                "only {healthy} of {total} workers are healthy"
            )));
        }
        Ok(())
    }

    fn check_limit(&self, count: usize) -> Result<()> {
        if count > self.max_workers {
            return Err(AnalysisError::InvalidArgument(format!(
                "requested {count} workers exceeds the maximum of {}",
                self.max_workers
            )));
        }
        Ok(())
    }

    fn spawn_into(
        &self,
        workers: &mut HashMap<String, Arc<AnalysisWorker>>,
        count: usize,
    ) -> Result<()> {
        for _ in 0..count {
            let worker = Arc::new(AnalysisWorker::new(self.context.clone()));
            worker.start()?;
            workers.insert(worker.id().to_string(), worker);
        }
        Ok(())
    }

    async fn stop_all(&self, workers: Vec<Arc<AnalysisWorker>>) -> Result<()> {
        let total = workers.len();
        let timeout = self.context.config.stop_timeout();
        let results = join_all(workers.iter().map(|worker| async move {
            (worker.id().to_string(), worker.stop(timeout).await)
        }))
        .await;

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| format!("{id}: {e}")))
            .collect();
        if errors.is_empty() {
            info!(stopped = total, "✅ POOL: Workers stopped");
            return Ok(());
        }
        warn!(failed = errors.len(), total, "⚠️ POOL: Some workers failed to stop cleanly");
        Err(AnalysisError::PartialFailure {
            failed: errors.len(),
            total,
            errors,
        })
    }
}

/// Worker ids ordered by eviction preference
fn eviction_order(workers: &HashMap<String, Arc<AnalysisWorker>>) -> Vec<String> {
    let mut candidates: Vec<(bool, u64, DateTime<Utc>, String)> = workers
        .values()
        .map(|worker| {
            let status = worker.get_status();
            (
                worker.is_healthy(),
                status.processed_count,
                status.start_time,
                status.id,
            )
        })
        .collect();
    // false < true, so unhealthy workers sort first
    candidates.sort();
    candidates.into_iter().map(|(_, _, _, id)| id).collect()
}
