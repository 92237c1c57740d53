//! Task repository wrapper that fails a configurable number of writes.

use analysis_core::{
    AnalysisError, AnalysisTask, InMemoryTaskRepository, Result, TaskRepository, TaskStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FlakyTaskRepository {
    inner: InMemoryTaskRepository,
    failures_left: AtomicU32,
    update_calls: AtomicUsize,
}

impl FlakyTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates fail with a storage error
    pub fn fail_next_updates(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<()> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AnalysisError::Storage("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for FlakyTaskRepository {
    async fn create(&self, task: &AnalysisTask) -> Result<()> {
        self.inner.create(task).await
    }

    async fn update(&self, task: &AnalysisTask) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.inner.update(task).await
    }

    async fn get_by_id(&self, task_id: &str) -> Result<AnalysisTask> {
        self.inner.get_by_id(task_id).await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.maybe_fail()?;
        self.inner.update_status(task_id, status).await
    }

    async fn get_expired_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>> {
        self.inner.get_expired_tasks(grace).await
    }

    async fn get_stale_pending_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>> {
        self.inner.get_stale_pending_tasks(grace).await
    }

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, u64>> {
        self.inner.count_by_status().await
    }
}
