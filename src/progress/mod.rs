//! # Progress Tracking
//!
//! Advisory, expiring progress reports. Losing them is harmless: the authoritative
//! state of a task is its status in the task repository.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::AnalysisProgress;

pub use memory::InMemoryProgressTracker;

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Overwrite the stored report for `task_id` and restart its retention window
    async fn update_progress(&self, task_id: &str, progress: AnalysisProgress) -> Result<()>;

    /// Latest report; `NotFound` when absent or expired
    async fn get_progress(&self, task_id: &str) -> Result<AnalysisProgress>;

    /// Reports for every id that has one; missing ids are left out
    async fn get_progress_by_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<HashMap<String, AnalysisProgress>>;

    /// Evict expired reports, returning how many were dropped
    async fn cleanup_expired(&self) -> Result<usize>;
}
