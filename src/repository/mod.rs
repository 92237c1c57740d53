//! # Repositories
//!
//! Persistence contracts the engine writes task state and results through. The
//! durable implementations live in the service layer; the in-memory ones here back
//! tests and single-process deployments.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::TaskStatus;
use crate::error::Result;
use crate::models::{AnalysisResult, AnalysisTask};

pub use memory::{InMemoryResultRepository, InMemoryTaskRepository};

/// Source of truth for task existence and status
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &AnalysisTask) -> Result<()>;

    /// Replace the stored task. Terminal tasks reject further writes.
    async fn update(&self, task: &AnalysisTask) -> Result<()>;

    async fn get_by_id(&self, task_id: &str) -> Result<AnalysisTask>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// `processing` tasks whose attempt deadline passed more than `grace` ago
    async fn get_expired_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>>;

    /// `pending` tasks not written for longer than `grace`
    async fn get_stale_pending_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>>;

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, u64>>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn create(&self, result: &AnalysisResult) -> Result<()>;

    async fn get_by_task_id(&self, task_id: &str) -> Result<AnalysisResult>;

    async fn get_by_alert_id(&self, alert_id: &str) -> Result<Vec<AnalysisResult>>;
}
