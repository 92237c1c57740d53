//! # Task Queue
//!
//! Holds tasks that are waiting to be claimed: newly submitted ones and retries that
//! were pushed back. Claimed (`processing`) and finished tasks live only in the task
//! repository.
//!
//! Ordering: priority descending, then enqueue order ascending. A retried task is a
//! fresh positional entry and goes behind everything already waiting at its priority.
//!
//! An empty queue is not an error; pops return `Ok(None)` and callers poll again.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{AnalysisTask, QueueStatus};

pub use memory::InMemoryTaskQueue;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task; rejects tasks without an id with `InvalidTask`
    async fn push(&self, task: AnalysisTask) -> Result<()>;

    /// Remove and return the next task without waiting
    async fn pop(&self) -> Result<Option<AnalysisTask>>;

    /// Remove and return the next task, waiting up to `timeout` for one to arrive
    async fn pop_with_timeout(&self, timeout: Duration) -> Result<Option<AnalysisTask>>;

    /// Next task that `pop` would return, left in place
    async fn peek(&self) -> Result<Option<AnalysisTask>>;

    /// Drop a waiting task; `NotFound` if it was already claimed or never queued
    async fn remove(&self, task_id: &str) -> Result<AnalysisTask>;

    /// Re-rank a waiting task; `NotFound` if it was already claimed or never queued
    async fn update_priority(&self, task_id: &str, priority: i32) -> Result<()>;

    /// Whether the task is waiting in the queue right now
    async fn contains(&self, task_id: &str) -> Result<bool>;

    async fn size(&self) -> Result<usize>;

    /// Pending view of the queue; lifecycle counts are filled in by the engine core
    async fn get_status(&self) -> Result<QueueStatus>;

    /// Drop everything waiting. Administrative use only.
    async fn clear(&self) -> Result<usize>;
}
