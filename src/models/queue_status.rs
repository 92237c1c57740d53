use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate view of the queue and the task lifecycle counts behind it.
///
/// Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_count: u64,
    pub processing_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    /// Creation time of the oldest task still waiting in the queue
    pub oldest_task_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl QueueStatus {
    pub fn empty() -> Self {
        Self {
            pending_count: 0,
            processing_count: 0,
            completed_count: 0,
            failed_count: 0,
            oldest_task_time: None,
            last_updated: Utc::now(),
        }
    }
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self::empty()
    }
}
