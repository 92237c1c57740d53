//! In-memory progress store with a fixed retention window per report.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::models::AnalysisProgress;

use super::ProgressTracker;

#[derive(Debug, Clone)]
struct ProgressEntry {
    progress: AnalysisProgress,
    expires_at: Instant,
}

impl ProgressEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct InMemoryProgressTracker {
    entries: DashMap<String, ProgressEntry>,
    ttl: Duration,
}

impl InMemoryProgressTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry for `task_id`, lazily evicting it if expired
    fn live_entry(&self, task_id: &str, now: Instant) -> Option<AnalysisProgress> {
        let expired = match self.entries.get(task_id) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.progress.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(task_id, |_, entry| entry.is_expired(now));
        }
        None
    }
}

impl Default for InMemoryProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn update_progress(&self, task_id: &str, mut progress: AnalysisProgress) -> Result<()> {
        progress.task_id = task_id.to_string();
        progress.progress = progress.progress.min(100);
        debug!(
            task_id = %task_id,
            stage = %progress.stage,
            progress = progress.progress,
            "Progress updated"
        );
        self.entries.insert(
            task_id.to_string(),
            ProgressEntry {
                progress,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get_progress(&self, task_id: &str) -> Result<AnalysisProgress> {
        self.live_entry(task_id, Instant::now())
            .ok_or_else(|| AnalysisError::not_found("progress", task_id))
    }

    async fn get_progress_by_tasks(
        &self,
        task_ids: &[String],
    ) -> Result<HashMap<String, AnalysisProgress>> {
        let now = Instant::now();
        Ok(task_ids
            .iter()
            .filter_map(|id| self.live_entry(id, now).map(|p| (id.clone(), p)))
            .collect())
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            debug!(dropped, "Expired progress entries evicted");
        }
        Ok(dropped)
    }
}
