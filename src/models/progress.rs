use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest advisory progress report for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub task_id: String,
    pub stage: String,
    /// Percentage, 0..=100
    pub progress: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisProgress {
    pub fn new(
        task_id: impl Into<String>,
        stage: impl Into<String>,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            stage: stage.into(),
            progress: progress.min(100),
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 100
    }
}
