//! Outcome of an analysis task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{AnalysisType, TaskStatus};
use crate::models::AnalysisTask;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub task_id: String,
    pub alert_id: String,
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    pub status: TaskStatus,
    /// Confidence in the conclusion, clamped to 0.0..=1.0
    pub confidence_score: f64,
    #[serde(with = "crate::utils::serde::duration_millis")]
    pub processing_time: Duration,
    #[serde(default)]
    pub result: Value,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AnalysisResult {
    /// Empty successful result bound to `task`, for capabilities to fill in
    pub fn for_task(task: &AnalysisTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            alert_id: task.alert_id.clone(),
            analysis_type: task.analysis_type,
            status: TaskStatus::Completed,
            confidence_score: 0.0,
            processing_time: Duration::ZERO,
            result: Value::Null,
            summary: String::new(),
            recommendations: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Terminal failure record carrying the last error
    pub fn failure(task: &AnalysisTask, error_message: impl Into<String>, processing_time: Duration) -> Self {
        let error_message = error_message.into();
        Self {
            status: TaskStatus::Failed,
            summary: format!("analysis failed after {} retries", task.retry_count),
            error_message: Some(error_message),
            processing_time,
            ..Self::for_task(task)
        }
    }

    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence_score = score;
        self.normalize();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_recommendations(mut self, recommendations: Vec<String>) -> Self {
        self.recommendations = recommendations;
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Rebind a capability-produced result to the task that owns it
    pub(crate) fn bind_to(&mut self, task: &AnalysisTask, processing_time: Duration) {
        self.task_id = task.id.clone();
        self.alert_id = task.alert_id.clone();
        self.analysis_type = task.analysis_type;
        self.status = TaskStatus::Completed;
        self.processing_time = processing_time;
        self.updated_at = Utc::now();
        self.normalize();
    }

    fn normalize(&mut self) {
        if self.confidence_score.is_nan() {
            self.confidence_score = 0.0;
        }
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
    }
}
