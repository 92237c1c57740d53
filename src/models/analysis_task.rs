//! # Analysis Task
//!
//! The unit of work handed to the worker pool. A task keeps its identity across
//! attempts: a retry re-enqueues the same task with `retry_count + 1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{AnalysisType, TaskStatus};
use crate::error::{AnalysisError, Result};

/// Default per-attempt deadline for tasks that do not specify one
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default retry budget when neither the producer nor the policy supplies one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    pub alert_id: String,
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    pub status: TaskStatus,
    /// Higher values are dequeued first. Ordering hint only, never preempts.
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "crate::utils::serde::duration_millis")]
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Snapshot of the alert handed to the analysis capability
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AnalysisTask {
    pub fn new(
        id: impl Into<String>,
        alert_id: impl Into<String>,
        analysis_type: AnalysisType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            alert_id: alert_id.into(),
            analysis_type,
            status: TaskStatus::Pending,
            priority: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TASK_TIMEOUT,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            payload: Value::Null,
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check the task is well-formed enough to be enqueued
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AnalysisError::InvalidTask("task id is required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(AnalysisError::InvalidTask(format!(
                "task {} has a zero timeout",
                self.id
            )));
        }
        if self.retry_count > self.max_retries {
            return Err(AnalysisError::InvalidTask(format!(
                "task {} retry_count {} exceeds max_retries {}",
                self.id, self.retry_count, self.max_retries
            )));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt fits in the retry budget
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Deadline of the current attempt, if one is running
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        chrono::Duration::from_std(self.timeout)
            .ok()
            .map(|timeout| started + timeout)
    }

    fn ensure_mutable(&self, action: &str) -> Result<()> {
        if self.is_terminal() {
            return Err(AnalysisError::InvalidArgument(format!(
                "cannot {action} task {} in terminal status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn mark_processing(&mut self) -> Result<()> {
        self.ensure_mutable("claim")?;
        let now = Utc::now();
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.ensure_mutable("complete")?;
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        self.ensure_mutable("fail")?;
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.ensure_mutable("cancel")?;
        let now = Utc::now();
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Consume one retry and send the task back to `pending`
    pub fn prepare_retry(&mut self) -> Result<()> {
        self.ensure_mutable("retry")?;
        if !self.has_retries_left() {
            return Err(AnalysisError::InvalidArgument(format!(
                "task {} has exhausted its {} retries",
                self.id, self.max_retries
            )));
        }
        self.retry_count += 1;
        self.reset_to_pending();
        Ok(())
    }

    /// Return the task to `pending` without consuming a retry (abandoned attempt)
    pub fn reset_to_pending(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.updated_at = Utc::now();
    }
}

/// Producer-side request for a new task, as it arrives from the service layer.
///
/// Every field is optional so a malformed request can be rejected with
/// [`AnalysisError::InvalidTask`] rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: Option<String>,
    pub alert_id: Option<String>,
    #[serde(rename = "type")]
    pub analysis_type: Option<String>,
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskRequest {
    /// Build a pending task, filling absent knobs from the supplied defaults
    pub fn into_task(self, default_timeout: Duration, default_max_retries: u32) -> Result<AnalysisTask> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AnalysisError::InvalidTask("task id is required".to_string()))?;
        let analysis_type = self
            .analysis_type
            .ok_or_else(|| AnalysisError::InvalidTask(format!("task {id} has no type")))?
            .parse::<AnalysisType>()?;

        let mut task = AnalysisTask::new(id, self.alert_id.unwrap_or_default(), analysis_type)
            .with_priority(self.priority.unwrap_or(0))
            .with_max_retries(self.max_retries.unwrap_or(default_max_retries))
            .with_timeout(
                self.timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_timeout),
            )
            .with_payload(self.payload);
        task.metadata = self.metadata;
        task.validate()?;
        Ok(task)
    }
}
