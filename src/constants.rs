//! # System Constants
//!
//! Status enums and event names shared by the queue, workers and notifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AnalysisError;

/// Notification event names published on the notifier channel
pub mod events {
    pub const TASK_COMPLETED: &str = "analysis.task_completed";
    pub const TASK_FAILED: &str = "analysis.task_failed";
    pub const TASK_PROGRESS: &str = "analysis.task_progress";
}

/// Lifecycle state of an analysis task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue (initially or after a retry was scheduled)
    Pending,
    /// Claimed by a worker
    Processing,
    /// Analysis succeeded
    Completed,
    /// Retries exhausted or error not retryable
    Failed,
    /// Cancelled by an external request
    Cancelled,
}

impl TaskStatus {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Kind of analysis requested for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    RootCause,
    AnomalyDetection,
    ImpactAssessment,
    Correlation,
    Custom,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 5] = [
        Self::RootCause,
        Self::AnomalyDetection,
        Self::ImpactAssessment,
        Self::Correlation,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootCause => "root_cause",
            Self::AnomalyDetection => "anomaly_detection",
            Self::ImpactAssessment => "impact_assessment",
            Self::Correlation => "correlation",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AnalysisError::InvalidTask(format!("Unknown analysis type: {s}")))
    }
}

/// Run state of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Stopped,
    Error,
}

impl WorkerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopped => 1,
            Self::Error => 2,
        }
    }
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Stopped,
            _ => WorkerState::Error,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_forms() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_analysis_type_parsing() {
        assert_eq!(
            "root_cause".parse::<AnalysisType>().unwrap(),
            AnalysisType::RootCause
        );
        let err = "rootcause".parse::<AnalysisType>().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTask(_)));
        assert_eq!(
            serde_json::to_string(&AnalysisType::AnomalyDetection).unwrap(),
            "\"anomaly_detection\""
        );
    }

    #[test]
    fn test_worker_state_u8_mapping() {
        for state in [WorkerState::Running, WorkerState::Stopped, WorkerState::Error] {
            assert_eq!(WorkerState::from(state.as_u8()), state);
        }
    }
}
