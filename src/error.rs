//! Error types for the analysis engine.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors coming back from the
//! analysis capability are classified through [`AnalysisError::category`] so the retry
//! policy can tell a timeout or transient infrastructure hiccup apart from a malformed
//! request that will never succeed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Task {task_id} exceeded its timeout of {timeout:?}")]
    Timeout { task_id: String, timeout: Duration },

    #[error("Transient failure: {0}")]
    TransientFailure(String),

    #[error("Permanent failure: {0}")]
    PermanentFailure(String),

    #[error("{failed} of {total} operations failed: {}", errors.join("; "))]
    PartialFailure {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Broad classification used by retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input, never retried
    Validation,
    /// Attempt exceeded its deadline
    Timeout,
    /// Capability error that may succeed on another attempt
    Transient,
    /// Capability error that will not succeed on retry
    Permanent,
    /// Storage or queue backend unavailable
    Infrastructure,
    /// Attempt was cancelled by an operator or shutdown
    Cancelled,
    /// Bug or broken invariant inside the engine
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl AnalysisError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTask(_) | Self::InvalidArgument(_) | Self::Configuration(_) => {
                ErrorCategory::Validation
            }
            Self::Timeout { .. } => ErrorCategory::Timeout,
            // anyhow errors come from capabilities that did not classify themselves
            Self::TransientFailure(_) | Self::Other(_) => ErrorCategory::Transient,
            Self::PermanentFailure(_) | Self::NotFound { .. } => ErrorCategory::Permanent,
            Self::Storage(_) | Self::PartialFailure { .. } | Self::HealthCheck(_) => {
                ErrorCategory::Infrastructure
            }
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::Transient | ErrorCategory::Infrastructure
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<config::ConfigError> for AnalysisError {
    fn from(error: config::ConfigError) -> Self {
        AnalysisError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(error: serde_json::Error) -> Self {
        AnalysisError::InvalidTask(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
