//! # Retry Policy
//!
//! Pure decision logic for failed attempts. Implementations must be deterministic for a
//! given `(task, error)` pair and free of side effects; the worker owns every mutation
//! that follows from the decision.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use crate::constants::AnalysisType;
use crate::error::{AnalysisError, ErrorCategory};
use crate::models::AnalysisTask;

use super::backoff::BackoffStrategy;

/// Strategy deciding whether and when a failed task is attempted again
pub trait RetryPolicy: Send + Sync + Debug {
    /// Whether the failure is eligible for another attempt
    fn should_retry(&self, task: &AnalysisTask, error: &AnalysisError) -> bool;

    /// Delay before the task re-enters the queue, from `task.retry_count`
    fn get_retry_delay(&self, task: &AnalysisTask) -> Duration;

    /// Retry budget for newly submitted tasks of this type
    fn get_max_retries(&self, analysis_type: AnalysisType) -> u32;
}

/// Category-based policy with a backoff curve and per-type retry budgets
#[derive(Debug, Clone)]
pub struct StandardRetryPolicy {
    default_max_retries: u32,
    type_overrides: HashMap<AnalysisType, u32>,
    backoff: BackoffStrategy,
}

impl StandardRetryPolicy {
    pub fn new(default_max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            default_max_retries,
            type_overrides: HashMap::new(),
            backoff,
        }
    }

    pub fn with_type_override(mut self, analysis_type: AnalysisType, max_retries: u32) -> Self {
        self.type_overrides.insert(analysis_type, max_retries);
        self
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }
}

impl Default for StandardRetryPolicy {
    fn default() -> Self {
        Self::new(crate::models::DEFAULT_MAX_RETRIES, BackoffStrategy::default())
    }
}

impl RetryPolicy for StandardRetryPolicy {
    fn should_retry(&self, task: &AnalysisTask, error: &AnalysisError) -> bool {
        if !task.has_retries_left() {
            return false;
        }
        match error.category() {
            ErrorCategory::Timeout | ErrorCategory::Transient | ErrorCategory::Infrastructure => true,
            ErrorCategory::Validation
            | ErrorCategory::Permanent
            | ErrorCategory::Cancelled
            | ErrorCategory::Internal => false,
        }
    }

    fn get_retry_delay(&self, task: &AnalysisTask) -> Duration {
        self.backoff.delay_for(task.retry_count)
    }

    fn get_max_retries(&self, analysis_type: AnalysisType) -> u32 {
        self.type_overrides
            .get(&analysis_type)
            .copied()
            .unwrap_or(self.default_max_retries)
    }
}

/// Policy that never retries; useful for one-shot analyses and tests
#[derive(Debug, Clone, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn should_retry(&self, _task: &AnalysisTask, _error: &AnalysisError) -> bool {
        false
    }

    fn get_retry_delay(&self, _task: &AnalysisTask) -> Duration {
        Duration::ZERO
    }

    fn get_max_retries(&self, _analysis_type: AnalysisType) -> u32 {
        0
    }
}
