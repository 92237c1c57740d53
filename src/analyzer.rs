//! # Analysis Capability
//!
//! The engine does not know how an alert is analyzed. It hands each claimed task to an
//! [`AnalysisEngine`] together with an [`AttemptContext`] carrying the attempt deadline
//! and a cancellation token, and classifies whatever error comes back.
//!
//! Implementations should forward `ctx.cancel` into their own I/O (HTTP calls to an LLM
//! workflow, for example). The worker enforces the deadline regardless: an attempt that
//! overruns is dropped and reported as [`AnalysisError::Timeout`](crate::AnalysisError::Timeout).

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{AnalysisResult, AnalysisTask};

/// Per-attempt context handed to the capability
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Cancelled at the deadline, on task cancellation and on process shutdown
    pub cancel: CancellationToken,
    pub deadline: Instant,
    /// 1-based attempt number (`retry_count + 1`)
    pub attempt: u32,
    pub worker_id: String,
}

impl AttemptContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Analyze the alert behind `task`. Errors must be classified: return
    /// `TransientFailure` for retryable upstream trouble and `PermanentFailure` or
    /// `InvalidTask` for input that will never succeed.
    async fn analyze(
        &self,
        ctx: &AttemptContext,
        task: &AnalysisTask,
        payload: &Value,
    ) -> Result<AnalysisResult>;

    fn name(&self) -> &str {
        "analysis_engine"
    }
}
