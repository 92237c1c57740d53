//! Scripted analysis capability for integration tests.

use analysis_core::analyzer::{AnalysisEngine, AttemptContext};
use analysis_core::{AnalysisError, AnalysisResult, AnalysisTask, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Succeed after an async delay that honors cancellation
    Succeed(Duration),
    FailTransient,
    FailPermanent,
    /// Fail transiently this many times, then succeed
    FailThenSucceed(u32),
    /// Block the runtime thread; simulates an analysis wedged in sync code
    BlockThread(Duration),
}

#[derive(Debug)]
pub struct ScriptedEngine {
    default: Behavior,
    per_task: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
    cancellations: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            per_task: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behavior::Succeed(Duration::ZERO))
    }

    pub fn with_task(self, task_id: &str, behavior: Behavior) -> Self {
        self.per_task.lock().insert(task_id.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, task_id: &str) -> u32 {
        self.attempts.lock().get(task_id).copied().unwrap_or(0)
    }

    /// Attempts that observed their cancellation token fire
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, task_id: &str) -> Behavior {
        self.per_task
            .lock()
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    fn result_for(task: &AnalysisTask) -> AnalysisResult {
        AnalysisResult::for_task(task)
            .with_confidence(0.87)
            .with_summary(format!("root cause found for {}", task.alert_id))
            .with_recommendations(vec!["restart the ingest pod".to_string()])
            .with_result(json!({"cause": "disk pressure"}))
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn analyze(
        &self,
        ctx: &AttemptContext,
        task: &AnalysisTask,
        _payload: &Value,
    ) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(task.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match self.behavior_for(&task.id) {
            Behavior::Succeed(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(Self::result_for(task)),
                    _ = ctx.cancel.cancelled() => {
                        self.cancellations.fetch_add(1, Ordering::SeqCst);
                        Err(AnalysisError::Cancelled("analysis interrupted".to_string()))
                    }
                }
            }
            Behavior::FailTransient => Err(AnalysisError::TransientFailure(format!(
                "upstream unavailable (attempt {attempt})"
            ))),
            Behavior::FailPermanent => Err(AnalysisError::PermanentFailure(
                "alert payload is malformed".to_string(),
            )),
            Behavior::FailThenSucceed(failures) if attempt <= failures => Err(
                AnalysisError::TransientFailure(format!("flaky upstream (attempt {attempt})")),
            ),
            Behavior::FailThenSucceed(_) => Ok(Self::result_for(task)),
            Behavior::BlockThread(duration) => {
                std::thread::sleep(duration);
                Ok(Self::result_for(task))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
