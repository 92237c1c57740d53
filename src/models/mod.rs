//! # Data Models
//!
//! In-memory representations of tasks, results, progress reports and the queue view.

pub mod analysis_result;
pub mod analysis_task;
pub mod progress;
pub mod queue_status;

pub use analysis_result::AnalysisResult;
pub use analysis_task::{AnalysisTask, TaskRequest, DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT};
pub use progress::AnalysisProgress;
pub use queue_status::QueueStatus;
