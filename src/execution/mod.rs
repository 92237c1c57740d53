//! # Execution
//!
//! Workers that claim tasks from the queue and drive them to a resolution, and the
//! pool manager that owns them.

pub mod context;
pub mod in_flight;
pub mod worker;
pub mod worker_pool;
pub mod worker_status;

pub use context::{CompletionOutcome, FailureOutcome, WorkerContext};
pub use in_flight::{AttemptGuard, InFlightRegistry, RequeueHold};
pub use worker::AnalysisWorker;
pub use worker_pool::{WorkerMetrics, WorkerPoolManager};
pub use worker_status::WorkerStatus;
