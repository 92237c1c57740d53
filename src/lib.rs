#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Analysis Queue Core
//!
//! In-process engine that runs alert analyses asynchronously: a priority task queue,
//! a pool of concurrent workers, per-attempt deadlines, a pluggable retry policy,
//! expiring progress reports and per-task completion callbacks.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - [`AnalysisCore`], the entry point, and background maintenance
//! - [`execution`] - Workers and the worker pool manager
//! - [`queue`] - Priority/FIFO task queue
//! - [`progress`] - Expiring progress store
//! - [`resilience`] - Retry policies and backoff curves
//! - [`events`] - Callback registry and broadcast notifications
//! - [`repository`] - Task and result persistence contracts
//! - [`analyzer`] - The analysis capability contract
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Lifecycle
//!
//! A task is created `pending`, claimed into `processing` by a worker, and resolved to
//! `completed`, back to `pending` for a retry, or to `failed`. `cancelled` can be
//! reached from `pending` or `processing`. Terminal tasks never change again.
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod analyzer;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod progress;
pub mod queue;
pub mod repository;
pub mod resilience;
pub mod utils;

pub use analyzer::{AnalysisEngine, AttemptContext};
pub use config::EngineConfig;
pub use constants::{AnalysisType, TaskStatus, WorkerState};
pub use error::{AnalysisError, ErrorCategory, Result};
pub use events::{CallbackHandler, Notifier};
pub use execution::{AnalysisWorker, WorkerMetrics, WorkerPoolManager, WorkerStatus};
pub use models::{AnalysisProgress, AnalysisResult, AnalysisTask, QueueStatus, TaskRequest};
pub use orchestration::{AnalysisCore, AnalysisCoreBuilder};
pub use progress::{InMemoryProgressTracker, ProgressTracker};
pub use queue::{InMemoryTaskQueue, TaskQueue};
pub use repository::{
    InMemoryResultRepository, InMemoryTaskRepository, ResultRepository, TaskRepository,
};
pub use resilience::{BackoffStrategy, NoRetryPolicy, RetryPolicy, StandardRetryPolicy};
