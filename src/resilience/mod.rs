//! # Resilience Module
//!
//! Retry decisions for failed analysis attempts.
//!
//! ## Architecture
//!
//! - **Backoff**: pure delay curves keyed by how many retries a task already used
//! - **Retry Policy**: injectable strategy deciding eligibility, delay and per-type
//!   retry budgets; workers only ever talk to the [`RetryPolicy`] trait
//!
//! ## Usage
//!
//! ```rust
//! use analysis_core::resilience::{BackoffStrategy, RetryPolicy, StandardRetryPolicy};
//! use analysis_core::{AnalysisError, AnalysisTask, AnalysisType};
//! use std::time::Duration;
//!
//! let policy = StandardRetryPolicy::new(
//!     3,
//!     BackoffStrategy::Exponential {
//!         base: Duration::from_secs(1),
//!         multiplier: 2.0,
//!         max: Duration::from_secs(60),
//!     },
//! )
//! .with_type_override(AnalysisType::RootCause, 5);
//!
//! let task = AnalysisTask::new("t1", "alert-1", AnalysisType::RootCause).with_max_retries(5);
//! let err = AnalysisError::TransientFailure("upstream 503".into());
//! assert!(policy.should_retry(&task, &err));
//! assert_eq!(policy.get_retry_delay(&task), Duration::from_secs(1));
//! ```

pub mod backoff;
pub mod retry_policy;

pub use backoff::BackoffStrategy;
pub use retry_policy::{NoRetryPolicy, RetryPolicy, StandardRetryPolicy};
