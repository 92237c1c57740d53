//! # Engine Configuration
//!
//! Layered configuration for the analysis engine: compiled-in defaults, an optional
//! file (TOML, YAML or JSON, picked by extension) and `ANALYSIS__SECTION__KEY`
//! environment overrides, in that order.
//!
//! ```rust,no_run
//! use analysis_core::config::EngineConfig;
//!
//! # fn main() -> analysis_core::Result<()> {
//! // ANALYSIS__POOL__INITIAL_WORKERS=8 overrides the file value
//! let config = EngineConfig::load(Some(std::path::Path::new("config/analysis.toml")))?;
//! println!("starting {} workers", config.pool.initial_workers);
//! # Ok(())
//! # }
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::constants::AnalysisType;
use crate::error::{AnalysisError, Result};
use crate::resilience::{BackoffStrategy, StandardRetryPolicy};

pub const ENV_PREFIX: &str = "ANALYSIS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub pool: PoolConfig,
    pub progress: ProgressConfig,
    pub retry: RetryConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of waiting tasks; 0 means unbounded
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Upper bound on a single blocking pop, which bounds shutdown latency
    pub poll_interval_ms: u64,
    /// An idle worker that has not looped within this window is unhealthy
    pub health_window_secs: u64,
    /// Slack past an attempt deadline before a busy worker counts as stuck
    pub stuck_grace_ms: u64,
    /// How long `stop` waits for the in-flight attempt before abandoning it
    pub stop_timeout_ms: u64,
    pub persist_retry_attempts: u32,
    pub persist_retry_delay_ms: u64,
    pub default_task_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            health_window_secs: 300,
            stuck_grace_ms: 5000,
            stop_timeout_ms: 30_000,
            persist_retry_attempts: 3,
            persist_retry_delay_ms: 200,
            default_task_timeout_secs: 300,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health_window_secs)
    }

    pub fn stuck_grace(&self) -> Duration {
        Duration::from_millis(self.stuck_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn persist_retry_delay(&self) -> Duration {
        Duration::from_millis(self.persist_retry_delay_ms)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub initial_workers: usize,
    pub max_workers: usize,
    pub maintenance_interval_secs: u64,
    /// Extra time past a task deadline before the sweeper reclaims it
    pub expired_task_grace_secs: u64,
    /// How long a `pending` task may sit outside the queue before it is pushed back
    pub stranded_task_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            max_workers: 32,
            maintenance_interval_secs: 30,
            expired_task_grace_secs: 60,
            stranded_task_grace_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn expired_task_grace(&self) -> Duration {
        Duration::from_secs(self.expired_task_grace_secs)
    }

    pub fn stranded_task_grace(&self) -> Duration {
        Duration::from_secs(self.stranded_task_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub ttl_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { ttl_secs: 24 * 60 * 60 }
    }
}

impl ProgressConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Per analysis type retry budgets, keyed by the type's string form
    pub per_type: HashMap<String, u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            per_type: HashMap::new(),
        }
    }
}

impl RetryConfig {
    pub fn backoff_strategy(&self) -> BackoffStrategy {
        let base = Duration::from_millis(self.base_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        match self.backoff {
            BackoffKind::Fixed => BackoffStrategy::Fixed { delay: base },
            BackoffKind::Linear => BackoffStrategy::Linear { step: base, max },
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                base,
                multiplier: self.multiplier,
                max,
            },
        }
    }

    /// Build the default retry policy described by this section
    pub fn build_policy(&self) -> Result<StandardRetryPolicy> {
        let mut policy =
            StandardRetryPolicy::new(self.default_max_retries, self.backoff_strategy());
        for (name, max_retries) in &self.per_type {
            let analysis_type = name.parse::<AnalysisType>().map_err(|_| {
                AnalysisError::Configuration(format!("retry.per_type: unknown analysis type '{name}'"))
            })?;
            policy = policy.with_type_override(analysis_type, *max_retries);
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub channel_capacity: usize,
    /// Registrations older than this are dropped by maintenance
    pub registration_ttl_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            registration_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl NotifierConfig {
    pub fn registration_ttl(&self) -> Duration {
        Duration::from_secs(self.registration_ttl_secs)
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading engine configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AnalysisError::Configuration(msg));

        if self.worker.poll_interval_ms == 0 {
            return fail("worker.poll_interval_ms must be positive".to_string());
        }
        if self.worker.health_window_secs == 0 {
            return fail("worker.health_window_secs must be positive".to_string());
        }
        if self.worker.persist_retry_attempts == 0 {
            return fail("worker.persist_retry_attempts must be at least 1".to_string());
        }
        if self.worker.default_task_timeout_secs == 0 {
            return fail("worker.default_task_timeout_secs must be positive".to_string());
        }
        if self.pool.max_workers == 0 {
            return fail("pool.max_workers must be positive".to_string());
        }
        if self.pool.initial_workers > self.pool.max_workers {
            return fail(format!(
                "pool.initial_workers ({}) exceeds pool.max_workers ({})",
                self.pool.initial_workers, self.pool.max_workers
            ));
        }
        if self.pool.maintenance_interval_secs == 0 {
            return fail("pool.maintenance_interval_secs must be positive".to_string());
        }
        if self.progress.ttl_secs == 0 {
            return fail("progress.ttl_secs must be positive".to_string());
        }
        if self.retry.multiplier < 1.0 {
            return fail(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return fail("retry.max_delay_ms must not be below retry.base_delay_ms".to_string());
        }
        if self.notifier.channel_capacity == 0 {
            return fail("notifier.channel_capacity must be positive".to_string());
        }
        self.retry.build_policy().map(|_| ())
    }
}
