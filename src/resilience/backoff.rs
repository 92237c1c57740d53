//! # Backoff Curves
//!
//! Deterministic delay curves. No jitter: the same retry count always yields the same
//! delay so retry scheduling is reproducible in tests and logs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed { delay: Duration },
    /// `step * (retries_used + 1)`, capped at `max`
    Linear { step: Duration, max: Duration },
    /// `base * multiplier^retries_used`, capped at `max`
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before the next attempt, given how many retries were already used.
    ///
    /// Non-decreasing in `retries_used` for every variant.
    pub fn delay_for(&self, retries_used: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { step, max } => step.saturating_mul(retries_used.saturating_add(1)).min(*max),
            Self::Exponential {
                base,
                multiplier,
                max,
            } => {
                let factor = multiplier.max(1.0).powi(retries_used.min(i32::MAX as u32) as i32);
                let millis = base.as_millis() as f64 * factor;
                if !millis.is_finite() || millis >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }
}
