//! Observable worker state.
//!
//! [`WorkerStats`] is written only by the owning worker's loop and read concurrently by
//! the pool manager, so every field is an atomic or sits behind a short `parking_lot`
//! lock. [`WorkerStatus`] is the immutable snapshot handed out to callers.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::constants::WorkerState;

/// Snapshot of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,
    pub status: WorkerState,
    pub current_task_id: Option<String>,
    pub processed_count: u64,
    pub error_count: u64,
    pub last_active_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
struct CurrentAttempt {
    task_id: String,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Heartbeat {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct WorkerStats {
    state: AtomicU8,
    loop_alive: AtomicBool,
    processed: AtomicU64,
    errors: AtomicU64,
    current: RwLock<Option<CurrentAttempt>>,
    heartbeat: RwLock<Heartbeat>,
    start_time: DateTime<Utc>,
}

impl WorkerStats {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Stopped.as_u8()),
            loop_alive: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current: RwLock::new(None),
            heartbeat: RwLock::new(Heartbeat::now()),
            start_time: Utc::now(),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn loop_alive(&self) -> bool {
        self.loop_alive.load(Ordering::Acquire)
    }

    pub(crate) fn set_loop_alive(&self, alive: bool) {
        self.loop_alive.store(alive, Ordering::Release);
    }

    pub(crate) fn heartbeat(&self) {
        *self.heartbeat.write() = Heartbeat::now();
    }

    pub(crate) fn last_heartbeat(&self) -> Instant {
        self.heartbeat.read().at
    }

    pub(crate) fn begin_attempt(&self, task_id: &str, deadline: Instant) {
        *self.current.write() = Some(CurrentAttempt {
            task_id: task_id.to_string(),
            deadline,
        });
        self.heartbeat();
    }

    pub(crate) fn end_attempt(&self, failed: bool) {
        *self.current.write() = None;
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.heartbeat();
    }

    /// Infrastructure errors outside an attempt (queue unavailable, claim not persisted)
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn current_deadline(&self) -> Option<Instant> {
        self.current.read().as_ref().map(|attempt| attempt.deadline)
    }

    pub(crate) fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Alive loop that is either idle with a recent heartbeat or busy within its deadline
    pub(crate) fn is_healthy(&self, health_window: Duration, stuck_grace: Duration) -> bool {
        if !self.loop_alive() || self.state() != WorkerState::Running {
            return false;
        }
        let now = Instant::now();
        match self.current_deadline() {
            Some(deadline) => now < deadline + stuck_grace,
            None => now.duration_since(self.last_heartbeat()) <= health_window,
        }
    }

    pub(crate) fn snapshot(&self, id: &str, metadata: HashMap<String, Value>) -> WorkerStatus {
        WorkerStatus {
            id: id.to_string(),
            status: self.state(),
            current_task_id: self.current.read().as_ref().map(|a| a.task_id.clone()),
            processed_count: self.processed_count(),
            error_count: self.error_count(),
            last_active_time: self.heartbeat.read().wall,
            start_time: self.start_time,
            metadata,
        }
    }
}
