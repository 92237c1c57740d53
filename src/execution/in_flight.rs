//! Registry of attempts currently running on some worker, keyed by task id, plus the
//! retried tasks still waiting to re-enter the queue.
//!
//! Lets the engine core cancel a `processing` task and lets the maintenance sweeps skip
//! tasks that a live worker or a pending requeue still holds.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
struct InFlightAttempt {
    worker_id: String,
    token: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct InFlightRegistry {
    attempts: DashMap<String, InFlightAttempt>,
    requeues: DashSet<String>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an attempt until the returned guard is dropped
    pub fn register(
        self: &Arc<Self>,
        task_id: &str,
        worker_id: &str,
        token: CancellationToken,
    ) -> AttemptGuard {
        let cancel_requested = Arc::new(AtomicBool::new(false));
        self.attempts.insert(
            task_id.to_string(),
            InFlightAttempt {
                worker_id: worker_id.to_string(),
                token: token.clone(),
                cancel_requested: cancel_requested.clone(),
            },
        );
        AttemptGuard {
            registry: Arc::clone(self),
            task_id: task_id.to_string(),
            token,
            cancel_requested,
        }
    }

    /// Like [`register`](Self::register), but `None` when another attempt already
    /// holds the task
    pub fn try_register(
        self: &Arc<Self>,
        task_id: &str,
        worker_id: &str,
        token: CancellationToken,
    ) -> Option<AttemptGuard> {
        let cancel_requested = Arc::new(AtomicBool::new(false));
        match self.attempts.entry(task_id.to_string()) {
            Entry::Occupied(held) => {
                debug!(task_id = %task_id, worker_id = %held.get().worker_id, "Task already has a running attempt");
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlightAttempt {
                    worker_id: worker_id.to_string(),
                    token: token.clone(),
                    cancel_requested: cancel_requested.clone(),
                });
            }
        }
        Some(AttemptGuard {
            registry: Arc::clone(self),
            task_id: task_id.to_string(),
            token,
            cancel_requested,
        })
    }

    /// Mark a task as waiting to re-enter the queue until the hold is dropped
    pub fn hold_requeue(self: &Arc<Self>, task_id: &str) -> RequeueHold {
        self.requeues.insert(task_id.to_string());
        RequeueHold {
            registry: Arc::clone(self),
            task_id: task_id.to_string(),
        }
    }

    pub fn awaiting_requeue(&self, task_id: &str) -> bool {
        self.requeues.contains(task_id)
    }

    /// Cancel the running attempt for `task_id`; false when nothing is running
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.attempts.get(task_id) {
            Some(attempt) => {
                debug!(task_id = %task_id, worker_id = %attempt.worker_id, "Cancelling in-flight attempt");
                attempt.cancel_requested.store(true, Ordering::Release);
                attempt.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.attempts.contains_key(task_id)
    }

    pub fn worker_for(&self, task_id: &str) -> Option<String> {
        self.attempts.get(task_id).map(|a| a.worker_id.clone())
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Handle held by the worker for the duration of one attempt
#[derive(Debug)]
pub struct AttemptGuard {
    registry: Arc<InFlightRegistry>,
    task_id: String,
    token: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
}

impl AttemptGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the attempt was cancelled on request rather than by deadline or shutdown
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        // only remove our own entry; a newer attempt may have re-registered the id
        self.registry.attempts.remove_if(&self.task_id, |_, attempt| {
            Arc::ptr_eq(&attempt.cancel_requested, &self.cancel_requested)
        });
    }
}

/// Held by a deferred requeue until the task is back in the queue or given up on
#[derive(Debug)]
pub struct RequeueHold {
    registry: Arc<InFlightRegistry>,
    task_id: String,
}

impl Drop for RequeueHold {
    fn drop(&mut self) {
        self.registry.requeues.remove(&self.task_id);
    }
}
