//! # Completion Notifier
//!
//! Keyed registry of per-task callbacks plus a broadcast feed of every notification.
//!
//! Registrations are explicit: a caller registers handlers for a task id and they are
//! dropped when the task reaches a terminal notification, on `unregister_callback`, or
//! by `cleanup_expired` once older than the registration TTL. Abandoned tasks therefore
//! cannot leak handlers.

use dashmap::DashMap;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::events;
use crate::error::AnalysisError;
use crate::models::{AnalysisProgress, AnalysisResult, AnalysisTask};

use super::publisher::{EventPublisher, PublishedEvent};

pub type CompletedCallback = Arc<dyn Fn(&AnalysisTask, &AnalysisResult) + Send + Sync>;
pub type FailedCallback = Arc<dyn Fn(&AnalysisTask, &AnalysisError) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(&AnalysisProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Completed,
    Failed,
    Progress,
}

/// One handler in a task's registration
#[derive(Clone)]
pub enum CallbackHandler {
    Completed(CompletedCallback),
    Failed(FailedCallback),
    Progress(ProgressCallback),
}

impl CallbackHandler {
    pub fn on_completed<F>(f: F) -> Self
    where
        F: Fn(&AnalysisTask, &AnalysisResult) + Send + Sync + 'static,
    {
        Self::Completed(Arc::new(f))
    }

    pub fn on_failed<F>(f: F) -> Self
    where
        F: Fn(&AnalysisTask, &AnalysisError) + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(f))
    }

    pub fn on_progress<F>(f: F) -> Self
    where
        F: Fn(&AnalysisProgress) + Send + Sync + 'static,
    {
        Self::Progress(Arc::new(f))
    }

    pub fn kind(&self) -> CallbackKind {
        match self {
            Self::Completed(_) => CallbackKind::Completed,
            Self::Failed(_) => CallbackKind::Failed,
            Self::Progress(_) => CallbackKind::Progress,
        }
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallbackHandler").field(&self.kind()).finish()
    }
}

#[derive(Debug)]
struct Registration {
    handlers: Vec<CallbackHandler>,
    registered_at: Instant,
}

#[derive(Debug)]
pub struct Notifier {
    registrations: DashMap<String, Registration>,
    publisher: EventPublisher,
    registration_ttl: Duration,
}

impl Notifier {
    pub fn new(channel_capacity: usize, registration_ttl: Duration) -> Self {
        Self {
            registrations: DashMap::new(),
            publisher: EventPublisher::new(channel_capacity),
            registration_ttl,
        }
    }

    /// Add a handler to the task's registration, creating it if needed
    pub fn register_callback(&self, task_id: &str, handler: CallbackHandler) {
        debug!(task_id = %task_id, kind = ?handler.kind(), "Callback registered");
        self.registrations
            .entry(task_id.to_string())
            .or_insert_with(|| Registration {
                handlers: Vec::new(),
                registered_at: Instant::now(),
            })
            .handlers
            .push(handler);
    }

    /// Drop every handler for the task. Idempotent: returns whether anything was removed.
    pub fn unregister_callback(&self, task_id: &str) -> bool {
        self.registrations.remove(task_id).is_some()
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.registrations.contains_key(task_id)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// Fire completion handlers and release the registration
    pub fn notify_completed(&self, task: &AnalysisTask, result: &AnalysisResult) {
        if let Err(e) = self.publisher.publish(events::TASK_COMPLETED, &task.id, result) {
            warn!(task_id = %task.id, error = %e, "Failed to publish completion event");
        }
        for handler in self.take_handlers(&task.id) {
            if let CallbackHandler::Completed(callback) = handler {
                callback(task, result);
            }
        }
    }

    /// Fire failure handlers and release the registration
    pub fn notify_failed(&self, task: &AnalysisTask, error: &AnalysisError) {
        let context = json!({
            "error": error.to_string(),
            "category": error.category(),
            "status": task.status,
            "retry_count": task.retry_count,
        });
        if let Err(e) = self.publisher.publish(events::TASK_FAILED, &task.id, &context) {
            warn!(task_id = %task.id, error = %e, "Failed to publish failure event");
        }
        for handler in self.take_handlers(&task.id) {
            if let CallbackHandler::Failed(callback) = handler {
                callback(task, error);
            }
        }
    }

    /// Fire progress handlers; the registration stays in place
    pub fn notify_progress(&self, progress: &AnalysisProgress) {
        if let Err(e) = self
            .publisher
            .publish(events::TASK_PROGRESS, &progress.task_id, progress)
        {
            warn!(task_id = %progress.task_id, error = %e, "Failed to publish progress event");
        }
        // clone out so no shard lock is held while user code runs
        let handlers: Vec<ProgressCallback> = self
            .registrations
            .get(&progress.task_id)
            .map(|registration| {
                registration
                    .handlers
                    .iter()
                    .filter_map(|handler| match handler {
                        CallbackHandler::Progress(callback) => Some(callback.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for callback in handlers {
            callback(progress);
        }
    }

    /// Drop registrations older than the TTL
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.registrations.len();
        self.registrations.retain(|task_id, registration| {
            let keep = now.duration_since(registration.registered_at) < self.registration_ttl;
            if !keep {
                debug!(task_id = %task_id, "Expired callback registration dropped");
            }
            keep
        });
        before.saturating_sub(self.registrations.len())
    }

    fn take_handlers(&self, task_id: &str) -> Vec<CallbackHandler> {
        self.registrations
            .remove(task_id)
            .map(|(_, registration)| registration.handlers)
            .unwrap_or_default()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(24 * 60 * 60))
    }
}
