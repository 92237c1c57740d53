//! # In-Memory Task Queue
//!
//! Ephemeral priority queue backed by a binary heap with lazy deletion. `remove` and
//! `update_priority` only touch the task index; superseded heap entries are skipped on
//! pop and compacted away once they outnumber live entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{AnalysisError, Result};
use crate::models::{AnalysisTask, QueueStatus};

use super::TaskQueue;

/// Heap slack tolerated before stale entries are compacted
const COMPACTION_SLACK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    priority: i32,
    sequence: u64,
    task_id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then lower sequence (earlier enqueue) first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct QueuedTask {
    task: AnalysisTask,
    sequence: u64,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    tasks: HashMap<String, QueuedTask>,
    /// Enqueue order index, for the oldest waiting task
    fifo: BTreeMap<u64, String>,
    next_sequence: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl QueueState {
    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.tasks.get(&entry.task_id).is_some_and(|queued| {
            queued.sequence == entry.sequence && queued.task.priority == entry.priority
        })
    }

    fn discard_stale_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.is_live(head) {
                break;
            }
            self.heap.pop();
        }
    }

    fn pop_next(&mut self) -> Option<AnalysisTask> {
        self.discard_stale_head();
        let entry = self.heap.pop()?;
        let queued = self.tasks.remove(&entry.task_id)?;
        self.fifo.remove(&queued.sequence);
        self.last_updated = Some(Utc::now());
        Some(queued.task)
    }

    fn take(&mut self, task_id: &str) -> Option<AnalysisTask> {
        let queued = self.tasks.remove(task_id)?;
        self.fifo.remove(&queued.sequence);
        self.last_updated = Some(Utc::now());
        self.maybe_compact();
        Some(queued.task)
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() <= self.tasks.len() * 2 + COMPACTION_SLACK {
            return;
        }
        let entries = std::mem::take(&mut self.heap);
        let live: Vec<HeapEntry> = entries
            .into_iter()
            .filter(|entry| self.is_live(entry))
            .collect();
        self.heap = live.into();
    }
}

/// Process-local [`TaskQueue`]; tasks do not survive a restart
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// 0 means unbounded
    capacity: usize,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn try_pop(&self) -> Option<AnalysisTask> {
        self.state.lock().pop_next()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, task: AnalysisTask) -> Result<()> {
        task.validate()?;
        if task.is_terminal() {
            return Err(AnalysisError::InvalidTask(format!(
                "task {} is already {}",
                task.id, task.status
            )));
        }

        {
            let mut state = self.state.lock();
            if state.tasks.contains_key(&task.id) {
                return Err(AnalysisError::InvalidTask(format!(
                    "task {} is already queued",
                    task.id
                )));
            }
            if self.capacity > 0 && state.tasks.len() >= self.capacity {
                return Err(AnalysisError::Storage(format!(
                    "queue is full ({} tasks)",
                    self.capacity
                )));
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let now = Utc::now();
            state.heap.push(HeapEntry {
                priority: task.priority,
                sequence,
                task_id: task.id.clone(),
            });
            state.fifo.insert(sequence, task.id.clone());
            debug!(
                task_id = %task.id,
                priority = task.priority,
                retry_count = task.retry_count,
                "Task enqueued"
            );
            state.tasks.insert(
                task.id.clone(),
                QueuedTask {
                    task,
                    sequence,
                    enqueued_at: now,
                },
            );
            state.last_updated = Some(now);
        }

        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Result<Option<AnalysisTask>> {
        Ok(self.try_pop())
    }

    async fn pop_with_timeout(&self, timeout: Duration) -> Result<Option<AnalysisTask>> {
        let deadline = Instant::now() + timeout;
        loop {
            // register interest before checking so a push in between is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_pop() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn contains(&self, task_id: &str) -> Result<bool> {
        Ok(self.state.lock().tasks.contains_key(task_id))
    }

    async fn peek(&self) -> Result<Option<AnalysisTask>> {
        let mut state = self.state.lock();
        state.discard_stale_head();
        let task = state
            .heap
            .peek()
            .and_then(|head| state.tasks.get(&head.task_id))
            .map(|queued| queued.task.clone());
        Ok(task)
    }

    async fn remove(&self, task_id: &str) -> Result<AnalysisTask> {
        let removed = self.state.lock().take(task_id);
        match removed {
            Some(task) => {
                debug!(task_id = %task_id, "Task removed from queue");
                Ok(task)
            }
            None => Err(AnalysisError::not_found("queued task", task_id)),
        }
    }

    async fn update_priority(&self, task_id: &str, priority: i32) -> Result<()> {
        let mut state = self.state.lock();
        let sequence = match state.tasks.get_mut(task_id) {
            Some(queued) => {
                queued.task.priority = priority;
                queued.task.updated_at = Utc::now();
                queued.sequence
            }
            None => return Err(AnalysisError::not_found("queued task", task_id)),
        };
        // original sequence keeps its FIFO position within the new priority
        state.heap.push(HeapEntry {
            priority,
            sequence,
            task_id: task_id.to_string(),
        });
        state.last_updated = Some(Utc::now());
        state.maybe_compact();
        debug!(task_id = %task_id, priority, "Task priority updated");
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.state.lock().tasks.len())
    }

    async fn get_status(&self) -> Result<QueueStatus> {
        let state = self.state.lock();
        let oldest_task_time = state
            .fifo
            .first_key_value()
            .and_then(|(_, task_id)| state.tasks.get(task_id))
            .map(|queued| queued.enqueued_at);
        Ok(QueueStatus {
            pending_count: state.tasks.len() as u64,
            oldest_task_time,
            last_updated: state.last_updated.unwrap_or_else(Utc::now),
            ..QueueStatus::empty()
        })
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let dropped = state.tasks.len();
        state.heap.clear();
        state.tasks.clear();
        state.fifo.clear();
        state.last_updated = Some(Utc::now());
        info!(dropped, "Task queue cleared");
        Ok(dropped)
    }
}
