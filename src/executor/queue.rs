//! Task Lifecycle Book
//!
//! Holds every task this node has accepted, from submission to its terminal state.
//! All moves between the pending, active and finished sets happen under one mutex
//! so a task is never observed in two sets, or in none.
//!
//! ## Responsibilities
//! - **Ordering**: Pending tasks are handed out by priority, FIFO within a priority.
//! - **Deferral**: A task that cannot be placed stays pending with a "ready at" instant.
//! - **Transitions**: Every status change is checked against [`TaskStatus::can_transition_to`].
//! - **Recovery**: Tasks stranded on an evicted node go back to pending while retries remain.

use super::types::*;
use crate::error::{ClusterError, Result};
use crate::membership::types::NodeId;
use crate::time::{elapsed_between, now_ms};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

type PendingKey = (TaskPriority, u64);

#[derive(Debug)]
struct PendingSlot {
    id: TaskId,
    ready_at: Instant,
    /// Handed to the scheduler and awaiting a placement decision.
    claimed: bool,
}

#[derive(Debug, Default)]
struct Book {
    tasks: HashMap<TaskId, Task>,
    pending: BTreeMap<PendingKey, PendingSlot>,
    pending_keys: HashMap<TaskId, PendingKey>,
    next_seq: u64,
}

impl Book {
    fn push_pending(&mut self, id: TaskId, priority: TaskPriority, ready_at: Instant) {
        let key = (priority, self.next_seq);
        self.next_seq += 1;
        self.pending_keys.insert(id.clone(), key);
        self.pending.insert(
            key,
            PendingSlot {
                id,
                ready_at,
                claimed: false,
            },
        );
    }

    fn take_pending(&mut self, id: &TaskId) -> bool {
        match self.pending_keys.remove(id) {
            Some(key) => self.pending.remove(&key).is_some(),
            None => false,
        }
    }

    fn assigned_to(&self, id: &TaskId, node: &NodeId) -> bool {
        let Some(task) = self.tasks.get(id) else {
            return false;
        };
        if task.assigned_node.as_ref() == Some(node) {
            return true;
        }
        tracing::debug!(
            "Ignoring outcome of task {} from {}: assigned to {:?}",
            id,
            node,
            task.assigned_node
        );
        false
    }

    fn transition(&mut self, id: &TaskId, next: TaskStatus) -> Option<&mut Task> {
        let task = self.tasks.get_mut(id)?;
        if !task.status.can_transition_to(next) {
            tracing::debug!(
                "Ignoring transition of task {} from {} to {}",
                id,
                task.status,
                next
            );
            return None;
        }
        task.status = next;
        Some(task)
    }
}

/// Task totals per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending
            + self.assigned
            + self.running
            + self.completed
            + self.failed
            + self.cancelled
            + self.timed_out
    }

    /// Tasks placed on a node and not yet finished.
    pub fn active(&self) -> usize {
        self.assigned + self.running
    }
}

/// Result of handing a lost node's tasks back to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanReport {
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

pub struct TaskQueue {
    book: Mutex<Book>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accepts a new task in PENDING state.
    pub fn enqueue(&self, mut task: Task) -> Result<TaskId> {
        let id = task.id.clone();
        {
            let mut book = self.lock();
            if book.tasks.contains_key(&id) {
                return Err(ClusterError::DuplicateTask(id.to_string()));
            }

            task.status = TaskStatus::Pending;
            book.push_pending(id.clone(), task.priority, Instant::now());
            book.tasks.insert(id.clone(), task);
        }

        tracing::debug!("Queued task {}", id);
        self.notify.notify_one();
        Ok(id)
    }

    /// Claims the next ready pending task, waiting up to `wait` for one to appear.
    ///
    /// The claimed task stays PENDING until [`assign`](Self::assign) or
    /// [`defer`](Self::defer) is called for it.
    pub async fn next_ready(&self, wait: Duration) -> Option<Task> {
        let deadline = Instant::now() + wait;

        loop {
            let now = Instant::now();
            let next_wake = {
                let mut book = self.lock();
                let mut earliest: Option<Instant> = None;
                let mut ready: Option<TaskId> = None;

                for slot in book.pending.values_mut() {
                    if slot.claimed {
                        continue;
                    }
                    if slot.ready_at <= now {
                        slot.claimed = true;
                        ready = Some(slot.id.clone());
                        break;
                    }
                    earliest = Some(earliest.map_or(slot.ready_at, |e| e.min(slot.ready_at)));
                }

                if let Some(id) = ready {
                    return book.tasks.get(&id).cloned();
                }

                earliest.map_or(deadline, |e| e.min(deadline))
            };

            if now >= deadline {
                return None;
            }

            let _ = tokio::time::timeout_at(next_wake, self.notify.notified()).await;
        }
    }

    /// Releases a claimed task back to the pending set, not to be handed out
    /// again before `backoff` has passed.
    pub fn defer(&self, id: &TaskId, backoff: Duration) -> bool {
        let deferred = {
            let mut book = self.lock();
            match book.pending_keys.get(id).copied() {
                Some(key) => match book.pending.get_mut(&key) {
                    Some(slot) => {
                        slot.claimed = false;
                        slot.ready_at = Instant::now() + backoff;
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };

        if deferred {
            tracing::debug!("Deferred task {} for {:?}", id, backoff);
            self.notify.notify_one();
        }
        deferred
    }

    /// Moves a pending task to the active set as ASSIGNED to `node`.
    ///
    /// Returns `None` if the task is no longer pending (e.g. it was cancelled).
    pub fn assign(&self, id: &TaskId, node: &NodeId) -> Option<Task> {
        let mut book = self.lock();
        if !book.take_pending(id) {
            return None;
        }

        let task = book.transition(id, TaskStatus::Assigned)?;
        task.assigned_node = Some(node.clone());
        task.assigned_at = Some(now_ms());
        Some(task.clone())
    }

    pub fn mark_running(&self, id: &TaskId) -> bool {
        self.lock().transition(id, TaskStatus::Running).is_some()
    }

    /// Records the terminal outcome of an active task placed on `node`.
    ///
    /// An outcome from a node the task is no longer assigned to (it was requeued
    /// and placed elsewhere meanwhile) is ignored.
    pub fn finish(&self, id: &TaskId, node: &NodeId, outcome: TaskOutcome) -> Option<Task> {
        let mut book = self.lock();
        if !book.assigned_to(id, node) {
            return None;
        }

        let status = outcome.status();
        let elapsed = outcome.elapsed();
        let task = book.transition(id, status)?;

        match outcome {
            TaskOutcome::Completed { result, .. } => {
                task.result = Some(result);
                task.error = None;
            }
            TaskOutcome::Failed { error, .. } => task.error = Some(error),
            TaskOutcome::TimedOut { elapsed } => {
                task.error = Some(format!("task timed out after {elapsed:?}"));
            }
        }
        task.execution_time = elapsed.or(task.execution_time);

        Some(task.clone())
    }

    /// Records an outcome reported by a remote node. The task passes through
    /// RUNNING on its way to the terminal state.
    pub fn complete_remote(&self, id: &TaskId, node: &NodeId, outcome: TaskOutcome) -> Option<Task> {
        {
            let mut book = self.lock();
            if !book.assigned_to(id, node) {
                return None;
            }
            if book.tasks.get(id)?.status == TaskStatus::Assigned {
                book.transition(id, TaskStatus::Running);
            }
        }
        self.finish(id, node, outcome)
    }

    /// Cancels a task that is still waiting in the pending set.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut book = self.lock();
        if !book.take_pending(id) {
            return false;
        }

        let cancelled = book.transition(id, TaskStatus::Cancelled).is_some();
        if cancelled {
            tracing::info!("Cancelled task {}", id);
        }
        cancelled
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().tasks.contains_key(id)
    }

    pub fn counts(&self) -> TaskCounts {
        let book = self.lock();
        let mut counts = TaskCounts::default();

        for task in book.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Assigned => counts.assigned += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::Timeout => counts.timed_out += 1,
            }
        }

        counts
    }

    /// Returns tasks that were active on any of `lost` to the pending set, or fails
    /// them once their retry budget is spent.
    pub fn requeue_orphans(&self, lost: &[NodeId]) -> OrphanReport {
        let mut report = OrphanReport::default();
        if lost.is_empty() {
            return report;
        }

        {
            let mut book = self.lock();
            let orphans: Vec<TaskId> = book
                .tasks
                .values()
                .filter(|task| {
                    matches!(task.status, TaskStatus::Assigned | TaskStatus::Running)
                        && task
                            .assigned_node
                            .as_ref()
                            .is_some_and(|node| lost.contains(node))
                })
                .map(|task| task.id.clone())
                .collect();

            for id in orphans {
                let Some(task) = book.tasks.get_mut(&id) else {
                    continue;
                };
                let node = task.assigned_node.take();

                if task.attempts < task.max_retries {
                    task.attempts += 1;
                    task.status = TaskStatus::Pending;
                    task.assigned_at = None;
                    let priority = task.priority;
                    tracing::warn!(
                        "Requeueing task {} after losing node {:?} (attempt {}/{})",
                        id,
                        node,
                        task.attempts,
                        task.max_retries
                    );
                    book.push_pending(id.clone(), priority, Instant::now());
                    report.requeued.push(id);
                } else {
                    task.status = TaskStatus::Failed;
                    task.error = Some(match &node {
                        Some(node) => format!("node {node} was lost and retries are exhausted"),
                        None => "node was lost and retries are exhausted".to_string(),
                    });
                    task.assigned_node = node;
                    tracing::error!("Task {} failed: retries exhausted", id);
                    report.failed.push(id);
                }
            }
        }

        if !report.requeued.is_empty() {
            self.notify.notify_one();
        }
        report
    }

    /// Times out tasks placed on remote nodes that have not reported back within
    /// their own timeout plus `grace`.
    pub fn expire_overdue(&self, local: &NodeId, now: u64, grace: Duration) -> Vec<TaskId> {
        let mut book = self.lock();
        let mut expired = Vec::new();

        for task in book.tasks.values_mut() {
            if !matches!(task.status, TaskStatus::Assigned | TaskStatus::Running) {
                continue;
            }
            let remote = task.assigned_node.as_ref().is_some_and(|node| node != local);
            let Some(assigned_at) = task.assigned_at else {
                continue;
            };
            if !remote {
                continue;
            }

            let elapsed = elapsed_between(assigned_at, now);
            if elapsed > task.timeout.saturating_add(grace) {
                task.status = TaskStatus::Timeout;
                task.error = Some(format!("no result from remote node after {elapsed:?}"));
                task.execution_time = Some(elapsed);
                tracing::warn!("Task {} timed out on {:?}", task.id, task.assigned_node);
                expired.push(task.id.clone());
            }
        }

        expired
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
