//! Worker Pool Implementation
//!
//! Runs tasks on this node. The pool is bounded by a semaphore; callers beyond the
//! worker count wait for a permit instead of being rejected.
//!
//! ## Responsibilities
//! - **Bounding**: At most `worker_count` processors run at once.
//! - **Execution**: Invoking the processor registered for the task's type.
//! - **Isolation**: Each processor runs on its own spawned task under the task
//!   timeout, so errors, panics and hangs all end as a [`TaskOutcome`].

use super::registry::ProcessorRegistry;
use super::types::*;
use crate::error::ClusterError;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;

/// The engine that drives local task execution.
pub struct TaskExecutor {
    /// Processors resolved by task type at execution time.
    registry: Arc<ProcessorRegistry>,
    permits: Arc<Semaphore>,
    worker_count: usize,
    running: AtomicUsize,
    completed: AtomicU64,
}

impl TaskExecutor {
    /// Creates a new TaskExecutor.
    ///
    /// # Arguments
    /// * `worker_count`: Maximum number of tasks executing concurrently (at least 1).
    pub fn new(registry: Arc<ProcessorRegistry>, worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        tracing::info!("Task executor ready with {} workers", worker_count);

        Arc::new(Self {
            registry,
            permits: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tasks currently holding a worker.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Tasks this pool finished successfully.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Waits for a free worker, calls `on_start`, then runs the task to an outcome.
    pub async fn execute<F>(&self, task: &Task, on_start: F) -> TaskOutcome
    where
        F: FnOnce(),
    {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::failed("worker pool is closed"),
        };

        on_start();
        self.running.fetch_add(1, Ordering::Relaxed);
        let outcome = self.run(task).await;
        self.running.fetch_sub(1, Ordering::Relaxed);

        match &outcome {
            TaskOutcome::Completed { elapsed, .. } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Task {} completed in {:?}", task.id, elapsed);
            }
            TaskOutcome::Failed { error, .. } => {
                tracing::error!("Task {} failed: {}", task.id, error);
            }
            TaskOutcome::TimedOut { elapsed } => {
                tracing::warn!("Task {} timed out after {:?}", task.id, elapsed);
            }
        }

        outcome
    }

    /// Runs the task through the registry on a dedicated task, bounded by the task timeout.
    async fn run(&self, task: &Task) -> TaskOutcome {
        if !self.registry.has_processor(&task.task_type) {
            return TaskOutcome::failed(ClusterError::NoProcessor(task.task_type.clone()).to_string());
        }

        let started = Instant::now();
        let registry = Arc::clone(&self.registry);
        let job = task.clone();
        let mut handle = tokio::spawn(async move { registry.execute(&job).await });

        match tokio::time::timeout(task.timeout, &mut handle).await {
            Ok(Ok(Ok(result))) => TaskOutcome::Completed {
                result,
                elapsed: started.elapsed(),
            },
            Ok(Ok(Err(e))) => TaskOutcome::Failed {
                error: e.to_string(),
                elapsed: Some(started.elapsed()),
            },
            Ok(Err(join_error)) => {
                let error = if join_error.is_panic() {
                    "processor panicked".to_string()
                } else {
                    format!("processor was aborted: {join_error}")
                };
                TaskOutcome::Failed {
                    error,
                    elapsed: Some(started.elapsed()),
                }
            }
            Err(_) => {
                handle.abort();
                TaskOutcome::TimedOut {
                    elapsed: started.elapsed(),
                }
            }
        }
    }
}
