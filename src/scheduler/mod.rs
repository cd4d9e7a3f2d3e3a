//! Task Scheduler Module
//!
//! Drains the pending queue and places each task on a node.
//!
//! ## Placement Loop
//! 1. Claim the next ready task (bounded wait, so the loop never busy-spins).
//! 2. Build the candidate set: schedulable peers, or this node if no peer is eligible.
//! 3. Ask the `LoadBalancer` for the best candidate; defer the task if there is none.
//! 4. Assign it, then run it in the local worker pool or hand it to the remote node
//!    on a dedicated spawned task so a slow peer never stalls the loop.
//!
//! The scheduler also owns the receiving side of remote execution: accepting a
//! TASK_ASSIGNMENT from a peer and reporting the TASK_RESULT back to it.

pub mod dispatch;


use crate::balancer::LoadBalancer;
use crate::error::ClusterError;
use crate::executor::executor::TaskExecutor;
use crate::executor::queue::TaskQueue;
use crate::executor::types::{Task, TaskOutcome, TaskStatus};
use crate::health::stats::ClusterStats;
use crate::membership::directory::NodeDirectory;
use crate::membership::types::{NodeId, NodeRecord, NodeStatus};
use crate::protocol::messages::{AssignmentReply, Origin, TaskAssignment, TaskResultReport};
use dispatch::RemoteDispatcher;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// How long one poll of the queue waits for a ready task.
    pub poll_wait: Duration,
    /// Backoff when no node is eligible at all.
    pub empty_backoff: Duration,
    /// Backoff when candidates exist but none matches the task's targets.
    pub unselected_backoff: Duration,
    pub dispatch_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(1),
            empty_backoff: Duration::from_secs(5),
            unselected_backoff: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

/// What the scheduler did with a claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote(NodeId),
    Deferred(Duration),
    /// The task left the pending set while it was being placed (cancelled).
    Dropped,
}

pub struct Scheduler {
    directory: Arc<NodeDirectory>,
    queue: Arc<TaskQueue>,
    balancer: Arc<LoadBalancer>,
    executor: Arc<TaskExecutor>,
    stats: Arc<ClusterStats>,
    dispatcher: RemoteDispatcher,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        directory: Arc<NodeDirectory>,
        queue: Arc<TaskQueue>,
        balancer: Arc<LoadBalancer>,
        executor: Arc<TaskExecutor>,
        stats: Arc<ClusterStats>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            queue,
            balancer,
            executor,
            stats,
            dispatcher: RemoteDispatcher::new(settings.dispatch_timeout),
            settings,
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Runs the placement loop until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Scheduler started on node {}", self.directory.local_id());

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = self.queue.next_ready(self.settings.poll_wait) => {
                    if let Some(task) = next {
                        self.schedule(task);
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Places one claimed task.
    pub fn schedule(self: &Arc<Self>, task: Task) -> Placement {
        let candidates = self.candidates();

        if candidates.is_empty() {
            tracing::debug!(
                "{}, retrying in {:?}",
                ClusterError::NoCandidateNode(task.id.to_string()),
                self.settings.empty_backoff
            );
            self.queue.defer(&task.id, self.settings.empty_backoff);
            return Placement::Deferred(self.settings.empty_backoff);
        }

        let Some(node) = self.balancer.select_best_node(&task, &candidates) else {
            tracing::debug!(
                "No candidate matches task {} (targets: {:?}), retrying in {:?}",
                task.id,
                task.target_nodes,
                self.settings.unselected_backoff
            );
            self.queue.defer(&task.id, self.settings.unselected_backoff);
            return Placement::Deferred(self.settings.unselected_backoff);
        };

        let Some(assigned) = self.queue.assign(&task.id, &node.id) else {
            tracing::debug!("Task {} left the queue before placement", task.id);
            return Placement::Dropped;
        };

        if &node.id == self.directory.local_id() {
            tracing::info!("Running task {} ({}) locally", assigned.id, assigned.task_type);
            self.spawn_local(assigned);
            Placement::Local
        } else {
            tracing::info!(
                "Dispatching task {} ({}) to node {}",
                assigned.id,
                assigned.task_type,
                node.id
            );
            let id = node.id.clone();
            self.spawn_remote(assigned, node);
            Placement::Remote(id)
        }
    }

    /// Schedulable peers, falling back to this node when it is ACTIVE and no peer is.
    pub fn candidates(&self) -> Vec<NodeRecord> {
        let peers: Vec<NodeRecord> = self
            .directory
            .peers()
            .into_iter()
            .filter(NodeRecord::is_schedulable)
            .collect();

        if !peers.is_empty() {
            return peers;
        }

        self.directory
            .local()
            .filter(|local| local.status == NodeStatus::Active)
            .into_iter()
            .collect()
    }

    fn spawn_local(self: &Arc<Self>, task: Task) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let queue = Arc::clone(&scheduler.queue);
            let outcome = scheduler
                .executor
                .execute(&task, || {
                    queue.mark_running(&task.id);
                })
                .await;

            let local = scheduler.directory.local_id().clone();
            scheduler.record_outcome(&task, &local, outcome, false);
        });
    }

    fn spawn_remote(self: &Arc<Self>, task: Task, node: NodeRecord) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let Some(origin) = scheduler.origin() else {
                let outcome = TaskOutcome::failed("local node record is missing");
                scheduler.record_outcome(&task, &node.id, outcome, false);
                return;
            };

            match scheduler.dispatcher.dispatch(&task, &node, origin).await {
                Ok(()) => {
                    tracing::debug!("Node {} accepted task {}", node.id, task.id);
                }
                Err(e) => {
                    tracing::warn!("Dispatch of task {} to {} failed: {}", task.id, node.id, e);
                    scheduler.record_outcome(&task, &node.id, TaskOutcome::failed(e.to_string()), false);
                }
            }
        });
    }

    /// Applies a TASK_RESULT from the node that ran the task. Returns `false` if the
    /// task is unknown, already finished, or assigned to a different node.
    pub fn complete_remote(&self, report: TaskResultReport) -> bool {
        let Some(task) = self.queue.get(&report.task_id) else {
            tracing::warn!("Result for unknown task {}", report.task_id);
            return false;
        };

        if task.assigned_node.as_ref() != Some(&report.node_id) {
            tracing::warn!(
                "Ignoring result for task {} from {}: assigned to {:?}",
                report.task_id,
                report.node_id,
                task.assigned_node
            );
            return false;
        }

        let elapsed = report.execution_time_ms.map(Duration::from_millis);
        let outcome = if report.success {
            TaskOutcome::Completed {
                result: report.result.unwrap_or_default(),
                elapsed: elapsed.unwrap_or_default(),
            }
        } else if report.timed_out {
            TaskOutcome::TimedOut {
                elapsed: elapsed.unwrap_or_default(),
            }
        } else {
            TaskOutcome::Failed {
                error: report
                    .error
                    .unwrap_or_else(|| "remote execution failed".to_string()),
                elapsed,
            }
        };

        self.record_outcome(&task, &report.node_id, outcome, true)
    }

    /// Writes the outcome to the queue and updates history and counters. Outcomes
    /// from a node the task is no longer assigned to change nothing.
    fn record_outcome(&self, task: &Task, node: &NodeId, outcome: TaskOutcome, remote: bool) -> bool {
        let finished = if remote {
            self.queue.complete_remote(&task.id, node, outcome)
        } else {
            self.queue.finish(&task.id, node, outcome)
        };

        let Some(finished) = finished else {
            return false;
        };

        if finished.status == TaskStatus::Completed {
            if let Some(elapsed) = finished.execution_time {
                self.balancer
                    .record_completion(node, &finished.task_type, elapsed);
            }
            self.stats.task_processed();
        } else {
            self.stats.task_failed();
        }

        true
    }

    /// Accepts a task assigned by a peer and runs it here, reporting back when done.
    pub fn host_remote(self: &Arc<Self>, assignment: TaskAssignment) -> AssignmentReply {
        if !self.executor.registry().has_processor(&assignment.task_type) {
            tracing::warn!(
                "Rejecting task {} from {}: no processor for '{}'",
                assignment.task_id,
                assignment.origin.node_id,
                assignment.task_type
            );
            return AssignmentReply::rejected(format!(
                "no processor registered for task type '{}'",
                assignment.task_type
            ));
        }

        let origin = assignment.origin.clone();
        let local = self.directory.local_id().clone();
        let task = assignment.into_task(local.clone());
        let scheduler = Arc::clone(self);

        tracing::info!(
            "Accepted task {} ({}) from node {}",
            task.id,
            task.task_type,
            origin.node_id
        );

        tokio::spawn(async move {
            let outcome = scheduler.executor.execute(&task, || {}).await;
            let report = result_report(&task, local, outcome);

            match scheduler.dispatcher.report(&origin, &report).await {
                Ok(ack) if ack.known => {
                    tracing::debug!("Reported task {} to {}", task.id, origin.node_id);
                }
                Ok(_) => {
                    tracing::warn!("Node {} no longer tracks task {}", origin.node_id, task.id);
                }
                Err(e) => {
                    tracing::warn!("Could not report task {} to {}: {}", task.id, origin.node_id, e);
                }
            }
        });

        AssignmentReply::accepted()
    }

    fn origin(&self) -> Option<Origin> {
        self.directory.local().map(|local| Origin {
            node_id: local.id,
            address: local.address,
            port: local.port,
        })
    }
}

fn result_report(task: &Task, node_id: NodeId, outcome: TaskOutcome) -> TaskResultReport {
    let execution_time_ms = outcome.elapsed().map(|d| d.as_millis() as u64);

    match outcome {
        TaskOutcome::Completed { result, .. } => TaskResultReport {
            task_id: task.id.clone(),
            node_id,
            success: true,
            timed_out: false,
            result: Some(result),
            error: None,
            execution_time_ms,
        },
        TaskOutcome::Failed { error, .. } => TaskResultReport {
            task_id: task.id.clone(),
            node_id,
            success: false,
            timed_out: false,
            result: None,
            error: Some(error),
            execution_time_ms,
        },
        TaskOutcome::TimedOut { .. } => TaskResultReport {
            task_id: task.id.clone(),
            node_id,
            success: false,
            timed_out: true,
            result: None,
            error: Some("task timed out".to_string()),
            execution_time_ms,
        },
    }
}
