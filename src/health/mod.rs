//! Cluster Health Module
//!
//! A read-only summary of the cluster as one node sees it, derived on demand from
//! the directory snapshot and the task counts. Nothing here mutates state.

pub mod stats;

#[cfg(test)]
mod tests;

use crate::executor::queue::TaskCounts;
use crate::membership::types::{NodeRecord, NodeStatus};
use crate::time::elapsed_between;

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub total_nodes: usize,
    /// ACTIVE nodes whose last heartbeat is within the dead threshold.
    pub active_nodes: usize,
    pub failed_nodes: usize,
    pub pending_tasks: usize,
    /// Tasks placed on a node (ASSIGNED or RUNNING).
    pub running_tasks: usize,
    pub completed_tasks: usize,
    /// FAILED and TIMEOUT tasks.
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub total_tasks: usize,
    /// Mean load over nodes reporting a load above zero.
    pub average_load: f64,
    /// Completed tasks as a percentage of all tracked tasks.
    pub efficiency: f64,
    pub uptime_ms: u64,
}

impl ClusterHealth {
    pub fn compute(
        nodes: &[NodeRecord],
        tasks: &TaskCounts,
        started_at: u64,
        now: u64,
        dead_threshold: Duration,
    ) -> Self {
        let total_nodes = nodes.len();
        let active_nodes = nodes
            .iter()
            .filter(|node| {
                node.status == NodeStatus::Active
                    && elapsed_between(node.last_heartbeat, now) <= dead_threshold
            })
            .count();

        let loads: Vec<f64> = nodes
            .iter()
            .map(|node| node.load_average)
            .filter(|load| *load > 0.0)
            .collect();
        let average_load = if loads.is_empty() {
            0.0
        } else {
            loads.iter().sum::<f64>() / loads.len() as f64
        };

        let total_tasks = tasks.total();
        let efficiency = if total_tasks == 0 {
            100.0
        } else {
            tasks.completed as f64 / total_tasks as f64 * 100.0
        };

        Self {
            total_nodes,
            active_nodes,
            failed_nodes: total_nodes - active_nodes,
            pending_tasks: tasks.pending,
            running_tasks: tasks.active(),
            completed_tasks: tasks.completed,
            failed_tasks: tasks.failed + tasks.timed_out,
            cancelled_tasks: tasks.cancelled,
            total_tasks,
            average_load,
            efficiency,
            uptime_ms: now.saturating_sub(started_at),
        }
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }
}
