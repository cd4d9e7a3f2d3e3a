use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters kept by the cluster manager.
#[derive(Debug, Default)]
pub struct ClusterStats {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    nodes_joined: AtomicU64,
    nodes_left: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub nodes_joined: u64,
    pub nodes_left: u64,
}

impl ClusterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_processed(&self) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_joined(&self) {
        self.nodes_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nodes_left(&self, count: usize) {
        self.nodes_left.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            nodes_joined: self.nodes_joined.load(Ordering::Relaxed),
            nodes_left: self.nodes_left.load(Ordering::Relaxed),
        }
    }
}
