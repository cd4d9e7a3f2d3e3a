use crate::membership::types::NodeId;

use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub node_id: NodeId,
    pub task_type: String,
    pub duration: Duration,
}

/// Most recent task completions, oldest dropped first once the cap is reached.
#[derive(Debug)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Mean duration of `task_type` on `node`, if it has run there.
    pub fn average(&self, node: &NodeId, task_type: &str) -> Option<Duration> {
        let (total, count) = self
            .records
            .iter()
            .filter(|r| &r.node_id == node && r.task_type == task_type)
            .fold((Duration::ZERO, 0u32), |(total, count), r| {
                (total + r.duration, count + 1)
            });

        (count > 0).then(|| total / count)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
