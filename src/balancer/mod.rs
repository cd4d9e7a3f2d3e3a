//! Load Balancer Module
//!
//! Picks the node a task should run on. Every candidate gets a score from its load,
//! its running task count, its reported CPU and memory use and how fast it ran the
//! same task type before; the highest score wins.
//!
//! Scoring is deterministic: equal scores go to the smallest node id.

pub mod history;


use crate::executor::types::Task;
use crate::membership::types::{NodeId, NodeRecord, NodeStatus};
use history::{ExecutionHistory, ExecutionRecord};

use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::Duration;

const BASE_SCORE: f64 = 100.0;
const LOAD_PENALTY: f64 = 20.0;
const RUNNING_TASK_PENALTY: f64 = 5.0;
const HISTORY_BONUS: f64 = 10.0;
const MEMORY_PENALTY: f64 = 30.0;
const CPU_PENALTY: f64 = 25.0;
const IDLE_BONUS: f64 = 20.0;
const NO_TASKS_BONUS: f64 = 10.0;

pub struct LoadBalancer {
    history: Mutex<ExecutionHistory>,
}

impl LoadBalancer {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: Mutex::new(ExecutionHistory::new(history_capacity)),
        }
    }

    fn history(&self) -> std::sync::MutexGuard<'_, ExecutionHistory> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Chooses the best node for `task` among `candidates`.
    ///
    /// When the task names target nodes, only those candidates are considered, and
    /// `None` is returned if none of them is present.
    pub fn select_best_node(&self, task: &Task, candidates: &[NodeRecord]) -> Option<NodeRecord> {
        let history = self.history();

        candidates
            .iter()
            .filter(|node| match &task.target_nodes {
                Some(targets) => targets.contains(&node.id),
                None => true,
            })
            .map(|node| (Self::score_with(&history, node, task), node))
            .max_by(|(a_score, a), (b_score, b)| {
                a_score
                    .partial_cmp(b_score)
                    .unwrap_or(Ordering::Equal)
                    // on equal scores the smaller id ranks higher
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|(score, node)| {
                tracing::debug!("Selected node {} for task {} (score {:.2})", node.id, task.id, score);
                node.clone()
            })
    }

    /// Score of `node` for `task`; never negative.
    pub fn score(&self, node: &NodeRecord, task: &Task) -> f64 {
        Self::score_with(&self.history(), node, task)
    }

    fn score_with(history: &ExecutionHistory, node: &NodeRecord, task: &Task) -> f64 {
        let mut score = BASE_SCORE;

        score -= node.load_average * LOAD_PENALTY;
        score -= f64::from(node.tasks_running) * RUNNING_TASK_PENALTY;

        if let Some(average) = history.average(&node.id, &task.task_type) {
            let seconds = average.as_secs_f64();
            if seconds > 0.0 {
                score += HISTORY_BONUS / seconds;
            }
        }

        score -= node.memory_fraction() * MEMORY_PENALTY;
        score -= node.cpu_fraction() * CPU_PENALTY;

        if node.status == NodeStatus::Idle {
            score += IDLE_BONUS;
        } else if node.tasks_running == 0 {
            score += NO_TASKS_BONUS;
        }

        score.max(0.0)
    }

    pub fn record_completion(&self, node: &NodeId, task_type: &str, duration: Duration) {
        self.history().push(ExecutionRecord {
            node_id: node.clone(),
            task_type: task_type.to_string(),
            duration,
        });
    }

    pub fn average_execution_time(&self, node: &NodeId, task_type: &str) -> Option<Duration> {
        self.history().average(node, task_type)
    }

    pub fn history_len(&self) -> usize {
        self.history().len()
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(history::DEFAULT_HISTORY_CAPACITY)
    }
}
