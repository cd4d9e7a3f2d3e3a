use crate::membership::types::NodeId;
use crate::protocol::Payload;
use crate::time::now_ms;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a task within the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower value runs first.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
    Background = 5,
}

/// Lifecycle of a task.
///
/// ```text
/// PENDING -> ASSIGNED -> RUNNING -> COMPLETED | FAILED | TIMEOUT
///    any non-terminal -> CANCELLED
/// ```
/// ASSIGNED may also go straight to FAILED (dispatch rejected) or TIMEOUT (remote
/// never answered), and ASSIGNED/RUNNING go back to PENDING when their node is
/// evicted and retry budget remains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Cancelled) => true,
            (Pending, Assigned) => true,
            (Assigned, Running | Failed | Timeout | Pending) => true,
            (Running, Completed | Failed | Timeout | Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// A unit of work and everything recorded about its execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Payload,
    pub priority: TaskPriority,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Times the task went back to the queue after losing its node.
    pub attempts: u32,
    /// Declared only; the scheduler does not order by dependencies.
    pub dependencies: Vec<TaskId>,
    pub target_nodes: Option<Vec<NodeId>>,
    pub created_at: u64,
    pub assigned_node: Option<NodeId>,
    pub assigned_at: Option<u64>,
    pub status: TaskStatus,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub execution_time: Option<Duration>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::default(),
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            attempts: 0,
            dependencies: Vec::new(),
            target_nodes: None,
            created_at: now_ms(),
            assigned_node: None,
            assigned_at: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            execution_time: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_target_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.target_nodes = Some(nodes);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { result: Payload, elapsed: Duration },
    Failed { error: String, elapsed: Option<Duration> },
    TimedOut { elapsed: Duration },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
            TaskOutcome::TimedOut { .. } => TaskStatus::Timeout,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            TaskOutcome::Completed { elapsed, .. } | TaskOutcome::TimedOut { elapsed } => {
                Some(*elapsed)
            }
            TaskOutcome::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            error: error.into(),
            elapsed: None,
        }
    }
}
