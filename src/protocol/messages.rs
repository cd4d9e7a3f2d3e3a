//! Typed Message Bodies
//!
//! Each struct here is what travels inside a [`Frame`](super::Frame) payload for one
//! message type. Optional fields use `#[serde(default)]` so older or terser peers
//! can omit them.

use crate::executor::types::{Task, TaskId};
use crate::health::ClusterHealth;
use crate::health::stats::StatsSnapshot;
use crate::membership::types::{NodeId, NodeRecord};
use crate::protocol::Payload;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// HEARTBEAT request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub node_id: NodeId,
    pub load_average: f64,
    pub tasks_running: u32,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// HEARTBEAT reply. `known == false` asks the sender to register again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub status: String,
    pub known: bool,
}

/// NODE_REGISTRATION reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationReply {
    pub status: String,
    pub cluster_size: usize,
    pub coordinator: Option<NodeId>,
}

/// NODE_DISCOVERY request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub from: NodeId,
}

/// NODE_DISCOVERY reply: every record the responder knows, itself included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub nodes: Vec<NodeRecord>,
}

/// Where a remote node should send the TASK_RESULT for an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Origin {
    pub node_id: NodeId,
    pub address: String,
    pub port: u16,
}

impl Origin {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// TASK_ASSIGNMENT request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub task_type: String,
    pub payload: Payload,
    pub timeout_ms: u64,
    pub origin: Origin,
}

impl TaskAssignment {
    pub fn from_task(task: &Task, origin: Origin) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            timeout_ms: u64::try_from(task.timeout.as_millis()).unwrap_or(u64::MAX),
            origin,
        }
    }

    /// The task as the hosting node runs it.
    pub fn into_task(self, host: NodeId) -> Task {
        let mut task = Task::new(self.task_type, self.payload)
            .with_id(self.task_id)
            .with_timeout(Duration::from_millis(self.timeout_ms));
        task.assigned_node = Some(host);
        task
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Accepted,
    Rejected,
}

/// TASK_ASSIGNMENT reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentReply {
    pub status: AssignmentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AssignmentReply {
    pub fn accepted() -> Self {
        Self {
            status: AssignmentStatus::Accepted,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: AssignmentStatus::Rejected,
            reason: Some(reason.into()),
        }
    }
}

/// TASK_RESULT request, sent by the node that ran the task back to its origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResultReport {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub success: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub result: Option<Payload>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
}

/// TASK_RESULT reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultAck {
    pub status: String,
    pub known: bool,
}

/// SHUTDOWN request: the sender is leaving the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownNotice {
    pub node_id: NodeId,
}

/// CLUSTER_STATUS reply: the responder's view of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatusReply {
    pub node_id: NodeId,
    pub health: ClusterHealth,
    pub nodes: Vec<NodeRecord>,
    pub stats: StatsSnapshot,
}

/// Body of every ERROR frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReply {
    pub error: String,
}

/// Generic `{"status": ...}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusAck {
    pub status: String,
}

impl StatusAck {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}
