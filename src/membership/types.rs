use crate::error::ClusterError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metadata key carrying the node's CPU utilisation in percent.
pub const META_CPU_PERCENT: &str = "cpu_percent";
/// Metadata key carrying the node's memory utilisation in percent.
pub const META_MEMORY_PERCENT: &str = "memory_percent";

/// Utilisation assumed when a node has not reported a figure.
const DEFAULT_UTILISATION_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Master,
    Worker,
    Coordinator,
    Observer,
}

impl NodeRole {
    /// Whether registration replies should name this node as the coordinator.
    pub fn coordinates(self) -> bool {
        matches!(self, NodeRole::Master | NodeRole::Coordinator)
    }
}

impl FromStr for NodeRole {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "worker" => Ok(NodeRole::Worker),
            "coordinator" => Ok(NodeRole::Coordinator),
            "observer" => Ok(NodeRole::Observer),
            other => Err(ClusterError::Registration(format!("unknown node role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Initializing,
    Active,
    Busy,
    Idle,
    Disconnected,
    Failed,
    Maintenance,
}

/// Static hardware capacity advertised at registration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capacity {
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

/// Everything the directory knows about one node.
///
/// `last_heartbeat` is a millisecond timestamp taken from the *receiving* node's
/// clock, so staleness is always judged locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub role: NodeRole,
    pub status: NodeStatus,
    #[serde(default)]
    pub capacity: Capacity,
    #[serde(default)]
    pub last_heartbeat: u64,
    #[serde(default)]
    pub load_average: f64,
    #[serde(default)]
    pub tasks_running: u32,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl NodeRecord {
    pub fn new(id: NodeId, address: impl Into<String>, port: u16, role: NodeRole) -> Self {
        Self {
            id,
            hostname: String::new(),
            address: address.into(),
            port,
            role,
            status: NodeStatus::Initializing,
            capacity: Capacity::default(),
            last_heartbeat: 0,
            load_average: 0.0,
            tasks_running: 0,
            tasks_completed: 0,
            capabilities: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// ACTIVE and IDLE nodes may receive work.
    pub fn is_schedulable(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Idle)
    }

    pub fn cpu_fraction(&self) -> f64 {
        self.utilisation(META_CPU_PERCENT) / 100.0
    }

    pub fn memory_fraction(&self) -> f64 {
        self.utilisation(META_MEMORY_PERCENT) / 100.0
    }

    fn utilisation(&self, key: &str) -> f64 {
        self.metadata
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_UTILISATION_PERCENT)
    }

    /// Checks the fields a registration must carry.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.id.0.trim().is_empty() {
            return Err(ClusterError::Registration("node id is empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(ClusterError::Registration(format!(
                "node {} has no address",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(ClusterError::Registration(format!(
                "node {} advertised port 0",
                self.id
            )));
        }
        Ok(())
    }
}
