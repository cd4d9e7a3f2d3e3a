use crate::membership::types::{NodeId, NodeRole};
use crate::scheduler::SchedulerSettings;

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEAD_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a node needs to know before it starts.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Fixed node id; a random one is generated when unset.
    pub node_id: Option<NodeId>,
    pub bind_addr: SocketAddr,
    /// Host peers should use to reach this node. Defaults to the bound IP, or
    /// the loopback address when bound to a wildcard address.
    pub advertise_host: Option<String>,
    pub role: NodeRole,
    /// `host:port` endpoints registered with on start.
    pub seeds: Vec<String>,
    pub worker_count: usize,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub dead_threshold: Duration,
    /// Bound on every outbound request (connect, write and reply).
    pub dispatch_timeout: Duration,
    /// Bound on reading and answering one inbound connection.
    pub connection_timeout: Duration,
    pub poll_wait: Duration,
    pub empty_backoff: Duration,
    pub unselected_backoff: Duration,
    pub history_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let scheduler = SchedulerSettings::default();

        Self {
            node_id: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            advertise_host: None,
            role: NodeRole::Worker,
            seeds: Vec::new(),
            worker_count: DEFAULT_WORKERS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            dead_threshold: DEFAULT_DEAD_THRESHOLD,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            poll_wait: scheduler.poll_wait,
            empty_backoff: scheduler.empty_backoff,
            unselected_backoff: scheduler.unselected_backoff,
            history_capacity: crate::balancer::history::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ClusterConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(NodeId(id.into()));
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seeds.push(seed.into());
        self
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_wait: self.poll_wait,
            empty_backoff: self.empty_backoff,
            unselected_backoff: self.unselected_backoff,
            dispatch_timeout: self.dispatch_timeout,
        }
    }

    /// Address other nodes are told to connect to, given the address actually bound.
    pub fn advertised_host(&self, bound: SocketAddr) -> String {
        if let Some(host) = &self.advertise_host {
            return host.clone();
        }
        if bound.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            bound.ip().to_string()
        }
    }
}
