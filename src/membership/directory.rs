//! Node Directory
//!
//! The authoritative membership table of one node. Records are inserted by
//! registration, refreshed by heartbeats and evicted only by [`NodeDirectory::sweep`]
//! once they go quiet for longer than the dead threshold.

use super::types::{NodeId, NodeRecord, NodeStatus};
use crate::error::{ClusterError, Result};
use crate::protocol::messages::Heartbeat;
use crate::time::elapsed_between;

use dashmap::DashMap;
use std::time::Duration;

/// Weight of a fresh heartbeat sample in the smoothed load average.
const LOAD_SMOOTHING: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Joined,
    Updated,
}

pub struct NodeDirectory {
    local_id: NodeId,
    nodes: DashMap<NodeId, NodeRecord>,
    dead_threshold: Duration,
}

impl NodeDirectory {
    pub fn new(local: NodeRecord, dead_threshold: Duration) -> Self {
        let nodes = DashMap::new();
        let local_id = local.id.clone();
        nodes.insert(local_id.clone(), local);

        Self {
            local_id,
            nodes,
            dead_threshold,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn dead_threshold(&self) -> Duration {
        self.dead_threshold
    }

    pub fn local(&self) -> Option<NodeRecord> {
        self.get(&self.local_id)
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeRecord> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All records, ordered by node id.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Every record except the local one, ordered by node id.
    pub fn peers(&self) -> Vec<NodeRecord> {
        self.snapshot()
            .into_iter()
            .filter(|node| node.id != self.local_id)
            .collect()
    }

    /// Inserts or refreshes a remote node.
    ///
    /// Re-registering an id replaces the advertised fields of the existing entry
    /// instead of adding a second one. The heartbeat clock only moves forward.
    pub fn register(&self, mut record: NodeRecord, now: u64) -> Result<Registration> {
        record.validate()?;

        if record.id == self.local_id {
            return Err(ClusterError::Registration(format!(
                "node id {} collides with the local node",
                record.id
            )));
        }

        match self.nodes.get_mut(&record.id) {
            Some(mut existing) => {
                record.last_heartbeat = existing.last_heartbeat.max(now);
                *existing = record;
                tracing::debug!("Refreshed registration of node {}", existing.id);
                Ok(Registration::Updated)
            }
            None => {
                record.last_heartbeat = now;
                tracing::info!(
                    "Node registered: {} ({}) at {}",
                    record.id,
                    record.hostname,
                    record.endpoint()
                );
                self.nodes.insert(record.id.clone(), record);
                Ok(Registration::Joined)
            }
        }
    }

    /// Applies a heartbeat. Returns `false` if the sender is not in the directory.
    pub fn apply_heartbeat(&self, heartbeat: &Heartbeat, now: u64) -> bool {
        if heartbeat.node_id == self.local_id {
            return true;
        }

        let Some(mut node) = self.nodes.get_mut(&heartbeat.node_id) else {
            tracing::debug!("Heartbeat from unknown node {}", heartbeat.node_id);
            return false;
        };

        node.last_heartbeat = node.last_heartbeat.max(now);
        node.load_average = LOAD_SMOOTHING * heartbeat.load_average
            + (1.0 - LOAD_SMOOTHING) * node.load_average;
        node.tasks_running = heartbeat.tasks_running;
        node.tasks_completed = node.tasks_completed.max(heartbeat.tasks_completed);
        node.metadata
            .extend(heartbeat.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        if node.status == NodeStatus::Disconnected {
            tracing::info!("Node {} is sending heartbeats again", node.id);
            node.status = NodeStatus::Active;
        }

        true
    }

    /// Adds records learned through discovery that were not known yet.
    pub fn merge_discovered(&self, records: Vec<NodeRecord>, now: u64) -> Vec<NodeId> {
        let mut added = Vec::new();

        for record in records {
            if record.id == self.local_id || self.nodes.contains_key(&record.id) {
                continue;
            }
            let id = record.id.clone();
            match self.register(record, now) {
                Ok(_) => added.push(id),
                Err(e) => tracing::warn!("Ignoring discovered node {}: {}", id, e),
            }
        }

        added
    }

    /// Marks a departing node so it stops receiving work. The sweep removes it later.
    pub fn mark_disconnected(&self, id: &NodeId) -> bool {
        if id == &self.local_id {
            return false;
        }
        match self.nodes.get_mut(id) {
            Some(mut node) => {
                node.status = NodeStatus::Disconnected;
                tracing::info!("Node {} announced shutdown", id);
                true
            }
            None => false,
        }
    }

    pub fn update_local<F>(&self, update: F)
    where
        F: FnOnce(&mut NodeRecord),
    {
        if let Some(mut local) = self.nodes.get_mut(&self.local_id) {
            update(local.value_mut());
        }
    }

    /// Evicts every non-local node silent for longer than the dead threshold.
    pub fn sweep(&self, now: u64) -> Vec<NodeRecord> {
        let stale: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| entry.key() != &self.local_id && self.is_stale(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());

        for id in stale {
            // Re-check under the shard lock: a heartbeat may have landed meanwhile.
            if let Some((_, record)) = self.nodes.remove_if(&id, |_, r| self.is_stale(r, now)) {
                tracing::warn!(
                    "Removing dead node: {} (no heartbeat for {:?})",
                    record.id,
                    elapsed_between(record.last_heartbeat, now)
                );
                evicted.push(record);
            }
        }

        evicted
    }

    pub fn is_stale(&self, record: &NodeRecord, now: u64) -> bool {
        elapsed_between(record.last_heartbeat, now) > self.dead_threshold
    }
}
