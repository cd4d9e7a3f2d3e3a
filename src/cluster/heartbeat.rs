//! Heartbeat Monitor
//!
//! Outbound membership traffic and the failure detector.
//!
//! ## Responsibilities
//! - **Heartbeats**: Every tick the local record is refreshed from the probe and a
//!   HEARTBEAT is sent to each peer. A peer that answers `known == false` has lost
//!   us (typically after evicting us) and gets a fresh NODE_REGISTRATION.
//! - **Sweep**: Evicts silent nodes, hands their tasks back to the queue and times
//!   out remote tasks whose node never reported.
//! - **Join/Leave**: Registration and discovery against seeds on start, SHUTDOWN
//!   notices to every peer on stop.

use crate::error::{ClusterError, Result};
use crate::executor::executor::TaskExecutor;
use crate::executor::queue::TaskQueue;
use crate::health::stats::ClusterStats;
use crate::membership::directory::NodeDirectory;
use crate::membership::probe::ResourceProbe;
use crate::membership::types::{META_CPU_PERCENT, META_MEMORY_PERCENT, NodeId, NodeRecord};
use crate::protocol::messages::{
    DiscoveryReply, DiscoveryRequest, ErrorReply, Heartbeat, HeartbeatAck, RegistrationReply,
    ShutdownNotice,
};
use crate::protocol::{Frame, MessageType, client};
use crate::time::now_ms;

use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<NodeId>,
    pub requeued: usize,
    pub failed: usize,
    pub timed_out: usize,
}

pub struct HeartbeatMonitor {
    directory: Arc<NodeDirectory>,
    queue: Arc<TaskQueue>,
    executor: Arc<TaskExecutor>,
    stats: Arc<ClusterStats>,
    probe: Arc<dyn ResourceProbe>,
    request_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        directory: Arc<NodeDirectory>,
        queue: Arc<TaskQueue>,
        executor: Arc<TaskExecutor>,
        stats: Arc<ClusterStats>,
        probe: Arc<dyn ResourceProbe>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            queue,
            executor,
            stats,
            probe,
            request_timeout,
        })
    }

    /// Writes fresh load, capacity and task figures into the local record.
    pub fn refresh_local(&self, now: u64) {
        let sample = self.probe.sample();
        let capacity = self.probe.capacity();
        let capabilities = self.probe.capabilities();
        let running = self.executor.running() as u32;
        let completed = self.executor.completed();

        self.directory.update_local(|local| {
            local.last_heartbeat = local.last_heartbeat.max(now);
            local.load_average = sample.load_average;
            local.tasks_running = running;
            local.tasks_completed = completed;
            local.capacity = capacity;
            local.capabilities = capabilities;
            local
                .metadata
                .insert(META_CPU_PERCENT.to_string(), json!(sample.cpu_percent));
            local
                .metadata
                .insert(META_MEMORY_PERCENT.to_string(), json!(sample.memory_percent));
        });
    }

    pub fn heartbeat_message(&self) -> Option<Heartbeat> {
        let local = self.directory.local()?;

        let metadata: BTreeMap<_, _> = local
            .metadata
            .iter()
            .filter(|(key, _)| *key == META_CPU_PERCENT || *key == META_MEMORY_PERCENT)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Heartbeat {
            node_id: local.id,
            load_average: local.load_average,
            tasks_running: local.tasks_running,
            tasks_completed: local.tasks_completed,
            metadata,
        })
    }

    /// One heartbeat round: refresh, then notify every peer concurrently.
    pub async fn beat(self: &Arc<Self>) {
        self.refresh_local(now_ms());

        let Some(heartbeat) = self.heartbeat_message() else {
            return;
        };
        let frame = match Frame::from_message(MessageType::Heartbeat, &heartbeat) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to build heartbeat: {}", e);
                return;
            }
        };

        let peers = self.directory.peers();
        if peers.is_empty() {
            return;
        }

        let mut round = JoinSet::new();
        for peer in peers {
            let monitor = Arc::clone(self);
            let frame = frame.clone();
            round.spawn(async move { monitor.send_heartbeat(peer, frame).await });
        }
        while round.join_next().await.is_some() {}
    }

    async fn send_heartbeat(&self, peer: NodeRecord, frame: Frame) {
        let endpoint = peer.endpoint();

        match self.exchange::<HeartbeatAck>(&endpoint, &frame).await {
            Ok(ack) if ack.known => {
                tracing::trace!("Heartbeat acknowledged by {}", peer.id);
            }
            Ok(_) => {
                tracing::info!("Node {} does not know us, registering again", peer.id);
                if let Err(e) = self.register_with(&endpoint).await {
                    tracing::warn!("Re-registration with {} failed: {}", peer.id, e);
                }
            }
            Err(e) => {
                tracing::debug!("Heartbeat to {} failed: {}", peer.id, e);
            }
        }
    }

    /// One failure-detection pass.
    pub fn sweep_once(&self, now: u64) -> SweepReport {
        let evicted: Vec<NodeId> = self
            .directory
            .sweep(now)
            .into_iter()
            .map(|record| record.id)
            .collect();

        let mut report = SweepReport::default();

        if !evicted.is_empty() {
            self.stats.nodes_left(evicted.len());
            let orphans = self.queue.requeue_orphans(&evicted);
            report.requeued = orphans.requeued.len();
            report.failed = orphans.failed.len();
            for _ in &orphans.failed {
                self.stats.task_failed();
            }
        }

        let expired = self.queue.expire_overdue(
            self.directory.local_id(),
            now,
            self.request_timeout,
        );
        report.timed_out = expired.len();
        for _ in &expired {
            self.stats.task_failed();
        }

        report.evicted = evicted;
        report
    }

    /// Sends our NODE_REGISTRATION to `endpoint`.
    pub async fn register_with(&self, endpoint: &str) -> Result<RegistrationReply> {
        self.refresh_local(now_ms());
        let local = self
            .directory
            .local()
            .ok_or_else(|| ClusterError::Registration("local node record is missing".to_string()))?;

        let frame = Frame::from_message(MessageType::NodeRegistration, &local)?;
        let reply: RegistrationReply = self.exchange(endpoint, &frame).await?;

        tracing::info!(
            "Registered with {} (cluster size {}, coordinator {:?})",
            endpoint,
            reply.cluster_size,
            reply.coordinator
        );
        Ok(reply)
    }

    /// Asks `endpoint` for its node list and merges unknown records. Returns the ids added.
    pub async fn discover_from(&self, endpoint: &str) -> Result<Vec<NodeId>> {
        let request = DiscoveryRequest {
            from: self.directory.local_id().clone(),
        };
        let frame = Frame::from_message(MessageType::NodeDiscovery, &request)?;
        let reply: DiscoveryReply = self.exchange(endpoint, &frame).await?;

        let added = self.directory.merge_discovered(reply.nodes, now_ms());
        for _ in &added {
            self.stats.node_joined();
        }
        if !added.is_empty() {
            tracing::info!("Discovered {} new node(s) via {}", added.len(), endpoint);
        }
        Ok(added)
    }

    /// Registers with each seed, discovers its peers and registers with those too.
    pub async fn join(&self, seeds: &[String]) {
        for seed in seeds {
            if let Err(e) = self.register_with(seed).await {
                tracing::warn!("Could not register with seed {}: {}", seed, e);
                continue;
            }

            let added = match self.discover_from(seed).await {
                Ok(added) => added,
                Err(e) => {
                    tracing::warn!("Discovery via seed {} failed: {}", seed, e);
                    continue;
                }
            };

            for id in added {
                let Some(record) = self.directory.get(&id) else {
                    continue;
                };
                if let Err(e) = self.register_with(&record.endpoint()).await {
                    tracing::warn!("Could not register with discovered node {}: {}", id, e);
                }
            }
        }
    }

    /// Tells every peer this node is leaving.
    pub async fn announce_shutdown(&self) {
        let notice = ShutdownNotice {
            node_id: self.directory.local_id().clone(),
        };
        let frame = match Frame::from_message(MessageType::Shutdown, &notice) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to build shutdown notice: {}", e);
                return;
            }
        };

        let mut round = JoinSet::new();
        for peer in self.directory.peers() {
            let frame = frame.clone();
            let timeout = self.request_timeout;
            round.spawn(async move {
                if let Err(e) = client::request(&peer.endpoint(), &frame, timeout).await {
                    tracing::debug!("Shutdown notice to {} failed: {}", peer.id, e);
                }
            });
        }
        while round.join_next().await.is_some() {}
    }

    pub async fn run_heartbeats(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.beat().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    pub async fn run_sweeps(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.sweep_once(now_ms());
                    if !report.evicted.is_empty() || report.timed_out > 0 {
                        tracing::info!(
                            "Sweep: evicted {:?}, requeued {}, failed {}, timed out {}",
                            report.evicted,
                            report.requeued,
                            report.failed,
                            report.timed_out
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sweep loop stopped");
    }

    async fn exchange<T: DeserializeOwned>(&self, endpoint: &str, frame: &Frame) -> Result<T> {
        let reply = client::request(endpoint, frame, self.request_timeout).await?;

        match reply.message_type {
            t if t == frame.message_type => reply.parse(),
            MessageType::Error => {
                let error: ErrorReply = reply.parse()?;
                Err(ClusterError::Dispatch(format!("{endpoint} answered: {}", error.error)))
            }
            other => Err(ClusterError::Dispatch(format!(
                "{endpoint} answered {} with {other}",
                frame.message_type
            ))),
        }
    }
}
