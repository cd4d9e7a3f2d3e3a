//! Cluster Manager
//!
//! Composition root of a node. It owns every component and the listening endpoint,
//! and is the only caller-facing surface: submit, query, cancel, register
//! processors, read health, start and stop.

use super::config::ClusterConfig;
use super::heartbeat::HeartbeatMonitor;
use super::server::NodeServer;
use crate::balancer::LoadBalancer;
use crate::error::{ClusterError, Result};
use crate::executor::executor::TaskExecutor;
use crate::executor::queue::TaskQueue;
use crate::executor::registry::{ProcessorRegistry, TaskProcessor};
use crate::executor::types::{Task, TaskId};
use crate::health::ClusterHealth;
use crate::health::stats::{ClusterStats, StatsSnapshot};
use crate::membership::directory::NodeDirectory;
use crate::membership::probe::{ResourceProbe, SystemProbe};
use crate::membership::types::{NodeId, NodeRecord, NodeStatus};
use crate::scheduler::Scheduler;
use crate::time::now_ms;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;

const STOP_GRACE: Duration = Duration::from_secs(5);

struct RunningNode {
    local_addr: SocketAddr,
    handles: Vec<JoinHandle<()>>,
}

pub struct ClusterManager {
    config: ClusterConfig,
    directory: Arc<NodeDirectory>,
    queue: Arc<TaskQueue>,
    balancer: Arc<LoadBalancer>,
    registry: Arc<ProcessorRegistry>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<HeartbeatMonitor>,
    stats: Arc<ClusterStats>,
    started_at: u64,
    shutdown: watch::Sender<bool>,
    /// Serializes `start` and `stop` so a node binds at most once.
    lifecycle: AsyncMutex<()>,
    running: Mutex<Option<RunningNode>>,
}

impl ClusterManager {
    /// Creates a node that reads its load figures from the host.
    pub fn new(config: ClusterConfig) -> Arc<Self> {
        Self::with_probe(config, Arc::new(SystemProbe::new()))
    }

    pub fn with_probe(config: ClusterConfig, probe: Arc<dyn ResourceProbe>) -> Arc<Self> {
        let mut local = NodeRecord::new(
            config.node_id.clone().unwrap_or_default(),
            config.advertised_host(config.bind_addr),
            config.bind_addr.port(),
            config.role,
        );
        local.hostname = local_hostname();
        local.capacity = probe.capacity();
        local.capabilities = probe.capabilities();
        local.last_heartbeat = now_ms();

        tracing::info!("Node ID: {} ({:?})", local.id, config.role);

        let directory = Arc::new(NodeDirectory::new(local, config.dead_threshold));
        let queue = Arc::new(TaskQueue::new());
        let balancer = Arc::new(LoadBalancer::new(config.history_capacity));
        let registry = ProcessorRegistry::new();
        let executor = TaskExecutor::new(registry.clone(), config.worker_count);
        let stats = Arc::new(ClusterStats::new());

        let scheduler = Scheduler::new(
            directory.clone(),
            queue.clone(),
            balancer.clone(),
            executor.clone(),
            stats.clone(),
            config.scheduler_settings(),
        );
        let monitor = HeartbeatMonitor::new(
            directory.clone(),
            queue.clone(),
            executor,
            stats.clone(),
            probe,
            config.dispatch_timeout,
        );

        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            directory,
            queue,
            balancer,
            registry,
            scheduler,
            monitor,
            stats,
            started_at: now_ms(),
            shutdown,
            lifecycle: AsyncMutex::new(()),
            running: Mutex::new(None),
        })
    }

    fn running(&self) -> std::sync::MutexGuard<'_, Option<RunningNode>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds the listener, starts every loop and joins the configured seeds.
    ///
    /// Failing to bind is the only fatal error. Calling `start` on a running node
    /// returns the address it already listens on.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| ClusterError::Bind {
                addr: self.config.bind_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let advertised = self.config.advertised_host(local_addr);
        self.directory.update_local(|local| {
            local.address = advertised;
            local.port = local_addr.port();
            local.status = NodeStatus::Active;
        });
        self.monitor.refresh_local(now_ms());
        self.shutdown.send_replace(false);

        let server = NodeServer::new(
            self.directory.clone(),
            self.queue.clone(),
            self.scheduler.clone(),
            self.stats.clone(),
            self.config.role,
            self.started_at,
            self.config.connection_timeout,
        );

        let handles = vec![
            tokio::spawn(server.serve(listener, self.shutdown.subscribe())),
            tokio::spawn(
                self.monitor
                    .clone()
                    .run_heartbeats(self.config.heartbeat_interval, self.shutdown.subscribe()),
            ),
            tokio::spawn(
                self.monitor
                    .clone()
                    .run_sweeps(self.config.sweep_interval, self.shutdown.subscribe()),
            ),
            tokio::spawn(self.scheduler.clone().run(self.shutdown.subscribe())),
        ];

        *self.running() = Some(RunningNode {
            local_addr,
            handles,
        });

        tracing::info!(
            "Node {} listening on {} (advertised as {}:{})",
            self.node_id(),
            local_addr,
            self.config.advertised_host(local_addr),
            local_addr.port()
        );

        if self.config.seeds.is_empty() {
            tracing::info!("Starting as seed node (founder)");
        } else {
            tracing::info!("Joining cluster via {} seed node(s)", self.config.seeds.len());
            self.monitor.join(&self.config.seeds).await;
        }

        Ok(local_addr)
    }

    /// Notifies peers, then stops every loop and the listener.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(running) = self.running().take() else {
            return;
        };

        tracing::info!("Stopping node {}", self.node_id());
        self.monitor.announce_shutdown().await;
        self.directory
            .update_local(|local| local.status = NodeStatus::Disconnected);
        self.shutdown.send_replace(true);

        for handle in running.handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }
        tracing::info!("Node {} stopped", self.node_id());
    }

    /// Queues a task for placement and returns its id.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let task_type = task.task_type.clone();
        let id = self.queue.enqueue(task)?;
        tracing::info!("Task submitted: {} ({})", id, task_type);
        Ok(id)
    }

    pub fn status(&self, id: &TaskId) -> Option<Task> {
        self.queue.get(id)
    }

    /// Cancels a task that has not been placed yet.
    pub fn cancel(&self, id: &TaskId) -> bool {
        self.queue.cancel(id)
    }

    /// Registers a processor for local execution. Returns the task types it serves.
    pub fn register_processor(&self, processor: Arc<dyn TaskProcessor>) -> Vec<String> {
        self.registry.register(processor)
    }

    pub fn health(&self) -> ClusterHealth {
        ClusterHealth::compute(
            &self.directory.snapshot(),
            &self.queue.counts(),
            self.started_at,
            now_ms(),
            self.config.dead_threshold,
        )
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|running| running.local_addr)
    }

    /// Every node this node knows, itself included, ordered by id.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.directory.snapshot()
    }

    pub fn node_id(&self) -> &NodeId {
        self.directory.local_id()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
