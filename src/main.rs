use clap::Parser;
use compute_cluster::cluster::config::{
    DEFAULT_BIND_ADDR, DEFAULT_DEAD_THRESHOLD, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_WORKERS,
};
use compute_cluster::cluster::{ClusterConfig, ClusterManager};
use compute_cluster::executor::processors::{ComputeProcessor, DataProcessingProcessor};
use compute_cluster::membership::types::NodeRole;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Runs one node of the compute cluster.
#[derive(Debug, Parser)]
#[command(name = "cluster-node", version, about)]
struct Args {
    /// Address the node listens on.
    #[arg(long, env = "CLUSTER_BIND", default_value = DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// `host:port` of an existing node to join through. May be repeated.
    #[arg(long = "seed", env = "CLUSTER_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    /// master, worker, coordinator or observer.
    #[arg(long, env = "CLUSTER_ROLE", default_value = "worker")]
    role: NodeRole,

    /// Fixed node id. A random one is generated when omitted.
    #[arg(long, env = "CLUSTER_NODE_ID")]
    node_id: Option<String>,

    /// Host other nodes should connect to.
    #[arg(long, env = "CLUSTER_ADVERTISE")]
    advertise: Option<String>,

    #[arg(long, env = "CLUSTER_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    #[arg(long, env = "CLUSTER_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    heartbeat_secs: u64,

    /// Silence after which a node is evicted.
    #[arg(long, env = "CLUSTER_DEAD_SECS", default_value_t = DEFAULT_DEAD_THRESHOLD.as_secs())]
    dead_secs: u64,
}

impl Args {
    fn into_config(self) -> ClusterConfig {
        let mut config = ClusterConfig::new(self.bind)
            .with_role(self.role)
            .with_workers(self.workers.max(1));

        if let Some(id) = self.node_id {
            config = config.with_node_id(id);
        }
        for seed in self.seeds {
            config = config.with_seed(seed);
        }
        config.advertise_host = self.advertise;
        config.heartbeat_interval = Duration::from_secs(self.heartbeat_secs.max(1));
        config.dead_threshold = Duration::from_secs(self.dead_secs.max(1));
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    tracing::info!("Starting node on {}", args.bind);
    if !args.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", args.seeds);
    }

    let node = ClusterManager::new(args.into_config());

    // 1. Built-in processors:
    for types in [
        node.register_processor(Arc::new(ComputeProcessor)),
        node.register_processor(Arc::new(DataProcessingProcessor)),
    ] {
        tracing::info!("Registered processor for {:?}", types);
    }

    // 2. Listener, heartbeats, sweeps and scheduler:
    let addr = node.start().await?;
    tracing::info!("Node {} serving on {}", node.node_id(), addr);

    // 3. Spawn stats reporter:
    let reporter_node = node.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            interval.tick().await;
            let health = reporter_node.health();
            tracing::info!(
                "Cluster stats: {}/{} active nodes, {} pending, {} running, {} completed, {} failed, efficiency {:.1}%",
                health.active_nodes,
                health.total_nodes,
                health.pending_tasks,
                health.running_tasks,
                health.completed_tasks,
                health.failed_tasks,
                health.efficiency
            );
            for node in reporter_node.nodes() {
                tracing::info!(
                    "  - {} {}:{} {:?} load={:.2} running={}",
                    node.id,
                    node.address,
                    node.port,
                    node.status,
                    node.load_average,
                    node.tasks_running
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    reporter.abort();
    node.stop().await;

    Ok(())
}
