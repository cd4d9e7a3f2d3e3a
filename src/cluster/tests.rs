//! Cluster Integration Tests
//!
//! Spins up real nodes on loopback ports and drives them over the wire protocol.
//!
//! ## Test Scopes
//! - **Single Node**: Local execution end to end, cancellation, bind failures.
//! - **Membership Traffic**: Registration, heartbeats, discovery, status and shutdown.
//! - **Two Nodes**: Joining through a seed and running a task on the remote node.
//! - **Robustness**: Malformed frames only drop their own connection.

#[cfg(test)]
mod tests {
    use crate::cluster::heartbeat::HeartbeatMonitor;
    use crate::cluster::{ClusterConfig, ClusterManager};
    use crate::error::ClusterError;
    use crate::executor::executor::TaskExecutor;
    use crate::executor::processors::ComputeProcessor;
    use crate::executor::queue::TaskQueue;
    use crate::executor::registry::ProcessorRegistry;
    use crate::executor::types::{Task, TaskId, TaskStatus};
    use crate::health::stats::ClusterStats;
    use crate::membership::directory::NodeDirectory;
    use crate::membership::probe::StaticProbe;
    use crate::membership::types::{NodeId, NodeRecord, NodeRole, NodeStatus};
    use crate::protocol::messages::{
        ClusterStatusReply, DiscoveryReply, DiscoveryRequest, Heartbeat, HeartbeatAck,
        RegistrationReply,
    };
    use crate::protocol::{Frame, MessageType, Payload, client};
    use crate::time::now_ms;

    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn test_config(id: &str) -> ClusterConfig {
        let mut config = ClusterConfig::new("127.0.0.1:0".parse().unwrap()).with_node_id(id);
        config.heartbeat_interval = Duration::from_secs(60);
        config.sweep_interval = Duration::from_secs(60);
        config.dispatch_timeout = REQUEST_TIMEOUT;
        config.connection_timeout = REQUEST_TIMEOUT;
        config.poll_wait = Duration::from_millis(50);
        config.empty_backoff = Duration::from_millis(100);
        config.unselected_backoff = Duration::from_millis(50);
        config
    }

    fn node(config: ClusterConfig) -> Arc<ClusterManager> {
        ClusterManager::with_probe(config, Arc::new(StaticProbe::idle(4)))
    }

    fn fib_task(n: u64) -> Task {
        let payload = match json!({"op": "fib", "n": n}) {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Task::new("compute", payload)
    }

    async fn wait_for_terminal(manager: &ClusterManager, id: &TaskId) -> Task {
        for _ in 0..300 {
            if let Some(task) = manager.status(id)
                && task.status.is_terminal()
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} did not finish");
    }

    async fn request(manager: &ClusterManager, frame: &Frame) -> Frame {
        let addr = manager.local_addr().expect("node is started").to_string();
        client::request(&addr, frame, REQUEST_TIMEOUT).await.unwrap()
    }

    fn remote_record(id: &str, port: u16) -> NodeRecord {
        NodeRecord::new(NodeId::from(id), "127.0.0.1", port, NodeRole::Worker)
            .with_status(NodeStatus::Active)
    }

    // ============================================================
    // SINGLE NODE
    // ============================================================

    #[tokio::test]
    async fn test_single_node_runs_task_locally() {
        // ARRANGE
        let manager = node(test_config("solo"));
        manager.register_processor(Arc::new(ComputeProcessor));
        manager.start().await.unwrap();

        // ACT
        let id = manager.submit(fib_task(10)).unwrap();
        let task = wait_for_terminal(&manager, &id).await;

        // ASSERT
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap().get("result"), Some(&json!(55)));
        assert_eq!(task.assigned_node, Some(NodeId::from("solo")));
        assert!(
            manager
                .balancer()
                .average_execution_time(&NodeId::from("solo"), "compute")
                .is_some()
        );

        let health = manager.health();
        assert_eq!(health.completed_tasks, 1);
        assert_eq!(health.efficiency, 100.0);
        assert_eq!(health.active_nodes, 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_submit_duplicate_and_cancel_before_start() {
        let manager = node(test_config("idle"));
        let task = fib_task(5).with_id(TaskId::from("t-1"));

        let id = manager.submit(task.clone()).unwrap();
        let duplicate = manager.submit(task);

        assert!(matches!(duplicate, Err(ClusterError::DuplicateTask(_))));
        assert!(manager.cancel(&id));
        assert_eq!(manager.status(&id).unwrap().status, TaskStatus::Cancelled);
        assert!(manager.status(&TaskId::from("missing")).is_none());
    }

    #[tokio::test]
    async fn test_start_fails_when_address_taken() {
        let first = node(test_config("first"));
        let addr = first.start().await.unwrap();

        let second = node(ClusterConfig {
            bind_addr: addr,
            ..test_config("second")
        });
        let result = second.start().await;

        assert!(matches!(result, Err(ClusterError::Bind { .. })));
        assert!(second.local_addr().is_none());

        first.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let manager = node(test_config("twice"));

        let first = manager.start().await.unwrap();
        let second = manager.start().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.nodes()[0].status, NodeStatus::Active);
        assert_eq!(manager.nodes()[0].port, first.port());

        manager.stop().await;
        assert!(manager.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_starts_bind_once() {
        let manager = node(test_config("racer"));

        let (first, second) = tokio::join!(manager.start(), manager.start());

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first, second);
        assert_eq!(manager.local_addr(), Some(first));
        assert_eq!(manager.nodes()[0].port, first.port());

        manager.stop().await;
    }

    // ============================================================
    // MEMBERSHIP TRAFFIC
    // ============================================================

    #[tokio::test]
    async fn test_repeated_registration_keeps_one_entry() {
        // ARRANGE
        let manager = node(test_config("hub"));
        manager.start().await.unwrap();
        let record = remote_record("peer-1", 9101);

        // ACT
        let frame = Frame::from_message(MessageType::NodeRegistration, &record).unwrap();
        let first: RegistrationReply = request(&manager, &frame).await.parse().unwrap();
        let second: RegistrationReply = request(&manager, &frame).await.parse().unwrap();

        // ASSERT
        assert_eq!(first.status, "registered");
        assert_eq!(first.cluster_size, 2);
        assert_eq!(second.cluster_size, 2);
        assert_eq!(first.coordinator, None);
        assert_eq!(manager.nodes().len(), 2);
        assert_eq!(manager.stats().nodes_joined, 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_master_names_itself_coordinator() {
        let manager = node(test_config("boss").with_role(NodeRole::Master));
        manager.start().await.unwrap();

        let frame = Frame::from_message(MessageType::NodeRegistration, &remote_record("w", 9102)).unwrap();
        let reply: RegistrationReply = request(&manager, &frame).await.parse().unwrap();

        assert_eq!(reply.coordinator, Some(NodeId::from("boss")));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_registration_gets_error_reply() {
        let manager = node(test_config("strict"));
        manager.start().await.unwrap();

        let frame = Frame::from_message(MessageType::NodeRegistration, &remote_record("", 9103)).unwrap();
        let reply = request(&manager, &frame).await;

        assert_eq!(reply.message_type, MessageType::Error);
        assert_eq!(manager.nodes().len(), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_node_is_not_known() {
        let manager = node(test_config("listener"));
        manager.start().await.unwrap();

        let heartbeat = Heartbeat {
            node_id: NodeId::from("stranger"),
            load_average: 0.2,
            tasks_running: 0,
            tasks_completed: 0,
            metadata: BTreeMap::new(),
        };
        let frame = Frame::from_message(MessageType::Heartbeat, &heartbeat).unwrap();
        let ack: HeartbeatAck = request(&manager, &frame).await.parse().unwrap();

        assert!(!ack.known);
        assert!(manager.nodes().iter().all(|n| n.id != NodeId::from("stranger")));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_discovery_and_status_replies() {
        // ARRANGE
        let manager = node(test_config("catalog"));
        manager.start().await.unwrap();
        manager
            .directory()
            .register(remote_record("peer-x", 9104), now_ms())
            .unwrap();

        // ACT
        let discovery = Frame::from_message(
            MessageType::NodeDiscovery,
            &DiscoveryRequest {
                from: NodeId::from("peer-x"),
            },
        )
        .unwrap();
        let nodes: DiscoveryReply = request(&manager, &discovery).await.parse().unwrap();

        let status = Frame::new(MessageType::ClusterStatus, Payload::new());
        let status: ClusterStatusReply = request(&manager, &status).await.parse().unwrap();

        // ASSERT
        let ids: Vec<NodeId> = nodes.nodes.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NodeId::from("catalog"), NodeId::from("peer-x")]);
        assert_eq!(status.node_id, NodeId::from("catalog"));
        assert_eq!(status.health.total_nodes, 2);
        assert_eq!(status.health.active_nodes, 2);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_node_and_status_reflects_it() {
        // ARRANGE: a peer whose last heartbeat was 125s ago
        let manager = node(test_config("sweeper"));
        manager.start().await.unwrap();
        let now = now_ms();
        manager
            .directory()
            .register(remote_record("quiet", 9105), now - 125_000)
            .unwrap();
        let before = manager.health();

        // ACT
        let report = manager.monitor().sweep_once(now);
        let status = Frame::new(MessageType::ClusterStatus, Payload::new());
        let status: ClusterStatusReply = request(&manager, &status).await.parse().unwrap();

        // ASSERT: the silent node was never counted active
        assert_eq!(report.evicted, vec![NodeId::from("quiet")]);
        assert_eq!(before.total_nodes, 2);
        assert_eq!(before.active_nodes, 1);
        assert_eq!(before.failed_nodes, 1);
        assert_eq!(status.health.total_nodes, 1);
        assert_eq!(status.health.active_nodes, 1);
        assert_eq!(status.health.failed_nodes, 0);
        assert_eq!(status.stats.nodes_left, 1);
        assert!(status.nodes.iter().all(|n| n.id != NodeId::from("quiet")));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_requeues_tasks_of_evicted_node() {
        // ARRANGE: a task placed on a peer that then goes silent
        let local = remote_record("local", 9000);
        let directory = Arc::new(NodeDirectory::new(local, Duration::from_secs(120)));
        let queue = Arc::new(TaskQueue::new());
        let stats = Arc::new(ClusterStats::new());
        let monitor = HeartbeatMonitor::new(
            directory.clone(),
            queue.clone(),
            TaskExecutor::new(ProcessorRegistry::new(), 1),
            stats.clone(),
            Arc::new(StaticProbe::idle(4)),
            REQUEST_TIMEOUT,
        );

        let now = now_ms();
        let quiet = NodeId::from("quiet");
        directory
            .register(remote_record("quiet", 9105), now - 125_000)
            .unwrap();
        let id = queue.enqueue(fib_task(10)).unwrap();
        queue.next_ready(Duration::from_millis(50)).await.unwrap();
        queue.assign(&id, &quiet).unwrap();

        // ACT
        let report = monitor.sweep_once(now);

        // ASSERT
        assert_eq!(report.evicted, vec![quiet]);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.timed_out, 0);

        let task = queue.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
        assert!(task.assigned_node.is_none());
        assert_eq!(stats.snapshot().nodes_left, 1);
        assert_eq!(stats.snapshot().tasks_failed, 0);
    }

    // ============================================================
    // TWO NODES
    // ============================================================

    #[tokio::test]
    async fn test_two_nodes_run_task_remotely() {
        // ARRANGE: B can compute, A joins through B and has no processors
        let b = node(test_config("node-b"));
        b.register_processor(Arc::new(ComputeProcessor));
        let b_addr = b.start().await.unwrap();

        let a = node(test_config("node-a").with_seed(b_addr.to_string()));
        a.start().await.unwrap();

        assert!(b.directory().contains(&NodeId::from("node-a")));
        assert!(a.directory().contains(&NodeId::from("node-b")));

        // ACT
        let id = a.submit(fib_task(10)).unwrap();
        let task = wait_for_terminal(&a, &id).await;

        // ASSERT
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.assigned_node, Some(NodeId::from("node-b")));
        assert_eq!(task.result.unwrap().get("result"), Some(&json!(55)));
        assert!(
            a.balancer()
                .average_execution_time(&NodeId::from("node-b"), "compute")
                .is_some()
        );
        assert_eq!(a.stats().tasks_processed, 1);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_remote_rejection_fails_task() {
        // Neither node can compute
        let b = node(test_config("empty-b"));
        let b_addr = b.start().await.unwrap();
        let a = node(test_config("empty-a").with_seed(b_addr.to_string()));
        a.start().await.unwrap();

        let id = a.submit(fib_task(10)).unwrap();
        let task = wait_for_terminal(&a, &id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("rejected"));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_stop_announces_shutdown_to_peers() {
        let b = node(test_config("stay"));
        let b_addr = b.start().await.unwrap();
        let a = node(test_config("leave").with_seed(b_addr.to_string()));
        a.start().await.unwrap();

        a.stop().await;

        let record = b.directory().get(&NodeId::from("leave")).unwrap();
        assert_eq!(record.status, NodeStatus::Disconnected);

        b.stop().await;
    }

    #[tokio::test]
    async fn test_evicted_node_registers_again_after_heartbeat() {
        // ARRANGE
        let b = node(test_config("keeper"));
        let b_addr = b.start().await.unwrap();
        let a = node(test_config("returner").with_seed(b_addr.to_string()));
        a.start().await.unwrap();

        b.directory().sweep(now_ms() + 200_000);
        assert!(!b.directory().contains(&NodeId::from("returner")));

        // ACT
        a.monitor().beat().await;

        // ASSERT
        assert!(b.directory().contains(&NodeId::from("returner")));

        a.stop().await;
        b.stop().await;
    }

    // ============================================================
    // ROBUSTNESS
    // ============================================================

    #[tokio::test]
    async fn test_bad_magic_drops_connection_only() {
        // ARRANGE
        let manager = node(test_config("sturdy"));
        let addr = manager.start().await.unwrap();

        // ACT: a header with the wrong magic
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&[0xCA, 0xFE, 0xBA, 0xBE, 1, 1, 0, 0, 0, 0])
            .await
            .unwrap();
        let mut reply = Vec::new();
        let read = tokio::time::timeout(REQUEST_TIMEOUT, stream.read_to_end(&mut reply)).await;

        // ASSERT: closed without a reply, and the node keeps serving
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        let status = Frame::new(MessageType::ClusterStatus, Payload::new());
        let status: ClusterStatusReply = request(&manager, &status).await.parse().unwrap();
        assert_eq!(status.node_id, NodeId::from("sturdy"));

        manager.stop().await;
    }

    #[test]
    fn test_config_defaults() {
        let config = ClusterConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.dead_threshold, Duration::from_secs(120));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(10));
        assert_eq!(config.empty_backoff, Duration::from_secs(5));
        assert_eq!(config.unselected_backoff, Duration::from_secs(1));
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.role, NodeRole::Worker);
    }

    #[test]
    fn test_advertised_host() {
        let config = ClusterConfig::default();

        assert_eq!(config.advertised_host("0.0.0.0:8080".parse().unwrap()), "127.0.0.1");
        assert_eq!(config.advertised_host("10.0.0.5:8080".parse().unwrap()), "10.0.0.5");

        let pinned = ClusterConfig {
            advertise_host: Some("node.internal".to_string()),
            ..ClusterConfig::default()
        };
        assert_eq!(pinned.advertised_host("0.0.0.0:8080".parse().unwrap()), "node.internal");
    }
}
