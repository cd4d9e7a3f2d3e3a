#[cfg(test)]
mod tests {
    use crate::executor::queue::TaskCounts;
    use crate::health::ClusterHealth;
    use crate::health::stats::ClusterStats;
    use crate::membership::types::{NodeId, NodeRecord, NodeRole, NodeStatus};

    use std::time::Duration;

    const THRESHOLD: Duration = Duration::from_secs(120);
    const NOW: u64 = 1_000_000;

    fn node(id: &str, status: NodeStatus, heartbeat_age_ms: u64, load: f64) -> NodeRecord {
        let mut record =
            NodeRecord::new(NodeId::from(id), "127.0.0.1", 9000, NodeRole::Worker).with_status(status);
        record.last_heartbeat = NOW - heartbeat_age_ms;
        record.load_average = load;
        record
    }

    // ============================================================
    // NODE COUNTS
    // ============================================================

    #[test]
    fn test_active_nodes_need_status_and_fresh_heartbeat() {
        let nodes = vec![
            node("a", NodeStatus::Active, 1_000, 0.0),
            node("b", NodeStatus::Active, 125_000, 0.0),
            node("c", NodeStatus::Idle, 1_000, 0.0),
            node("d", NodeStatus::Disconnected, 1_000, 0.0),
        ];

        let health = ClusterHealth::compute(&nodes, &TaskCounts::default(), 0, NOW, THRESHOLD);

        assert_eq!(health.total_nodes, 4);
        assert_eq!(health.active_nodes, 1);
        assert_eq!(health.failed_nodes, 3);
    }

    #[test]
    fn test_average_load_ignores_idle_reporters() {
        let nodes = vec![
            node("a", NodeStatus::Active, 0, 0.5),
            node("b", NodeStatus::Active, 0, 1.5),
            node("c", NodeStatus::Active, 0, 0.0),
        ];

        let health = ClusterHealth::compute(&nodes, &TaskCounts::default(), 0, NOW, THRESHOLD);

        assert!((health.average_load - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_load_zero_without_reports() {
        let health = ClusterHealth::compute(&[], &TaskCounts::default(), 0, NOW, THRESHOLD);

        assert_eq!(health.average_load, 0.0);
        assert_eq!(health.total_nodes, 0);
    }

    // ============================================================
    // TASK COUNTS & EFFICIENCY
    // ============================================================

    #[test]
    fn test_efficiency_is_100_without_tasks() {
        let health = ClusterHealth::compute(&[], &TaskCounts::default(), 0, NOW, THRESHOLD);

        assert_eq!(health.efficiency, 100.0);
        assert_eq!(health.total_tasks, 0);
    }

    #[test]
    fn test_task_counts_and_efficiency() {
        let counts = TaskCounts {
            pending: 1,
            assigned: 1,
            running: 1,
            completed: 3,
            failed: 1,
            cancelled: 2,
            timed_out: 1,
        };

        let health = ClusterHealth::compute(&[], &counts, 0, NOW, THRESHOLD);

        assert_eq!(health.pending_tasks, 1);
        assert_eq!(health.running_tasks, 2);
        assert_eq!(health.completed_tasks, 3);
        assert_eq!(health.failed_tasks, 2);
        assert_eq!(health.cancelled_tasks, 2);
        assert_eq!(health.total_tasks, 10);
        assert!((health.efficiency - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_uptime_since_start() {
        let health = ClusterHealth::compute(&[], &TaskCounts::default(), NOW - 5_000, NOW, THRESHOLD);

        assert_eq!(health.uptime(), Duration::from_secs(5));
    }

    // ============================================================
    // STATS
    // ============================================================

    #[test]
    fn test_stats_snapshot() {
        let stats = ClusterStats::new();
        stats.task_processed();
        stats.task_processed();
        stats.task_failed();
        stats.node_joined();
        stats.nodes_left(2);

        let snapshot = stats.snapshot();

        assert_eq!(snapshot.tasks_processed, 2);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.nodes_joined, 1);
        assert_eq!(snapshot.nodes_left, 2);
    }
}
