//! Cluster Node Tests
//!
//! Multi-node scenarios on loopback UDP with ephemeral ports and shortened timings.
//!
//! ## Test Scopes
//! - **Replication**: a local write reaches every node; concurrent writes converge on
//!   the deterministic winner.
//! - **Failure detection**: a silent node is failed by all others.
//! - **Anti-entropy**: a record that never got gossiped is still repaired.
//! - **Lifecycle**: disabled sync, bind failures, graceful leave.

#[cfg(test)]
mod tests {
    use crate::config::{ClusterConfig, ProtocolTimings};
    use crate::error::ClusterError;
    use crate::membership::types::{NodeId, PeerState};
    use crate::node::ClusterNode;
    use crate::records::types::*;
    use crate::sync::RecordListener;
    use parking_lot::Mutex;
    use std::net::{SocketAddr, UdpSocket};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const CONVERGENCE: Duration = Duration::from_secs(5);

    fn test_config(id: &str) -> ClusterConfig {
        let mut config = ClusterConfig::new(NodeId::from(id));
        config.bind_ip = "127.0.0.1".parse().unwrap();
        config.host_ip = "127.0.0.1".parse().unwrap();
        config.discovery_port = 0;
        config.protocol_port = 0;
        config.timings = ProtocolTimings::fast();
        config
    }

    async fn start(id: &str) -> Arc<ClusterNode> {
        ClusterNode::start(test_config(id)).await.unwrap()
    }

    async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }

    fn confirmed_peers(node: &ClusterNode) -> usize {
        node.membership()
            .map(|membership| membership.registry().active_count())
            .unwrap_or(0)
    }

    /// Joins every node to the first and waits for full mutual confirmation.
    async fn connect(nodes: &[&Arc<ClusterNode>]) {
        let seed = nodes[0].protocol_addr().unwrap();
        for node in &nodes[1..] {
            node.join(seed).await.unwrap();
        }
        let expected = nodes.len() - 1;
        assert!(
            eventually(CONVERGENCE, || nodes.iter().all(|n| confirmed_peers(n) == expected)).await,
            "cluster did not form"
        );
    }

    fn record(hostname: &str, value: &str, counter: u64, origin: &str) -> DnsRecord {
        DnsRecord {
            hostname: hostname.to_string(),
            record_type: RecordType::A,
            value: value.to_string(),
            ttl: 300,
            version: Version::new(counter, NodeId::from(origin)),
            tombstone: false,
            tombstone_expiry: None,
        }
    }

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<RecordChange>>,
    }

    impl RecordListener for Recorder {
        fn on_record_change(&self, change: &RecordChange) {
            self.changes.lock().push(change.clone());
        }
    }

    // ============================================================
    // REPLICATION SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn test_local_write_reaches_peer() {
        let x = start("node-x").await;
        let y = start("node-y").await;

        x.add_record("a.internal", "10.0.0.1", 300).unwrap();
        connect(&[&x, &y]).await;

        assert!(
            eventually(CONVERGENCE, || y
                .records()
                .lookup("a.internal")
                .is_some_and(|r| r.value == "10.0.0.1"))
            .await,
            "y never received a.internal"
        );
        assert!(y.records().snapshot().records.contains_key("a.internal"));

        x.shutdown().await;
        y.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_changes_reach_listeners() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        let recorder = Arc::new(Recorder::default());
        y.add_listener(recorder.clone());
        connect(&[&x, &y]).await;

        x.add_record("svc.internal", "10.0.0.7", 60).unwrap();

        assert!(eventually(CONVERGENCE, || !recorder.changes.lock().is_empty()).await);
        let changes = recorder.changes.lock().clone();
        assert_eq!(changes[0].record.hostname, "svc.internal");
        assert_eq!(
            changes[0].origin,
            ChangeOrigin::Remote {
                from: NodeId::from("node-x")
            }
        );

        x.shutdown().await;
        y.shutdown().await;
    }

    #[tokio::test]
    async fn test_removal_propagates_as_tombstone() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        connect(&[&x, &y]).await;

        x.add_record("gone.internal", "10.0.0.3", 300).unwrap();
        assert!(eventually(CONVERGENCE, || y.records().lookup("gone.internal").is_some()).await);

        assert!(x.remove_record("gone.internal").unwrap());
        assert!(eventually(CONVERGENCE, || y.records().lookup("gone.internal").is_none()).await);
        assert!(y.store().get("gone.internal").is_some_and(|r| r.tombstone));

        x.shutdown().await;
        y.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_writes_converge_on_tiebreak() {
        let x = start("node-x").await;
        let y = start("node-y").await;

        x.store().merge(record("x.internal", "10.0.0.5", 5, "node-x"), now_ms());
        y.store().merge(record("x.internal", "10.0.0.6", 5, "node-y"), now_ms());
        connect(&[&x, &y]).await;

        assert!(
            eventually(CONVERGENCE, || x.store().digest() == y.store().digest()).await,
            "record sets did not converge"
        );
        for node in [&x, &y] {
            let winner = node.records().lookup("x.internal").unwrap();
            assert_eq!(winner.value, "10.0.0.6");
            assert_eq!(winner.version, Version::new(5, NodeId::from("node-y")));
        }

        x.shutdown().await;
        y.shutdown().await;
    }

    // ============================================================
    // FAILURE DETECTION
    // ============================================================

    #[tokio::test]
    async fn test_silent_node_marked_failed_everywhere() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        let z = start("node-z").await;
        connect(&[&x, &y, &z]).await;

        x.abort();

        let x_id = NodeId::from("node-x");
        for observer in [&y, &z] {
            assert!(
                eventually(CONVERGENCE, || {
                    let state = observer
                        .membership()
                        .and_then(|m| m.get_member(&x_id))
                        .map(|p| p.state);
                    matches!(state, Some(PeerState::Failed) | None)
                        && observer.cluster_status().membership.alive_count == 2
                })
                .await,
                "{} did not fail node-x",
                observer.node_id()
            );
        }

        y.shutdown().await;
        z.shutdown().await;
    }

    // ============================================================
    // ANTI-ENTROPY
    // ============================================================

    #[tokio::test]
    async fn test_anti_entropy_repairs_lost_gossip() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        connect(&[&x, &y]).await;

        // Bypasses the engine, so the change is never queued for gossip.
        x.store().apply_local(
            LocalChange::Upsert {
                hostname: "lost.internal".to_string(),
                record_type: RecordType::A,
                value: "10.0.0.9".to_string(),
                ttl: 300,
            },
            Duration::from_secs(60),
        );
        assert_eq!(x.membership().unwrap().pending_gossip().1, 0);

        let interval = ProtocolTimings::fast().full_sync_interval;
        assert!(
            eventually(interval * 6, || y.records().lookup("lost.internal").is_some()).await,
            "anti-entropy did not repair the record"
        );
        assert!(eventually(CONVERGENCE, || x.store().digest() == y.store().digest()).await);
        assert!(
            x.cluster_status().statistics.digest_mismatches + y.cluster_status().statistics.digest_mismatches
                >= 1
        );

        x.shutdown().await;
        y.shutdown().await;
    }

    #[tokio::test]
    async fn test_force_sync_pushes_to_peers() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        connect(&[&x, &y]).await;

        x.store().merge(record("forced.internal", "10.0.0.4", 3, "node-x"), now_ms());
        assert_eq!(x.force_sync().await.unwrap(), 1);
        assert!(matches!(
            x.force_sync().await,
            Err(ClusterError::RateLimited { .. })
        ));
        assert!(eventually(CONVERGENCE, || y.records().lookup("forced.internal").is_some()).await);

        x.shutdown().await;
        y.shutdown().await;
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    #[tokio::test]
    async fn test_sync_disabled_keeps_records_local() {
        let mut config = test_config("node-solo");
        config.enable_sync = false;
        let node = ClusterNode::start(config).await.unwrap();

        assert!(node.protocol_addr().is_none());
        assert!(node.discovery_addr().is_none());

        node.add_record("local.internal", "10.0.0.2", 300).unwrap();
        assert!(node.records().lookup("local.internal").is_some());
        assert!(matches!(node.force_sync().await, Err(ClusterError::SyncDisabled)));
        assert!(matches!(
            node.join("127.0.0.1:9".parse().unwrap()).await,
            Err(ClusterError::SyncDisabled)
        ));

        let status = node.cluster_status();
        assert!(!status.sync_enabled);
        assert_eq!(status.membership.alive_count, 1);
        assert!(status.nodes.is_empty());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let taken = holder.local_addr().unwrap();

        let mut config = test_config("node-x");
        config.protocol_port = taken.port();

        match ClusterNode::start(config).await {
            Err(ClusterError::Bind { channel, addr, .. }) => {
                assert_eq!(channel, "protocol");
                assert_eq!(addr, taken);
            }
            Err(other) => panic!("expected Bind error, got {}", other),
            Ok(_) => panic!("start should fail on a taken port"),
        }
    }

    #[tokio::test]
    async fn test_graceful_shutdown_announces_leave() {
        let x = start("node-x").await;
        let y = start("node-y").await;
        connect(&[&x, &y]).await;

        y.shutdown().await;
        assert!(!y.is_running());
        assert!(!y.cluster_status().running);

        let y_id = NodeId::from("node-y");
        assert!(
            eventually(CONVERGENCE, || {
                let state = x.membership().and_then(|m| m.get_member(&y_id)).map(|p| p.state);
                matches!(state, Some(PeerState::Left) | None)
            })
            .await
        );
        assert_eq!(x.cluster_status().membership.alive_count, 1);

        x.shutdown().await;
    }

    #[tokio::test]
    async fn test_discovery_targets_form_cluster() {
        let x = start("node-x").await;
        let y = start("node-y").await;

        let x_disc: SocketAddr = x.discovery_addr().unwrap();
        y.add_discovery_target(x_disc).unwrap();

        assert!(eventually(CONVERGENCE, || confirmed_peers(&x) == 1 && confirmed_peers(&y) == 1).await);
        let status = x.cluster_status();
        assert_eq!(status.discovered_nodes.len(), 1);
        assert_eq!(status.discovered_nodes[0].node_id, "node-y");
        assert_eq!(status.membership.alive_count, 2);

        x.shutdown().await;
        y.shutdown().await;
    }
}
