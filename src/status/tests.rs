//! Status Module Tests
//!
//! ## Test Scopes
//! - **Reporter**: shape of `ClusterStatus` with and without synchronization.
//! - **Handlers**: admin API status codes, called directly with extractors.

#[cfg(test)]
mod tests {
    use crate::config::{ClusterConfig, ProtocolTimings};
    use crate::membership::types::NodeId;
    use crate::node::ClusterNode;
    use crate::status::handlers::*;
    use axum::Json;
    use axum::extract::{Extension, Path};
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn local_config(id: &str, enable_sync: bool) -> ClusterConfig {
        let mut config = ClusterConfig::new(NodeId::from(id));
        config.bind_ip = "127.0.0.1".parse().unwrap();
        config.host_ip = "127.0.0.1".parse().unwrap();
        config.discovery_port = 0;
        config.protocol_port = 0;
        config.enable_sync = enable_sync;
        config.timings = ProtocolTimings::fast();
        config
    }

    async fn offline_node() -> Arc<ClusterNode> {
        ClusterNode::start(local_config("node-offline", false)).await.unwrap()
    }

    fn add_request(hostname: &str, ip: &str, ttl: Option<u32>) -> Json<AddRecordRequest> {
        Json(AddRecordRequest {
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            ttl,
        })
    }

    // ============================================================
    // REPORTER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_status_counts_self_as_alive() {
        let node = offline_node().await;
        node.add_record("web.internal", "10.1.0.1", 60).unwrap();

        let status = node.cluster_status();
        assert_eq!(status.node_id, "node-offline");
        assert!(status.running);
        assert_eq!(status.membership.alive_count, 1);
        assert_eq!(status.membership.member_counts_by_state["alive"], 1);
        assert_eq!(status.membership.member_counts_by_state["failed"], 0);
        assert_eq!(status.membership.record_set_version, 1);
        assert!(status.discovered_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_status_serializes_to_json() {
        let node = offline_node().await;
        let json = serde_json::to_value(node.cluster_status()).unwrap();

        assert_eq!(json["node_id"], "node-offline");
        assert_eq!(json["sync_enabled"], false);
        assert!(json["nodes"].as_array().unwrap().is_empty());
        assert!(json["statistics"]["sync_operations"].is_number());
        assert!(json["membership"]["alive_count"].is_number());
    }

    #[tokio::test]
    async fn test_status_after_shutdown_reports_stopped() {
        let node = offline_node().await;
        node.shutdown().await;

        assert!(!node.cluster_status().running);
        let Json(health) = handle_health(Extension(node)).await;
        assert_eq!(health.status, "stopping");
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_add_record_defaults_ttl() {
        let node = offline_node().await;

        let (status, Json(body)) =
            handle_add_record(Extension(node.clone()), add_request("API.Internal.", "10.1.0.2", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let record = body.record.unwrap();
        assert_eq!(record.hostname, "api.internal");
        assert_eq!(record.ttl, crate::records::validate::DEFAULT_TTL);
        assert!(node.records().lookup("api.internal").is_some());
    }

    #[tokio::test]
    async fn test_add_record_rejects_bad_input() {
        let node = offline_node().await;

        let (status, Json(body)) =
            handle_add_record(Extension(node.clone()), add_request("bad_host!", "10.1.0.3", Some(60))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.error.is_some());

        let (status, _) =
            handle_add_record(Extension(node.clone()), add_request("ok.internal", "not-an-ip", Some(60))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(node.records().live_records().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_remove_records() {
        let node = offline_node().await;
        node.add_record("one.internal", "10.1.0.4", 60).unwrap();
        node.add_record("two.internal", "fd00::4", 60).unwrap();

        let Json(listed) = handle_list_records(Extension(node.clone())).await;
        assert_eq!(listed.records.len(), 2);
        assert_eq!(listed.global_version, 2);

        let (status, Json(body)) =
            handle_remove_record(Extension(node.clone()), Path("one.internal".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert!(node.records().lookup("one.internal").is_none());

        let (status, Json(body)) =
            handle_remove_record(Extension(node.clone()), Path("missing.internal".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_force_sync_unavailable_without_sync() {
        let node = offline_node().await;

        let (status, Json(body)) = handle_force_sync(Extension(node)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.success);
        assert_eq!(body.retry_after_ms, None);
    }

    #[tokio::test]
    async fn test_force_sync_rate_limited() {
        let node = ClusterNode::start(local_config("node-online", true)).await.unwrap();

        let (status, Json(first)) = handle_force_sync(Extension(node.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first.peers, 0);

        let (status, Json(second)) = handle_force_sync(Extension(node.clone())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(second.retry_after_ms.is_some());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_reports_node() {
        let node = offline_node().await;
        let Json(health) = handle_health(Extension(node)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.node_id, "node-offline");
    }
}
