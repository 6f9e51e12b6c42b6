use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::reporter::ClusterStatus;
use crate::error::ClusterError;
use crate::node::ClusterNode;
use crate::records::types::DnsRecord;
use crate::records::validate::DEFAULT_TTL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordRequest {
    pub hostname: String,
    pub ip: String,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    pub success: bool,
    pub record: Option<DnsRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub global_version: u64,
    pub records: Vec<DnsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceSyncResponse {
    pub success: bool,
    pub peers: usize,
    pub retry_after_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}

pub fn router(node: Arc<ClusterNode>) -> Router {
    Router::new()
        .route("/cluster/status", get(handle_cluster_status))
        .route("/records", get(handle_list_records).post(handle_add_record))
        .route("/records/:hostname", delete(handle_remove_record))
        .route("/sync/force", post(handle_force_sync))
        .route("/health", get(handle_health))
        .layer(Extension(node))
}

pub async fn handle_cluster_status(Extension(node): Extension<Arc<ClusterNode>>) -> Json<ClusterStatus> {
    Json(node.cluster_status())
}

pub async fn handle_list_records(Extension(node): Extension<Arc<ClusterNode>>) -> Json<RecordsResponse> {
    let view = node.records();
    let snapshot = view.snapshot();
    Json(RecordsResponse {
        global_version: snapshot.global_version,
        records: snapshot.records.into_values().collect(),
    })
}

pub async fn handle_add_record(
    Extension(node): Extension<Arc<ClusterNode>>,
    Json(req): Json<AddRecordRequest>,
) -> (StatusCode, Json<RecordResponse>) {
    match node.add_record(&req.hostname, &req.ip, req.ttl.unwrap_or(DEFAULT_TTL)) {
        Ok(record) => (
            StatusCode::OK,
            Json(RecordResponse {
                success: true,
                record: Some(record),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Rejected record {} -> {}: {}", req.hostname, req.ip, e);
            (
                StatusCode::BAD_REQUEST,
                Json(RecordResponse {
                    success: false,
                    record: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_remove_record(
    Extension(node): Extension<Arc<ClusterNode>>,
    Path(hostname): Path<String>,
) -> (StatusCode, Json<RecordResponse>) {
    let (status, error) = match node.remove_record(&hostname) {
        Ok(true) => (StatusCode::OK, None),
        Ok(false) => (StatusCode::NOT_FOUND, Some(format!("no record for {}", hostname))),
        Err(e) => (StatusCode::BAD_REQUEST, Some(e.to_string())),
    };

    (
        status,
        Json(RecordResponse {
            success: error.is_none(),
            record: None,
            error,
        }),
    )
}

pub async fn handle_force_sync(Extension(node): Extension<Arc<ClusterNode>>) -> (StatusCode, Json<ForceSyncResponse>) {
    match node.force_sync().await {
        Ok(peers) => (
            StatusCode::OK,
            Json(ForceSyncResponse {
                success: true,
                peers,
                retry_after_ms: None,
                error: None,
            }),
        ),
        Err(e) => {
            let (status, retry_after_ms) = match &e {
                ClusterError::RateLimited { retry_after } => {
                    (StatusCode::TOO_MANY_REQUESTS, Some(retry_after.as_millis() as u64))
                }
                ClusterError::SyncDisabled => (StatusCode::SERVICE_UNAVAILABLE, None),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
            };
            (
                status,
                Json(ForceSyncResponse {
                    success: false,
                    peers: 0,
                    retry_after_ms,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_health(Extension(node): Extension<Arc<ClusterNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if node.is_running() { "ok" } else { "stopping" }.to_string(),
        node_id: node.node_id().to_string(),
    })
}
