//! Distributed DNS Record Sync Library
//!
//! Independent DNS-serving processes discover each other, track liveness with a
//! SWIM-style protocol and replicate DNS records by gossip, so a record added on one
//! node resolves on every other node. The binary (`main.rs`) wraps [`ClusterNode`]
//! with CLI/env configuration and an HTTP admin API.
//!
//! ## Architecture Modules
//! - **`transport`**: Two UDP channels (discovery, protocol) and the bincode envelope codec.
//! - **`discovery`**: Periodic self-announcement and ingestion of peer announcements.
//! - **`membership`**: Peer registry, SWIM probing, suspicion and piggybacked gossip.
//! - **`records`**: The local record store with per-record logical versions.
//! - **`sync`**: Record delta merging, anti-entropy digests, `force_sync`.
//! - **`status`**: Cluster status reporting and the axum admin routes.
//! - **`node`**: Construction order and supervision of all loops.

pub mod config;
pub mod discovery;
pub mod error;
pub mod membership;
pub mod node;
pub mod records;
pub mod status;
pub mod sync;
pub mod transport;

pub use config::{ClusterConfig, ProtocolTimings};
pub use error::{ClusterError, Result};
pub use node::ClusterNode;
