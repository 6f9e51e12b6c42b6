use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use crate::membership::types::NodeId;

/// Payload of a `DISCOVER` datagram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    pub node_id: NodeId,
    pub ip: IpAddr,
    pub discovery_port: u16,
    pub protocol_port: u16,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Announcement {
    pub fn protocol_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.protocol_port)
    }
}

/// A node seen through discovery, kept until it stops announcing.
#[derive(Debug, Clone)]
pub struct DiscoveredNode {
    pub announcement: Announcement,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

/// Serializable view used by the status reporter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredNodeInfo {
    pub node_id: String,
    pub address: String,
    pub protocol_port: u16,
    pub discovery_port: u16,
    pub metadata: HashMap<String, String>,
    pub seen_for_secs: u64,
}

impl DiscoveredNode {
    pub fn info(&self, now: Instant) -> DiscoveredNodeInfo {
        DiscoveredNodeInfo {
            node_id: self.announcement.node_id.to_string(),
            address: self.announcement.ip.to_string(),
            protocol_port: self.announcement.protocol_port,
            discovery_port: self.announcement.discovery_port,
            metadata: self.announcement.metadata.clone(),
            seen_for_secs: now.saturating_duration_since(self.first_seen).as_secs(),
        }
    }
}
