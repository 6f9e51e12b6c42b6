use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::discovery::{DiscoveredNodeInfo, DiscoveryService};
use crate::membership::MembershipService;
use crate::membership::types::{NodeId, PeerInfo, PeerState};
use crate::sync::{StatisticsSnapshot, SyncEngine};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatus {
    pub node_id: String,
    pub address: String,
    pub protocol_port: u16,
    pub discovery_port: u16,
    pub state: String,
    pub incarnation: u64,
    pub confirmed: bool,
    pub round_trip_ms: Option<f64>,
    pub seconds_in_state: u64,
    pub metadata: HashMap<String, String>,
}

impl NodeStatus {
    fn from_peer(peer: &PeerInfo, now: Instant) -> Self {
        Self {
            node_id: peer.node_id.to_string(),
            address: peer.ip_address.to_string(),
            protocol_port: peer.protocol_port,
            discovery_port: peer.discovery_port,
            state: peer.state.to_string(),
            incarnation: peer.incarnation,
            confirmed: peer.confirmed,
            round_trip_ms: peer.round_trip_estimate.map(|rtt| rtt.as_secs_f64() * 1000.0),
            seconds_in_state: now.saturating_duration_since(peer.last_state_change).as_secs(),
            metadata: peer.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipSummary {
    /// Alive members, this node included.
    pub alive_count: usize,
    pub member_counts_by_state: BTreeMap<String, usize>,
    pub record_set_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    pub node_id: String,
    pub running: bool,
    pub sync_enabled: bool,
    pub discovered_nodes: Vec<DiscoveredNodeInfo>,
    pub statistics: StatisticsSnapshot,
    pub nodes: Vec<NodeStatus>,
    pub membership: MembershipSummary,
}

/// Assembles [`ClusterStatus`] from the running components.
pub struct StatusReporter {
    node_id: NodeId,
    engine: Arc<SyncEngine>,
    membership: Option<Arc<MembershipService>>,
    discovery: Option<Arc<DiscoveryService>>,
    running: Arc<AtomicBool>,
}

impl StatusReporter {
    pub fn new(
        engine: Arc<SyncEngine>,
        membership: Option<Arc<MembershipService>>,
        discovery: Option<Arc<DiscoveryService>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            node_id: engine.node_id().clone(),
            engine,
            membership,
            discovery,
            running,
        }
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        let now = Instant::now();

        let (nodes, mut counts): (Vec<NodeStatus>, BTreeMap<String, usize>) = match &self.membership {
            Some(membership) => {
                let registry = membership.registry();
                let nodes = registry
                    .peers()
                    .iter()
                    .map(|peer| NodeStatus::from_peer(peer, now))
                    .collect();
                (nodes, registry.counts_by_state())
            }
            None => {
                let counts = [
                    PeerState::Alive,
                    PeerState::Suspect,
                    PeerState::Failed,
                    PeerState::Left,
                ]
                .iter()
                .map(|state| (state.as_str().to_string(), 0))
                .collect();
                (Vec::new(), counts)
            }
        };
        *counts.entry(PeerState::Alive.as_str().to_string()).or_insert(0) += 1;

        let alive_count = counts.get(PeerState::Alive.as_str()).copied().unwrap_or(1);

        ClusterStatus {
            node_id: self.node_id.to_string(),
            running: self.running.load(Ordering::SeqCst),
            sync_enabled: self.engine.is_enabled(),
            discovered_nodes: self
                .discovery
                .as_ref()
                .map(|discovery| discovery.discovered_nodes())
                .unwrap_or_default(),
            statistics: self.engine.statistics(),
            nodes,
            membership: MembershipSummary {
                alive_count,
                member_counts_by_state: counts,
                record_set_version: self.engine.store().global_version(),
            },
        }
    }
}
