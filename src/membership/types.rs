use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// SWIM member state.
///
/// `Alive -> Suspect -> Failed -> (removed)`, `Suspect -> Alive` on refutation,
/// anything `-> Left` on graceful departure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PeerState {
    Alive,
    Suspect,
    Failed,
    Left,
}

impl PeerState {
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Alive, Suspect) | (Suspect, Failed) | (Suspect, Alive) | (Alive | Suspect | Failed, Left)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Alive => "alive",
            PeerState::Suspect => "suspect",
            PeerState::Failed => "failed",
            PeerState::Left => "left",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known peer.
///
/// The `incarnation` is a logical clock owned by the peer itself; it only grows when
/// the peer refutes a suspicion about itself.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub ip_address: IpAddr,
    pub discovery_port: u16,
    pub protocol_port: u16,
    pub metadata: HashMap<String, String>,
    pub incarnation: u64,
    pub state: PeerState,
    pub last_state_change: Instant,
    /// EWMA of direct ack latency.
    pub round_trip_estimate: Option<Duration>,
    /// Whether a direct or indirect ack has ever been received.
    pub confirmed: bool,
    pub last_seen: Instant,
}

impl PeerInfo {
    pub fn new(node_id: NodeId, protocol_addr: SocketAddr, discovery_port: u16) -> Self {
        let now = Instant::now();
        Self {
            node_id,
            ip_address: protocol_addr.ip(),
            discovery_port,
            protocol_port: protocol_addr.port(),
            metadata: HashMap::new(),
            incarnation: 0,
            state: PeerState::Alive,
            last_state_change: now,
            round_trip_estimate: None,
            confirmed: false,
            last_seen: now,
        }
    }

    pub fn protocol_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.protocol_port)
    }

    pub fn is_alive(&self) -> bool {
        self.state == PeerState::Alive
    }

    /// Folds one ack latency sample into the estimate (alpha = 1/8, as TCP SRTT).
    pub fn observe_round_trip(&mut self, sample: Duration) {
        self.round_trip_estimate = Some(match self.round_trip_estimate {
            Some(current) => (current * 7 + sample) / 8,
            None => sample,
        });
    }

    pub fn to_delta(&self) -> MembershipDelta {
        MembershipDelta {
            node_id: self.node_id.clone(),
            addr: self.protocol_addr(),
            discovery_port: self.discovery_port,
            incarnation: self.incarnation,
            state: self.state,
        }
    }
}

/// Membership rumour piggybacked on protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipDelta {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    pub discovery_port: u16,
    pub incarnation: u64,
    pub state: PeerState,
}

/// Membership changes observed by the sync engine and the status reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// First datagram from an unknown node.
    Joined(NodeId),
    /// First ack from a node; it now counts as active.
    Confirmed(NodeId),
    Suspected(NodeId),
    Recovered(NodeId),
    Failed(NodeId),
    Left(NodeId),
    /// Dropped from the view after the removal grace.
    Removed(NodeId),
}
