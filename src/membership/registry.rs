//! Node Registry
//!
//! The membership view: every known peer keyed by `NodeId`. All state changes go
//! through [`NodeRegistry::transition`], which rejects moves the SWIM state machine
//! does not allow. Each entry is updated under its own `DashMap` shard lock, so a
//! transition is validated and applied atomically.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::types::{MembershipDelta, NodeId, PeerInfo, PeerState};
use crate::config::ProtocolTimings;

/// A validated state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub node_id: NodeId,
    pub from: PeerState,
    pub to: PeerState,
    pub incarnation: u64,
}

/// What a direct datagram from a peer did to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Sender was unknown and has been registered as Alive.
    New,
    /// Sender was Suspect and its incarnation refuted the suspicion.
    Refuted(StateChange),
    Known,
    /// Sender is Failed or Left; its state is left untouched.
    Terminal(PeerState),
}

/// What applying a gossiped delta did to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    Inserted,
    Changed(StateChange),
    /// Same state, newer incarnation.
    Updated,
    Ignored,
}

impl DeltaOutcome {
    /// Whether the rumour carried news and should be gossiped further.
    pub fn is_news(&self) -> bool {
        !matches!(self, DeltaOutcome::Ignored)
    }
}

/// Timer-driven change produced by [`NodeRegistry::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    Failed(StateChange),
    Removed(NodeId),
}

#[derive(Debug)]
pub struct NodeRegistry {
    local_id: NodeId,
    peers: DashMap<NodeId, PeerInfo>,
}

impl NodeRegistry {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            peers: DashMap::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn get(&self, node_id: &NodeId) -> Option<PeerInfo> {
        self.peers.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.contains_key(node_id)
    }

    /// Registers a peer if it is not already known. Returns false for known peers
    /// and for the local node.
    pub fn insert_new(&self, peer: PeerInfo) -> bool {
        if peer.node_id == self.local_id {
            return false;
        }
        match self.peers.entry(peer.node_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(peer);
                true
            }
        }
    }

    /// Records a datagram sent directly by `node_id`.
    ///
    /// Direct contact is the strongest liveness evidence: an incarnation at or above
    /// the suspected one refutes a suspicion.
    pub fn observe_datagram(
        &self,
        node_id: &NodeId,
        src: SocketAddr,
        incarnation: u64,
        default_discovery_port: u16,
        now: Instant,
    ) -> Observation {
        if let Some(mut peer) = self.peers.get_mut(node_id) {
            peer.last_seen = now;
            let state = peer.state;
            match state {
                PeerState::Failed | PeerState::Left => return Observation::Terminal(state),
                PeerState::Suspect if incarnation >= peer.incarnation => {
                    let change = Self::apply_transition(&mut peer, PeerState::Alive, incarnation, now);
                    peer.ip_address = src.ip();
                    peer.protocol_port = src.port();
                    return Observation::Refuted(change);
                }
                _ => {}
            }
            if incarnation > peer.incarnation {
                peer.incarnation = incarnation;
            }
            if peer.protocol_addr() != src {
                peer.ip_address = src.ip();
                peer.protocol_port = src.port();
            }
            return Observation::Known;
        }

        let mut peer = PeerInfo::new(node_id.clone(), src, default_discovery_port);
        peer.incarnation = incarnation;
        peer.last_seen = now;
        if self.insert_new(peer) {
            Observation::New
        } else {
            Observation::Known
        }
    }

    /// Applies a membership rumour about another node.
    ///
    /// Suspect overrides Alive at an equal or higher incarnation, and so does Alive
    /// over Suspect. Any equal-incarnation flapping ends once the suspected node
    /// hears the rumour and refutes with a bumped incarnation. Left overrides
    /// everything. A Failed rumour about an Alive peer only moves it to
    /// Suspect, so the local suspicion timer still decides.
    pub fn apply_delta(&self, delta: &MembershipDelta, now: Instant) -> DeltaOutcome {
        if delta.node_id == self.local_id {
            return DeltaOutcome::Ignored;
        }

        let Some(mut peer) = self.peers.get_mut(&delta.node_id) else {
            return match delta.state {
                PeerState::Alive | PeerState::Suspect => {
                    let mut peer = PeerInfo::new(delta.node_id.clone(), delta.addr, delta.discovery_port);
                    peer.incarnation = delta.incarnation;
                    peer.state = delta.state;
                    if self.insert_new(peer) {
                        DeltaOutcome::Inserted
                    } else {
                        DeltaOutcome::Ignored
                    }
                }
                PeerState::Failed | PeerState::Left => DeltaOutcome::Ignored,
            };
        };

        let inc = delta.incarnation;
        let target = match (peer.state, delta.state) {
            (PeerState::Suspect, PeerState::Alive) if inc >= peer.incarnation => Some(PeerState::Alive),
            (PeerState::Alive, PeerState::Suspect) if inc >= peer.incarnation => Some(PeerState::Suspect),
            (PeerState::Alive, PeerState::Failed) if inc >= peer.incarnation => Some(PeerState::Suspect),
            (PeerState::Suspect, PeerState::Failed) if inc >= peer.incarnation => Some(PeerState::Failed),
            (current, PeerState::Left) if current != PeerState::Left => Some(PeerState::Left),
            _ => None,
        };

        match target {
            Some(next) => {
                let incarnation = inc.max(peer.incarnation);
                DeltaOutcome::Changed(Self::apply_transition(&mut peer, next, incarnation, now))
            }
            None if delta.state == peer.state && inc > peer.incarnation => {
                peer.incarnation = inc;
                DeltaOutcome::Updated
            }
            None => DeltaOutcome::Ignored,
        }
    }

    /// Moves a peer to `to` if the state machine allows it.
    pub fn transition(&self, node_id: &NodeId, to: PeerState, now: Instant) -> Option<StateChange> {
        let mut peer = self.peers.get_mut(node_id)?;
        if !peer.state.can_transition_to(to) {
            tracing::debug!(
                "Rejected transition for {}: {} -> {}",
                node_id,
                peer.state,
                to
            );
            return None;
        }
        let incarnation = peer.incarnation;
        Some(Self::apply_transition(&mut peer, to, incarnation, now))
    }

    /// Suspects a peer only if it is still Alive at the incarnation that was probed.
    pub fn suspect_if_unchanged(&self, node_id: &NodeId, probed_incarnation: u64, now: Instant) -> Option<StateChange> {
        let mut peer = self.peers.get_mut(node_id)?;
        if peer.state != PeerState::Alive || peer.incarnation > probed_incarnation {
            return None;
        }
        let incarnation = peer.incarnation;
        Some(Self::apply_transition(&mut peer, PeerState::Suspect, incarnation, now))
    }

    fn apply_transition(peer: &mut PeerInfo, to: PeerState, incarnation: u64, now: Instant) -> StateChange {
        let change = StateChange {
            node_id: peer.node_id.clone(),
            from: peer.state,
            to,
            incarnation,
        };
        peer.state = to;
        peer.incarnation = incarnation;
        peer.last_state_change = now;
        change
    }

    /// Marks a peer as confirmed by an ack. Returns true the first time.
    pub fn mark_confirmed(&self, node_id: &NodeId, round_trip: Option<Duration>, now: Instant) -> bool {
        let Some(mut peer) = self.peers.get_mut(node_id) else {
            return false;
        };
        peer.last_seen = now;
        if let Some(sample) = round_trip {
            peer.observe_round_trip(sample);
        }
        let first = !peer.confirmed;
        peer.confirmed = true;
        first
    }

    /// Refreshes identity data learned from a discovery announcement.
    pub fn update_metadata(
        &self,
        node_id: &NodeId,
        discovery_port: u16,
        metadata: &std::collections::HashMap<String, String>,
    ) {
        if let Some(mut peer) = self.peers.get_mut(node_id) {
            peer.discovery_port = discovery_port;
            peer.metadata = metadata.clone();
        }
    }

    /// Expires suspicion timers and removal grace periods.
    pub fn sweep(&self, now: Instant, timings: &ProtocolTimings) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        let mut to_remove = Vec::new();

        for mut entry in self.peers.iter_mut() {
            let peer = entry.value_mut();
            let in_state = now.saturating_duration_since(peer.last_state_change);

            match peer.state {
                PeerState::Suspect if in_state >= timings.suspicion_timeout => {
                    let incarnation = peer.incarnation;
                    actions.push(SweepAction::Failed(Self::apply_transition(
                        peer,
                        PeerState::Failed,
                        incarnation,
                        now,
                    )));
                }
                PeerState::Failed | PeerState::Left if in_state >= timings.removal_grace => {
                    to_remove.push(peer.node_id.clone());
                }
                _ => {}
            }
        }

        for node_id in to_remove {
            let removed = self
                .peers
                .remove_if(&node_id, |_, peer| {
                    matches!(peer.state, PeerState::Failed | PeerState::Left)
                })
                .is_some();
            if removed {
                actions.push(SweepAction::Removed(node_id));
            }
        }

        actions
    }

    pub fn remove(&self, node_id: &NodeId) -> Option<PeerInfo> {
        self.peers.remove(node_id).map(|(_, peer)| peer)
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.iter().map(|entry| entry.value().clone()).collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn alive_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.peers.iter().filter(|entry| entry.value().is_alive()).count()
    }

    /// Alive peers that answered at least one probe.
    pub fn active_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|entry| entry.value().is_alive() && entry.value().confirmed)
            .count()
    }

    pub fn counts_by_state(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = [
            PeerState::Alive,
            PeerState::Suspect,
            PeerState::Failed,
            PeerState::Left,
        ]
        .iter()
        .map(|state| (state.as_str().to_string(), 0))
        .collect();

        for entry in self.peers.iter() {
            *counts.entry(entry.value().state.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
