use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::gossip::{GossipQueue, gossip_fanout, retransmit_limit};
use super::handler::SyncHandler;
use super::registry::{DeltaOutcome, NodeRegistry, Observation, StateChange, SweepAction};
use super::types::{MembershipDelta, MembershipEvent, NodeId, PeerInfo, PeerState};
use crate::config::{ClusterConfig, ProtocolTimings};
use crate::discovery::types::Announcement;
use crate::error::Result;
use crate::records::types::DnsRecord;
use crate::transport::UdpChannel;
use crate::transport::codec::{self, GossipMessage, MAX_DATAGRAM_BYTES, MessageKind};

const EVENT_CAPACITY: usize = 256;

/// An outstanding probe waiting for an ack, direct or relayed.
struct PendingProbe {
    target: NodeId,
    sent_at: Instant,
    notify: Arc<Notify>,
}

/// A PING sent on behalf of another node's PING_REQ.
struct Relay {
    requester: SocketAddr,
    requester_seq: u64,
    at: Instant,
}

pub struct MembershipService {
    local_id: NodeId,
    advertised: SocketAddr,
    discovery_port: u16,
    incarnation: AtomicU64,
    registry: Arc<NodeRegistry>,
    channel: Arc<UdpChannel>,
    timings: ProtocolTimings,
    membership_queue: Mutex<GossipQueue<NodeId, MembershipDelta>>,
    record_queue: Mutex<GossipQueue<String, DnsRecord>>,
    pending_acks: DashMap<u64, PendingProbe>,
    relays: DashMap<u64, Relay>,
    probes_in_flight: DashMap<NodeId, ()>,
    seq: AtomicU64,
    events: broadcast::Sender<MembershipEvent>,
    sync_handler: OnceLock<Weak<dyn SyncHandler>>,
}

impl MembershipService {
    pub fn new(config: &ClusterConfig, channel: Arc<UdpChannel>, discovery_port: u16) -> Result<Arc<Self>> {
        let advertised = SocketAddr::new(config.host_ip, channel.local_addr()?.port());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            local_id: config.node_id.clone(),
            advertised,
            discovery_port,
            incarnation: AtomicU64::new(0),
            registry: Arc::new(NodeRegistry::new(config.node_id.clone())),
            channel,
            timings: config.timings.clone(),
            membership_queue: Mutex::new(GossipQueue::new()),
            record_queue: Mutex::new(GossipQueue::new()),
            pending_acks: DashMap::new(),
            relays: DashMap::new(),
            probes_in_flight: DashMap::new(),
            seq: AtomicU64::new(1),
            events,
            sync_handler: OnceLock::new(),
        }))
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn timings(&self) -> &ProtocolTimings {
        &self.timings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Installs the receiver of record traffic. Only the first call takes effect.
    pub fn set_sync_handler(&self, handler: Weak<dyn SyncHandler>) {
        if self.sync_handler.set(handler).is_err() {
            warn!("Sync handler already installed, ignoring");
        }
    }

    fn sync_handler(&self) -> Option<Arc<dyn SyncHandler>> {
        self.sync_handler.get()?.upgrade()
    }

    pub fn alive_members(&self) -> Vec<PeerInfo> {
        self.registry.alive_peers()
    }

    pub fn get_member(&self, node_id: &NodeId) -> Option<PeerInfo> {
        self.registry.get(node_id)
    }

    /// Queues a record delta for piggybacking.
    pub fn enqueue_record(&self, record: DnsRecord) {
        self.record_queue.lock().push(record.hostname.clone(), record);
    }

    pub fn pending_gossip(&self) -> (usize, usize) {
        (self.membership_queue.lock().len(), self.record_queue.lock().len())
    }

    fn enqueue_membership(&self, delta: MembershipDelta) {
        self.membership_queue.lock().push(delta.node_id.clone(), delta);
    }

    fn enqueue_current(&self, node_id: &NodeId) {
        if let Some(peer) = self.registry.get(node_id) {
            self.enqueue_membership(peer.to_delta());
        }
    }

    fn self_delta(&self) -> MembershipDelta {
        MembershipDelta {
            node_id: self.local_id.clone(),
            addr: self.advertised,
            discovery_port: self.discovery_port,
            incarnation: self.incarnation(),
            state: PeerState::Alive,
        }
    }

    fn emit(&self, event: MembershipEvent) {
        let _ = self.events.send(event);
    }

    fn emit_change(&self, change: &StateChange) {
        let id = change.node_id.clone();
        let event = match change.to {
            PeerState::Alive => MembershipEvent::Recovered(id),
            PeerState::Suspect => MembershipEvent::Suspected(id),
            PeerState::Failed => MembershipEvent::Failed(id),
            PeerState::Left => MembershipEvent::Left(id),
        };
        self.emit(event);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    // ============================================================
    // SENDING
    // ============================================================

    /// Sends one message, piggybacking as many pending deltas as fit.
    pub async fn send(&self, addr: SocketAddr, kind: MessageKind) -> Result<()> {
        let mut msg = GossipMessage::new(self.local_id.clone(), self.incarnation(), kind);
        self.piggyback(&mut msg);
        self.channel.send(&msg, addr).await
    }

    fn piggyback(&self, msg: &mut GossipMessage) {
        let limit = retransmit_limit(self.timings.retransmit_multiplier, self.registry.len() + 1);
        let mut used = codec::encoded_len(msg);
        let mut fits = |size: usize| {
            if used + size <= MAX_DATAGRAM_BYTES {
                used += size;
                true
            } else {
                false
            }
        };

        let deltas = self
            .membership_queue
            .lock()
            .take(limit, |delta| fits(codec::encoded_len(delta)));
        msg.membership_deltas.extend(deltas);

        if !matches!(msg.kind, MessageKind::SyncFull { .. }) {
            let records = self
                .record_queue
                .lock()
                .take(limit, |record| fits(codec::encoded_len(record)));
            msg.record_deltas.extend(records);
        }
    }

    /// Sends a full record set as a series of `SYNC_FULL` chunks. Returns the number
    /// of chunks sent.
    pub async fn send_full_state(&self, addr: SocketAddr, reply: bool, records: Vec<DnsRecord>) -> Result<u32> {
        let header = GossipMessage::new(
            self.local_id.clone(),
            self.incarnation(),
            MessageKind::SyncFull {
                chunk: 0,
                total: 0,
                reply,
            },
        );
        let chunks = codec::chunk_records(records, codec::encoded_len(&header));
        let total = chunks.len() as u32;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut msg = GossipMessage::new(
                self.local_id.clone(),
                self.incarnation(),
                MessageKind::SyncFull {
                    chunk: index as u32,
                    total,
                    reply,
                },
            );
            msg.record_deltas = chunk;
            self.piggyback(&mut msg);
            self.channel.send(&msg, addr).await?;
        }
        Ok(total)
    }

    /// Pings a seed address. Its reply registers the seed like any unknown sender.
    pub async fn join(&self, seed: SocketAddr) -> Result<()> {
        info!("Joining cluster via seed {}", seed);
        let seq = self.next_seq();
        self.send(seed, MessageKind::Ping { seq }).await
    }

    /// Registers a peer learned from a discovery announcement and sends the PING
    /// handshake. Returns false if the peer was already known.
    pub async fn introduce(&self, announcement: &Announcement) -> bool {
        if announcement.node_id == self.local_id {
            return false;
        }

        let addr = announcement.protocol_addr();
        let mut peer = PeerInfo::new(announcement.node_id.clone(), addr, announcement.discovery_port);
        peer.metadata = announcement.metadata.clone();

        if !self.registry.insert_new(peer) {
            self.registry.update_metadata(
                &announcement.node_id,
                announcement.discovery_port,
                &announcement.metadata,
            );
            return false;
        }

        info!("Discovered node {} at {}", announcement.node_id, addr);
        self.enqueue_current(&announcement.node_id);
        self.emit(MembershipEvent::Joined(announcement.node_id.clone()));

        let seq = self.next_seq();
        if let Err(e) = self.send(addr, MessageKind::Ping { seq }).await {
            warn!("Failed to send handshake ping to {}: {}", announcement.node_id, e);
        }
        true
    }

    /// Best-effort LEAVE to every peer not already known to be gone.
    pub async fn leave(&self) {
        let peers: Vec<PeerInfo> = self
            .registry
            .peers()
            .into_iter()
            .filter(|peer| matches!(peer.state, PeerState::Alive | PeerState::Suspect))
            .collect();

        info!("Leaving cluster, notifying {} peers", peers.len());
        for peer in peers {
            if let Err(e) = self.send(peer.protocol_addr(), MessageKind::Leave).await {
                debug!("Failed to send LEAVE to {}: {}", peer.node_id, e);
            }
        }
    }

    // ============================================================
    // PROTOCOL ROUNDS
    // ============================================================

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Starting membership protocol ({:?} period)", self.timings.protocol_interval);

        let mut ticker = tokio::time::interval(self.timings.protocol_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut probes = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            while probes.try_join_next().is_some() {}
            self.round(&mut probes).await;
        }

        probes.abort_all();
        info!("Membership protocol stopped");
    }

    async fn round(self: &Arc<Self>, probes: &mut JoinSet<()>) {
        let now = Instant::now();

        for action in self.registry.sweep(now, &self.timings) {
            match action {
                SweepAction::Failed(change) => {
                    warn!(
                        "Node {} declared FAILED (no refutation within {:?})",
                        change.node_id, self.timings.suspicion_timeout
                    );
                    self.enqueue_current(&change.node_id);
                    self.emit_change(&change);
                }
                SweepAction::Removed(node_id) => {
                    info!("Node {} removed from membership view", node_id);
                    self.emit(MembershipEvent::Removed(node_id));
                }
            }
        }

        let window = self.timings.suspicion_window();
        self.relays.retain(|_, relay| now.saturating_duration_since(relay.at) < window);

        let alive = self.registry.alive_peers();
        let targets: Vec<PeerInfo> = {
            let candidates: Vec<&PeerInfo> = alive
                .iter()
                .filter(|peer| !self.probes_in_flight.contains_key(&peer.node_id))
                .collect();
            let mut rng = rand::thread_rng();
            candidates
                .choose_multiple(&mut rng, self.timings.probe_fanout)
                .map(|peer| (*peer).clone())
                .collect()
        };

        for target in targets {
            self.probes_in_flight.insert(target.node_id.clone(), ());
            probes.spawn(Arc::clone(self).probe(target));
        }

        let has_pending = {
            let (members, records) = self.pending_gossip();
            members + records > 0
        };
        if has_pending && !alive.is_empty() {
            let recipients: Vec<SocketAddr> = {
                let mut rng = rand::thread_rng();
                alive
                    .choose_multiple(&mut rng, gossip_fanout(alive.len()))
                    .map(PeerInfo::protocol_addr)
                    .collect()
            };
            for addr in recipients {
                if let Err(e) = self.send(addr, MessageKind::Gossip).await {
                    warn!("Failed to gossip to {}: {}", addr, e);
                }
            }
        }
    }

    /// Direct probe, then indirect probes, then suspicion if nothing answered within
    /// the suspicion window measured from probe start.
    async fn probe(self: Arc<Self>, target: PeerInfo) {
        let started = Instant::now();
        let seq = self.next_seq();
        let notify = Arc::new(Notify::new());
        self.pending_acks.insert(
            seq,
            PendingProbe {
                target: target.node_id.clone(),
                sent_at: started,
                notify: Arc::clone(&notify),
            },
        );

        let acked = self.await_ack(&target, seq, &notify, started).await;

        self.pending_acks.remove(&seq);
        self.probes_in_flight.remove(&target.node_id);

        if acked {
            return;
        }
        if let Some(change) = self
            .registry
            .suspect_if_unchanged(&target.node_id, target.incarnation, Instant::now())
        {
            warn!(
                "Node {} SUSPECTED (no ack within {:?})",
                target.node_id,
                self.timings.suspicion_window()
            );
            self.enqueue_current(&target.node_id);
            self.emit_change(&change);
        }
    }

    async fn await_ack(&self, target: &PeerInfo, seq: u64, notify: &Notify, started: Instant) -> bool {
        if let Err(e) = self.send(target.protocol_addr(), MessageKind::Ping { seq }).await {
            warn!("Failed to ping {}: {}", target.node_id, e);
        }
        if tokio::time::timeout(self.timings.ping_timeout, notify.notified()).await.is_ok() {
            return true;
        }

        let helpers: Vec<PeerInfo> = {
            let others: Vec<PeerInfo> = self
                .registry
                .alive_peers()
                .into_iter()
                .filter(|peer| peer.node_id != target.node_id)
                .collect();
            let mut rng = rand::thread_rng();
            others
                .choose_multiple(&mut rng, self.timings.indirect_probes)
                .cloned()
                .collect()
        };

        debug!(
            "No direct ack from {}, asking {} helpers",
            target.node_id,
            helpers.len()
        );
        for helper in &helpers {
            let kind = MessageKind::PingReq {
                seq,
                target: target.node_id.clone(),
                target_addr: target.protocol_addr(),
            };
            if let Err(e) = self.send(helper.protocol_addr(), kind).await {
                warn!("Failed to send PING_REQ via {}: {}", helper.node_id, e);
            }
        }

        let remaining = self.timings.suspicion_window().saturating_sub(started.elapsed());
        tokio::time::timeout(remaining, notify.notified()).await.is_ok()
    }

    // ============================================================
    // RECEIVING
    // ============================================================

    pub async fn run_receiver(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = UdpChannel::recv_buffer();

        loop {
            let received = tokio::select! {
                received = self.channel.recv(&mut buf) => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok((src, Ok(msg))) => self.handle_message(msg, src).await,
                Ok((src, Err(e))) => debug!("Dropping malformed datagram from {}: {}", src, e),
                Err(e) => {
                    warn!("Failed to receive on {} channel: {}", self.channel.name(), e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) {
        if msg.sender_id == self.local_id {
            return;
        }
        tracing::trace!("{} from {} ({})", msg.kind.name(), msg.sender_id, src);

        let now = Instant::now();
        match self.registry.observe_datagram(
            &msg.sender_id,
            src,
            msg.incarnation,
            self.discovery_port,
            now,
        ) {
            Observation::New => {
                info!("Node {} joined from {}", msg.sender_id, src);
                self.enqueue_current(&msg.sender_id);
                self.emit(MembershipEvent::Joined(msg.sender_id.clone()));
            }
            Observation::Refuted(change) => {
                info!(
                    "Node {} refuted suspicion (inc={})",
                    change.node_id, change.incarnation
                );
                self.enqueue_current(&change.node_id);
                self.emit_change(&change);
            }
            Observation::Terminal(state) => {
                debug!(
                    "Ignoring {} from {} peer {}",
                    msg.kind.name(),
                    state,
                    msg.sender_id
                );
                return;
            }
            Observation::Known => {}
        }

        self.apply_membership_deltas(&msg.membership_deltas, now);

        let GossipMessage {
            sender_id,
            kind,
            record_deltas,
            ..
        } = msg;

        let record_deltas = if matches!(kind, MessageKind::SyncFull { .. }) {
            record_deltas
        } else {
            if !record_deltas.is_empty()
                && let Some(handler) = self.sync_handler()
            {
                handler.on_record_deltas(&sender_id, record_deltas).await;
            }
            Vec::new()
        };

        match kind {
            MessageKind::Ping { seq } => {
                let ack = MessageKind::Ack {
                    seq,
                    target: self.local_id.clone(),
                    target_incarnation: self.incarnation(),
                };
                if let Err(e) = self.send(src, ack).await {
                    warn!("Failed to ack {}: {}", sender_id, e);
                }
            }
            MessageKind::Ack {
                seq,
                target,
                target_incarnation,
            } => {
                self.handle_ack(&sender_id, seq, target, target_incarnation, now).await;
            }
            MessageKind::PingReq {
                seq,
                target,
                target_addr,
            } => {
                let relay_seq = self.next_seq();
                self.relays.insert(
                    relay_seq,
                    Relay {
                        requester: src,
                        requester_seq: seq,
                        at: now,
                    },
                );
                debug!("Probing {} on behalf of {}", target, sender_id);
                if let Err(e) = self.send(target_addr, MessageKind::Ping { seq: relay_seq }).await {
                    debug!("Failed to relay ping to {}: {}", target, e);
                }
            }
            MessageKind::Leave => {
                if let Some(change) = self.registry.transition(&sender_id, PeerState::Left, now) {
                    info!("Node {} LEFT the cluster", sender_id);
                    self.enqueue_current(&sender_id);
                    self.emit_change(&change);
                }
            }
            MessageKind::SyncDigest { digest, record_count } => {
                if let Some(handler) = self.sync_handler() {
                    handler.on_sync_digest(&sender_id, src, digest, record_count).await;
                }
            }
            MessageKind::SyncFull { chunk, total, reply } => {
                if let Some(handler) = self.sync_handler() {
                    handler
                        .on_sync_full(&sender_id, src, chunk, total, reply, record_deltas)
                        .await;
                }
            }
            MessageKind::Gossip => {}
            MessageKind::Discover(_) => {
                debug!("Ignoring DISCOVER from {} on protocol channel", sender_id);
            }
        }
    }

    fn apply_membership_deltas(&self, deltas: &[MembershipDelta], now: Instant) {
        for delta in deltas {
            if delta.node_id == self.local_id {
                self.refute_if_needed(delta);
                continue;
            }

            let outcome = self.registry.apply_delta(delta, now);
            match &outcome {
                DeltaOutcome::Inserted => {
                    info!("Learned about node {} at {} via gossip", delta.node_id, delta.addr);
                    self.emit(MembershipEvent::Joined(delta.node_id.clone()));
                }
                DeltaOutcome::Changed(change) => {
                    info!(
                        "Node {} is now {} (inc={}, via gossip)",
                        change.node_id, change.to, change.incarnation
                    );
                    self.emit_change(change);
                }
                DeltaOutcome::Updated | DeltaOutcome::Ignored => {}
            }
            if outcome.is_news() {
                self.enqueue_current(&delta.node_id);
            }
        }
    }

    /// A rumour that we are suspected, failed or gone is answered by bumping our
    /// incarnation past it and gossiping Alive about ourselves.
    fn refute_if_needed(&self, delta: &MembershipDelta) {
        if delta.state == PeerState::Alive {
            return;
        }
        let current = self.incarnation();
        if delta.incarnation < current {
            return;
        }

        let next = delta.incarnation + 1;
        self.incarnation.fetch_max(next, Ordering::SeqCst);
        info!(
            "Refuting {} rumour about self (inc {} -> {})",
            delta.state,
            current,
            self.incarnation()
        );
        self.enqueue_membership(self.self_delta());
    }

    async fn handle_ack(
        &self,
        sender: &NodeId,
        seq: u64,
        target: NodeId,
        target_incarnation: u64,
        now: Instant,
    ) {
        if let Some((_, relay)) = self.relays.remove(&seq) {
            let forwarded = MessageKind::Ack {
                seq: relay.requester_seq,
                target: target.clone(),
                target_incarnation,
            };
            if let Err(e) = self.send(relay.requester, forwarded).await {
                debug!("Failed to forward ack for {}: {}", target, e);
            }
            return;
        }

        let direct = sender == &target;
        let (matched, round_trip) = match self.pending_acks.get(&seq) {
            Some(pending) if pending.target == target => {
                pending.notify.notify_one();
                (true, direct.then(|| now.saturating_duration_since(pending.sent_at)))
            }
            _ => (false, None),
        };

        if (matched || direct) && self.registry.mark_confirmed(&target, round_trip, now) {
            info!("Node {} confirmed active", target);
            self.emit(MembershipEvent::Confirmed(target));
        }
    }
}
