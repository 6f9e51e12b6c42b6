use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::stats::{StatisticsSnapshot, SyncStatistics};
use crate::config::ProtocolTimings;
use crate::error::{ClusterError, Result};
use crate::membership::types::{MembershipEvent, NodeId, PeerInfo};
use crate::membership::{MembershipService, SyncHandler};
use crate::records::store::{RecordStore, RecordView};
use crate::records::types::{ChangeOrigin, DnsRecord, LocalChange, MergeOutcome, RecordChange, now_ms};
use crate::records::validate::{check_ttl, normalize_hostname, parse_address};
use crate::transport::codec::MessageKind;

/// Observer of applied record changes.
///
/// Called synchronously after the store is updated; implementations must not block.
pub trait RecordListener: Send + Sync {
    fn on_record_change(&self, change: &RecordChange);
}

/// Per-peer anti-entropy bookkeeping, cleared when the peer is removed.
#[derive(Debug, Default, Clone)]
pub struct PeerSyncState {
    pub last_digest_sent: Option<Instant>,
    pub last_full_sync: Option<Instant>,
    pub chunks_received: u32,
}

pub struct SyncEngine {
    node_id: NodeId,
    store: Arc<RecordStore>,
    /// `None` when synchronization is disabled.
    membership: Option<Arc<MembershipService>>,
    listeners: RwLock<Vec<Arc<dyn RecordListener>>>,
    stats: Arc<SyncStatistics>,
    timings: ProtocolTimings,
    last_force_sync: Mutex<Option<Instant>>,
    peer_sync: DashMap<NodeId, PeerSyncState>,
}

impl SyncEngine {
    /// Creates the engine and installs it as the membership's sync handler.
    pub fn new(
        store: Arc<RecordStore>,
        membership: Option<Arc<MembershipService>>,
        stats: Arc<SyncStatistics>,
        timings: ProtocolTimings,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            node_id: store.node_id().clone(),
            store,
            membership,
            listeners: RwLock::new(Vec::new()),
            stats,
            timings,
            last_force_sync: Mutex::new(None),
            peer_sync: DashMap::new(),
        });

        if let Some(membership) = &engine.membership {
            let weak = Arc::downgrade(&engine);
            let handler: Weak<dyn SyncHandler> = weak;
            membership.set_sync_handler(handler);
        }
        engine
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn view(&self) -> RecordView {
        RecordView::new(Arc::clone(&self.store))
    }

    pub fn is_enabled(&self) -> bool {
        self.membership.is_some()
    }

    pub fn add_listener(&self, listener: Arc<dyn RecordListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, origin: ChangeOrigin, record: &DnsRecord) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let change = RecordChange {
            origin,
            record: record.clone(),
        };
        for listener in listeners {
            listener.on_record_change(&change);
        }
    }

    // ============================================================
    // LOCAL MUTATIONS
    // ============================================================

    /// Validates and upserts an A or AAAA record.
    pub fn add_record(&self, hostname: &str, ip: &str, ttl: u32) -> Result<DnsRecord> {
        let hostname = normalize_hostname(hostname)?;
        let (address, record_type) = parse_address(ip)?;
        let ttl = check_ttl(ttl)?;

        let change = LocalChange::Upsert {
            hostname: hostname.clone(),
            record_type,
            value: address.to_string(),
            ttl,
        };
        self.apply_local_change(change)
            .ok_or(ClusterError::InvalidHostname(hostname))
    }

    /// Tombstones a hostname. Returns false if it had no live record.
    pub fn remove_record(&self, hostname: &str) -> Result<bool> {
        let hostname = normalize_hostname(hostname)?;
        Ok(self.apply_local_change(LocalChange::Remove { hostname }).is_some())
    }

    /// Applies a local mutation: new version, store write, gossip, listeners.
    pub fn apply_local_change(&self, change: LocalChange) -> Option<DnsRecord> {
        let record = self.store.apply_local(change, self.timings.tombstone_grace)?;

        if record.tombstone {
            info!("Removed DNS record {} (version {})", record.hostname, record.version);
        } else {
            info!(
                "Added DNS record {} {} {} (version {})",
                record.hostname, record.record_type, record.value, record.version
            );
        }

        if let Some(membership) = &self.membership {
            membership.enqueue_record(record.clone());
        }
        self.notify(ChangeOrigin::Local, &record);
        Some(record)
    }

    // ============================================================
    // REMOTE MERGES
    // ============================================================

    /// Merges records received from `from`. Applied records are re-gossiped and
    /// reported to listeners. Returns how many were applied.
    pub fn on_gossip_received(&self, from: &NodeId, deltas: Vec<DnsRecord>) -> usize {
        let now = now_ms();
        let mut applied = 0;

        for record in deltas {
            match self.store.merge(record.clone(), now) {
                MergeOutcome::Applied => {
                    debug!(
                        "Merged {} (version {}) from {}",
                        record.hostname, record.version, from
                    );
                    applied += 1;
                    if let Some(membership) = &self.membership {
                        membership.enqueue_record(record.clone());
                    }
                    self.notify(ChangeOrigin::Remote { from: from.clone() }, &record);
                }
                MergeOutcome::Stale | MergeOutcome::Expired => {}
            }
        }

        if applied > 0 {
            self.stats.records_synced(applied);
        }
        applied
    }

    // ============================================================
    // ANTI-ENTROPY
    // ============================================================

    fn membership(&self) -> Result<&Arc<MembershipService>> {
        self.membership.as_ref().ok_or(ClusterError::SyncDisabled)
    }

    pub async fn send_digest(&self, peer: &PeerInfo) -> Result<()> {
        let membership = self.membership()?;
        let kind = MessageKind::SyncDigest {
            digest: self.store.digest(),
            record_count: self.store.len() as u64,
        };
        membership.send(peer.protocol_addr(), kind).await?;
        self.peer_sync
            .entry(peer.node_id.clone())
            .or_default()
            .last_digest_sent = Some(Instant::now());
        Ok(())
    }

    /// Sends every entry, tombstones included, as `SYNC_FULL` chunks.
    pub async fn push_full_state(&self, addr: SocketAddr, reply: bool) -> Result<u32> {
        let membership = self.membership()?;
        let records = self.store.all_entries();
        let count = records.len();
        let chunks = membership.send_full_state(addr, reply, records).await?;
        debug!("Pushed {} records in {} chunks to {}", count, chunks, addr);
        Ok(chunks)
    }

    /// One anti-entropy tick: purge expired tombstones, then exchange digests with
    /// one random Alive peer.
    pub async fn anti_entropy_round(&self) {
        let purged = self.store.purge_expired_tombstones(now_ms());
        if purged > 0 {
            debug!("Purged {} expired tombstones", purged);
        }

        let Some(membership) = &self.membership else {
            return;
        };
        let peer = {
            let alive = membership.alive_members();
            let mut rng = rand::thread_rng();
            alive.choose(&mut rng).cloned()
        };
        let Some(peer) = peer else {
            return;
        };

        match self.send_digest(&peer).await {
            Ok(()) => self.stats.sync_completed(),
            Err(e) => warn!("Failed to send digest to {}: {}", peer.node_id, e),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Starting anti-entropy ({:?} interval)", self.timings.full_sync_interval);
        let mut ticker = tokio::time::interval(self.timings.full_sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.anti_entropy_round().await;
        }
    }

    /// Pushes the full record set to every Alive peer. Rate limited.
    pub async fn force_sync(&self) -> Result<usize> {
        let membership = self.membership()?;

        {
            let mut last = self.last_force_sync.lock();
            let now = Instant::now();
            if let Some(previous) = *last {
                let elapsed = now.saturating_duration_since(previous);
                if elapsed < self.timings.force_sync_min_interval {
                    return Err(ClusterError::RateLimited {
                        retry_after: self.timings.force_sync_min_interval - elapsed,
                    });
                }
            }
            *last = Some(now);
        }

        let peers = membership.alive_members();
        info!("Forcing full sync to {} peers", peers.len());

        let mut reached = 0;
        for peer in &peers {
            match self.push_full_state(peer.protocol_addr(), false).await {
                Ok(_) => reached += 1,
                Err(e) => warn!("Force sync to {} failed: {}", peer.node_id, e),
            }
        }
        self.stats.sync_completed();
        Ok(reached)
    }

    // ============================================================
    // MEMBERSHIP EVENTS
    // ============================================================

    /// Reacts to membership changes: digest to newly confirmed peers, per-peer state
    /// cleanup on removal.
    /// `events` should be subscribed before the membership loops start so that no
    /// early confirmation is missed.
    pub async fn run_membership_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(membership) = self.membership.clone() else {
            return;
        };

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.changed() => break,
            };

            match event {
                Ok(event) => self.on_membership_event(&membership, event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Sync engine missed {} membership events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_membership_event(&self, membership: &MembershipService, event: MembershipEvent) {
        match event {
            MembershipEvent::Confirmed(node_id) => {
                if let Some(peer) = membership.get_member(&node_id)
                    && let Err(e) = self.send_digest(&peer).await
                {
                    warn!("Failed to send bootstrap digest to {}: {}", node_id, e);
                }
            }
            MembershipEvent::Removed(node_id) => {
                self.peer_sync.remove(&node_id);
                let originated = self.store.count_originated_by(&node_id);
                if originated > 0 {
                    info!(
                        "Node {} removed; {} records it last wrote remain authoritative here",
                        node_id, originated
                    );
                }
            }
            _ => {}
        }
        self.stats.set_nodes_active(membership.registry().active_count());
    }

    pub fn peer_sync_state(&self, node_id: &NodeId) -> Option<PeerSyncState> {
        self.peer_sync.get(node_id).map(|state| state.value().clone())
    }

    pub fn tracked_peers(&self) -> usize {
        self.peer_sync.len()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        if let Some(membership) = &self.membership {
            self.stats.set_nodes_active(membership.registry().active_count());
        }
        self.stats.snapshot()
    }
}

#[async_trait]
impl SyncHandler for SyncEngine {
    async fn on_record_deltas(&self, from: &NodeId, records: Vec<DnsRecord>) {
        self.on_gossip_received(from, records);
    }

    async fn on_sync_digest(&self, from: &NodeId, addr: SocketAddr, digest: u64, record_count: u64) {
        let local = self.store.digest();
        if local == digest {
            debug!("Digest from {} matches ({} records)", from, record_count);
            return;
        }

        self.stats.digest_mismatch();
        info!(
            "Digest mismatch with {} ({} remote vs {} local records), sending full state",
            from,
            record_count,
            self.store.len()
        );
        if let Err(e) = self.push_full_state(addr, true).await {
            warn!("Failed to send full state to {}: {}", from, e);
        }
    }

    async fn on_sync_full(
        &self,
        from: &NodeId,
        addr: SocketAddr,
        chunk: u32,
        total: u32,
        reply: bool,
        records: Vec<DnsRecord>,
    ) {
        if total == 0 || chunk >= total {
            debug!("Dropping SYNC_FULL chunk {} of {} from {}", chunk, total, from);
            return;
        }

        let applied = self.on_gossip_received(from, records);
        debug!(
            "SYNC_FULL chunk {}/{} from {}: {} applied",
            chunk.saturating_add(1),
            total,
            from,
            applied
        );

        let last_chunk = chunk.saturating_add(1) == total;
        {
            let mut state = self.peer_sync.entry(from.clone()).or_default();
            state.chunks_received = state.chunks_received.saturating_add(1);
            if last_chunk {
                state.last_full_sync = Some(Instant::now());
            }
        }
        if !last_chunk {
            return;
        }

        self.stats.sync_completed();
        if reply && let Err(e) = self.push_full_state(addr, false).await {
            warn!("Failed to answer full state to {}: {}", from, e);
        }
    }
}
