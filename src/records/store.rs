use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::types::{DnsRecord, LocalChange, MergeOutcome, Version, now_ms};
use crate::membership::types::NodeId;

/// Authoritative local record set.
///
/// All writes go through one `RwLock` so version minting and `global_version` stay
/// monotonic under concurrent callers.
#[derive(Debug)]
pub struct RecordStore {
    node_id: NodeId,
    inner: RwLock<RecordSetInner>,
}

#[derive(Debug, Default)]
struct RecordSetInner {
    /// hostname -> current record or tombstone
    records: HashMap<String, DnsRecord>,

    /// Lamport clock: highest counter minted locally or observed remotely.
    clock: u64,

    /// Bumped on every applied change, including purges.
    global_version: u64,

    /// (global_version, digest) of the last digest computation.
    digest_cache: Option<(u64, u64)>,
}

/// Point-in-time copy of the live records.
#[derive(Debug, Clone, Default)]
pub struct RecordSnapshot {
    pub global_version: u64,
    pub records: BTreeMap<String, DnsRecord>,
}

impl RecordStore {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            inner: RwLock::new(RecordSetInner::default()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Applies a local mutation, minting a fresh version.
    ///
    /// Returns the stored record, or `None` when removing a hostname that has no
    /// live record.
    pub fn apply_local(&self, change: LocalChange, tombstone_grace: Duration) -> Option<DnsRecord> {
        let mut inner = self.inner.write();
        let current_counter = inner
            .records
            .get(change.hostname())
            .map(|record| record.version.counter)
            .unwrap_or(0);

        let record = match change {
            LocalChange::Upsert {
                hostname,
                record_type,
                value,
                ttl,
            } => {
                let counter = inner.clock.max(current_counter) + 1;
                DnsRecord {
                    hostname,
                    record_type,
                    value,
                    ttl,
                    version: Version::new(counter, self.node_id.clone()),
                    tombstone: false,
                    tombstone_expiry: None,
                }
            }
            LocalChange::Remove { hostname } => {
                let existing = inner.records.get(&hostname).filter(|r| r.is_live())?.clone();
                let counter = inner.clock.max(current_counter) + 1;
                DnsRecord {
                    version: Version::new(counter, self.node_id.clone()),
                    tombstone: true,
                    tombstone_expiry: Some(now_ms() + tombstone_grace.as_millis() as u64),
                    ..existing
                }
            }
        };

        inner.clock = record.version.counter;
        inner.global_version += 1;
        inner.records.insert(record.hostname.clone(), record.clone());

        debug!(
            hostname = %record.hostname,
            version = %record.version,
            tombstone = record.tombstone,
            "applied local change"
        );

        Some(record)
    }

    /// Merges one remote record under last-writer-wins.
    pub fn merge(&self, incoming: DnsRecord, now_ms: u64) -> MergeOutcome {
        if incoming.is_expired_tombstone(now_ms) {
            return MergeOutcome::Expired;
        }

        let mut inner = self.inner.write();
        inner.clock = inner.clock.max(incoming.version.counter);

        if let Some(existing) = inner.records.get(&incoming.hostname)
            && !incoming.supersedes(existing)
        {
            return MergeOutcome::Stale;
        }

        inner.global_version += 1;
        inner.records.insert(incoming.hostname.clone(), incoming);
        MergeOutcome::Applied
    }

    /// Current entry for a hostname, tombstones included.
    pub fn get(&self, hostname: &str) -> Option<DnsRecord> {
        self.inner.read().records.get(hostname).cloned()
    }

    /// Live record for a hostname.
    pub fn lookup(&self, hostname: &str) -> Option<DnsRecord> {
        self.inner
            .read()
            .records
            .get(hostname)
            .filter(|record| record.is_live())
            .cloned()
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        let inner = self.inner.read();
        RecordSnapshot {
            global_version: inner.global_version,
            records: inner
                .records
                .iter()
                .filter(|(_, record)| record.is_live())
                .map(|(hostname, record)| (hostname.clone(), record.clone()))
                .collect(),
        }
    }

    /// Every entry including tombstones, sorted by hostname. Used for full sync.
    pub fn all_entries(&self) -> Vec<DnsRecord> {
        let inner = self.inner.read();
        let mut entries: Vec<DnsRecord> = inner.records.values().cloned().collect();
        entries.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        entries
    }

    /// Cheap fingerprint of the whole set for anti-entropy.
    ///
    /// SHA-256 over `(hostname, counter, origin, tombstone)` in hostname order,
    /// truncated to 64 bits. Two stores with equal digests hold the same versions.
    pub fn digest(&self) -> u64 {
        {
            let inner = self.inner.read();
            if let Some((version, digest)) = inner.digest_cache
                && version == inner.global_version
            {
                return digest;
            }
        }

        let mut inner = self.inner.write();
        let mut entries: Vec<&DnsRecord> = inner.records.values().collect();
        entries.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let mut hasher = Sha256::new();
        for record in entries {
            hasher.update(record.hostname.as_bytes());
            hasher.update([0u8]);
            hasher.update(record.version.counter.to_be_bytes());
            hasher.update(record.version.node_id.0.as_bytes());
            hasher.update([0u8, record.tombstone as u8]);
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        let digest = u64::from_be_bytes(prefix);

        inner.digest_cache = Some((inner.global_version, digest));
        digest
    }

    /// Drops tombstones whose grace window has passed. Returns how many were purged.
    pub fn purge_expired_tombstones(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, record| !record.is_expired_tombstone(now_ms));
        let purged = before - inner.records.len();
        if purged > 0 {
            inner.global_version += 1;
            debug!(purged, "purged expired tombstones");
        }
        purged
    }

    pub fn global_version(&self) -> u64 {
        self.inner.read().global_version
    }

    pub fn clock(&self) -> u64 {
        self.inner.read().clock
    }

    /// Entries including tombstones.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_count(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|record| record.is_live())
            .count()
    }

    /// Live records whose current version was minted by `origin`.
    pub fn count_originated_by(&self, origin: &NodeId) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|record| record.is_live() && &record.version.node_id == origin)
            .count()
    }
}

/// Read-only handle handed to the DNS responder and the status reporter.
#[derive(Debug, Clone)]
pub struct RecordView {
    store: Arc<RecordStore>,
}

impl RecordView {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        self.store.snapshot()
    }

    pub fn lookup(&self, hostname: &str) -> Option<DnsRecord> {
        self.store.lookup(&hostname.trim_end_matches('.').to_ascii_lowercase())
    }

    pub fn live_records(&self) -> Vec<DnsRecord> {
        self.store.snapshot().records.into_values().collect()
    }

    pub fn global_version(&self) -> u64 {
        self.store.global_version()
    }
}
