use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::membership::types::NodeId;

/// DNS record kinds carried by the mesh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    AAAA,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
        }
    }
}

/// Logical clock attached to every record.
///
/// Ordering is lexicographic on `(counter, node_id)`: field order matters for the
/// derived `Ord`. Two distinct mutations never share a version because a node never
/// reuses a counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub counter: u64,
    pub node_id: NodeId,
}

impl Version {
    pub fn new(counter: u64, node_id: NodeId) -> Self {
        Self { counter, node_id }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.counter, self.node_id.0)
    }
}

/// A replicated DNS record, or the tombstone left behind by its deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecord {
    pub hostname: String,
    pub record_type: RecordType,
    pub value: String,
    pub ttl: u32,
    pub version: Version,
    pub tombstone: bool,
    /// Unix millis after which the tombstone may be purged.
    pub tombstone_expiry: Option<u64>,
}

impl DnsRecord {
    /// Last-writer-wins: strictly higher version wins.
    ///
    /// Because versions are totally ordered this also gives tombstone dominance: a
    /// tombstone at V beats every record at or below V, and only a newer write can
    /// resurrect the hostname.
    pub fn supersedes(&self, other: &DnsRecord) -> bool {
        self.version > other.version
    }

    pub fn is_live(&self) -> bool {
        !self.tombstone
    }

    pub fn is_expired_tombstone(&self, now_ms: u64) -> bool {
        self.tombstone
            && self
                .tombstone_expiry
                .map(|expiry| expiry <= now_ms)
                .unwrap_or(false)
    }
}

/// Mutation requested through the local API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    Upsert {
        hostname: String,
        record_type: RecordType,
        value: String,
        ttl: u32,
    },
    Remove {
        hostname: String,
    },
}

impl LocalChange {
    pub fn hostname(&self) -> &str {
        match self {
            LocalChange::Upsert { hostname, .. } => hostname,
            LocalChange::Remove { hostname } => hostname,
        }
    }
}

/// Where an applied change came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Produced by this node's local mutation API.
    Local,
    /// Merged from gossip or anti-entropy sent by `from`.
    Remote { from: NodeId },
}

/// A change that was applied to the record store, as seen by listeners.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub origin: ChangeOrigin,
    pub record: DnsRecord,
}

/// Result of merging one remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Incoming record was newer and replaced (or created) the local entry.
    Applied,
    /// Local entry is equal or newer; incoming record was dropped.
    Stale,
    /// Incoming tombstone already expired; dropped.
    Expired,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
