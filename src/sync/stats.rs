use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::records::types::now_ms;

/// Counters shared by discovery, membership dispatch and the sync engine.
#[derive(Debug, Default)]
pub struct SyncStatistics {
    nodes_discovered: AtomicU64,
    nodes_active: AtomicU64,
    dns_records_synced: AtomicU64,
    sync_operations: AtomicU64,
    last_sync_timestamp: AtomicU64,
    digest_mismatches: AtomicU64,
}

/// Point-in-time copy of [`SyncStatistics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub nodes_discovered: u64,
    pub nodes_active: u64,
    pub dns_records_synced: u64,
    pub sync_operations: u64,
    /// Unix milliseconds of the last completed sync, 0 if none yet.
    pub last_sync_timestamp: u64,
    pub digest_mismatches: u64,
}

impl SyncStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_discovered(&self) {
        self.nodes_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_nodes_active(&self, count: usize) {
        self.nodes_active.store(count as u64, Ordering::Relaxed);
    }

    pub fn records_synced(&self, count: usize) {
        self.dns_records_synced.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Counts one completed sync operation and stamps its time.
    pub fn sync_completed(&self) {
        self.sync_operations.fetch_add(1, Ordering::Relaxed);
        self.last_sync_timestamp.store(now_ms(), Ordering::Relaxed);
    }

    pub fn digest_mismatch(&self) {
        self.digest_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            nodes_discovered: self.nodes_discovered.load(Ordering::Relaxed),
            nodes_active: self.nodes_active.load(Ordering::Relaxed),
            dns_records_synced: self.dns_records_synced.load(Ordering::Relaxed),
            sync_operations: self.sync_operations.load(Ordering::Relaxed),
            last_sync_timestamp: self.last_sync_timestamp.load(Ordering::Relaxed),
            digest_mismatches: self.digest_mismatches.load(Ordering::Relaxed),
        }
    }
}
