//! Synchronization Engine
//!
//! Keeps record sets convergent across the cluster:
//! - **Local path**: [`engine::SyncEngine::apply_local_change`] versions the change,
//!   stores it and queues it for piggybacked gossip.
//! - **Remote path**: [`engine::SyncEngine::on_gossip_received`] merges under
//!   last-writer-wins and re-gossips only what was actually applied.
//! - **Anti-entropy**: periodic digest exchange with one random peer; a mismatch
//!   triggers a bidirectional full-state transfer.

pub mod engine;
pub mod stats;

pub use engine::{PeerSyncState, RecordListener, SyncEngine};
pub use stats::{StatisticsSnapshot, SyncStatistics};
