//! Record Store
//!
//! Authoritative local DNS records with per-record logical versions.
//!
//! ## Core Concepts
//! - **Versions**: every record carries `(counter, origin node)`; local mutations mint a
//!   counter above anything this node has seen (Lamport clock).
//! - **Last-writer-wins**: remote records replace local ones only with a strictly higher
//!   version, which makes merging commutative and idempotent.
//! - **Tombstones**: deletions are versioned records kept until their expiry so delayed
//!   gossip cannot resurrect the hostname.
//! - **Digest**: a hash over all `(hostname, version)` pairs, cached per `global_version`,
//!   lets anti-entropy detect divergence cheaply.

pub mod store;
pub mod types;
pub mod validate;

pub use store::{RecordSnapshot, RecordStore, RecordView};
pub use types::{ChangeOrigin, DnsRecord, LocalChange, MergeOutcome, RecordChange, RecordType, Version};
