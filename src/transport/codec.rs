//! Wire envelope and bincode codec.
//!
//! Every datagram on either channel is one [`GossipMessage`]. Encoding uses bincode
//! with fixed-width integers and a decode limit, so a corrupt length prefix cannot
//! trigger a huge allocation.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::discovery::types::Announcement;
use crate::error::{ClusterError, Result};
use crate::membership::types::{MembershipDelta, NodeId};
use crate::records::types::DnsRecord;

pub const WIRE_VERSION: u8 = 1;

/// Datagram budget: stays under a 1500 byte Ethernet MTU after IP/UDP headers.
pub const MAX_DATAGRAM_BYTES: usize = 1400;

/// Receive buffer size; anything larger than this is truncated and fails to decode.
pub const RECV_BUFFER_BYTES: usize = 65_536;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    Discover(Announcement),
    Ping {
        seq: u64,
    },
    /// `target` is the node whose liveness this ack proves. For a direct ack it is the
    /// sender; for a relayed ack it is the probed node.
    Ack {
        seq: u64,
        target: NodeId,
        target_incarnation: u64,
    },
    PingReq {
        seq: u64,
        target: NodeId,
        target_addr: SocketAddr,
    },
    Gossip,
    Leave,
    SyncDigest {
        digest: u64,
        record_count: u64,
    },
    /// One chunk of a full record set. `reply` asks the receiver to answer with its
    /// own full set once the last chunk arrives.
    SyncFull {
        chunk: u32,
        total: u32,
        reply: bool,
    },
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Discover(_) => "DISCOVER",
            MessageKind::Ping { .. } => "PING",
            MessageKind::Ack { .. } => "ACK",
            MessageKind::PingReq { .. } => "PING_REQ",
            MessageKind::Gossip => "GOSSIP",
            MessageKind::Leave => "LEAVE",
            MessageKind::SyncDigest { .. } => "SYNC_DIGEST",
            MessageKind::SyncFull { .. } => "SYNC_FULL",
        }
    }
}

/// The envelope carried by every datagram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GossipMessage {
    pub wire_version: u8,
    pub sender_id: NodeId,
    pub incarnation: u64,
    pub kind: MessageKind,
    pub membership_deltas: Vec<MembershipDelta>,
    pub record_deltas: Vec<DnsRecord>,
}

impl GossipMessage {
    pub fn new(sender_id: NodeId, incarnation: u64, kind: MessageKind) -> Self {
        Self {
            wire_version: WIRE_VERSION,
            sender_id,
            incarnation,
            kind,
            membership_deltas: Vec::new(),
            record_deltas: Vec::new(),
        }
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(RECV_BUFFER_BYTES as u64)
}

pub fn encode(msg: &GossipMessage) -> Result<Vec<u8>> {
    let bytes = options().serialize(msg)?;
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(ClusterError::Oversized {
            size: bytes.len(),
            limit: MAX_DATAGRAM_BYTES,
        });
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<GossipMessage> {
    let msg: GossipMessage = options().deserialize(bytes)?;
    if msg.wire_version != WIRE_VERSION {
        return Err(ClusterError::WireVersion(msg.wire_version));
    }
    Ok(msg)
}

/// Exact encoded size of any value under the wire options.
pub fn encoded_len<T: Serialize + ?Sized>(value: &T) -> usize {
    options()
        .serialized_size(value)
        .map(|size| size as usize)
        .unwrap_or(usize::MAX)
}

/// Splits records into groups that each fit in one datagram next to an envelope
/// whose encoded size (with an empty record list) is `base_len`.
///
/// Always returns at least one group, possibly empty, so that an empty record set
/// can still be announced. A record too large for any datagram is skipped.
pub fn chunk_records(records: Vec<DnsRecord>, base_len: usize) -> Vec<Vec<DnsRecord>> {
    let budget = MAX_DATAGRAM_BYTES.saturating_sub(base_len);
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used = 0usize;

    for record in records {
        let size = encoded_len(&record);
        if size > budget {
            tracing::warn!(hostname = %record.hostname, size, "record exceeds datagram budget, skipped");
            continue;
        }
        if used + size > budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used += size;
        current.push(record);
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
