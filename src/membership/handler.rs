use async_trait::async_trait;
use std::net::SocketAddr;

use super::types::NodeId;
use crate::records::types::DnsRecord;

/// Receiver for the record-carrying parts of protocol traffic.
///
/// Membership decodes every datagram and hands record payloads here, so the sync
/// engine never touches sockets directly.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Record deltas piggybacked on any non-`SYNC_FULL` message.
    async fn on_record_deltas(&self, from: &NodeId, records: Vec<DnsRecord>);

    async fn on_sync_digest(&self, from: &NodeId, addr: SocketAddr, digest: u64, record_count: u64);

    async fn on_sync_full(
        &self,
        from: &NodeId,
        addr: SocketAddr,
        chunk: u32,
        total: u32,
        reply: bool,
        records: Vec<DnsRecord>,
    );
}
