//! Transport Tests
//!
//! ## Test Scopes
//! - **Codec**: envelope encoding, version checks, datagram budget and chunking.
//! - **Channels**: loopback send/receive and bind failures.

#[cfg(test)]
mod tests {
    use crate::discovery::types::Announcement;
    use crate::error::ClusterError;
    use crate::membership::types::{MembershipDelta, NodeId, PeerState};
    use crate::records::types::{DnsRecord, RecordType, Version};
    use crate::transport::channel::UdpChannel;
    use crate::transport::codec::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn sample_record(i: usize) -> DnsRecord {
        DnsRecord {
            hostname: format!("host-{:04}.cluster.local", i),
            record_type: RecordType::A,
            value: format!("10.0.{}.{}", i / 250, i % 250),
            ttl: 300,
            version: Version::new(i as u64 + 1, NodeId::from("node-a")),
            tombstone: false,
            tombstone_expiry: None,
        }
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    // ============================================================
    // CODEC TESTS
    // ============================================================

    #[test]
    fn test_envelope_survives_encoding() {
        let mut msg = GossipMessage::new(
            NodeId::from("node-a"),
            3,
            MessageKind::PingReq {
                seq: 9,
                target: NodeId::from("node-c"),
                target_addr: "10.1.1.1:8890".parse().unwrap(),
            },
        );
        msg.membership_deltas.push(MembershipDelta {
            node_id: NodeId::from("node-b"),
            addr: "10.1.1.2:8890".parse().unwrap(),
            discovery_port: 8889,
            incarnation: 4,
            state: PeerState::Suspect,
        });
        msg.record_deltas.push(sample_record(1));

        let bytes = encode(&msg).unwrap();
        assert!(bytes.len() <= MAX_DATAGRAM_BYTES);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_discover_carries_announcement() {
        let announcement = Announcement {
            node_id: NodeId::from("node-a"),
            ip: "192.168.1.10".parse().unwrap(),
            discovery_port: 8889,
            protocol_port: 8890,
            service_name: "joyride-dns".to_string(),
            metadata: HashMap::from([("role".to_string(), "dns-server".to_string())]),
        };
        let msg = GossipMessage::new(NodeId::from("node-a"), 0, MessageKind::Discover(announcement.clone()));

        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        match decoded.kind {
            MessageKind::Discover(a) => {
                assert_eq!(a, announcement);
                assert_eq!(a.protocol_addr(), "192.168.1.10:8890".parse().unwrap());
            }
            other => panic!("expected DISCOVER, got {}", other.name()),
        }
    }

    #[test]
    fn test_unknown_wire_version_rejected() {
        let mut msg = GossipMessage::new(NodeId::from("node-a"), 0, MessageKind::Gossip);
        msg.wire_version = WIRE_VERSION + 1;
        let bytes = encode(&msg).unwrap();

        assert!(matches!(decode(&bytes), Err(ClusterError::WireVersion(v)) if v == WIRE_VERSION + 1));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(decode(b"not an envelope").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_oversized_envelope_rejected() {
        let mut msg = GossipMessage::new(NodeId::from("node-a"), 0, MessageKind::Gossip);
        msg.record_deltas = (0..100).map(sample_record).collect();

        match encode(&msg) {
            Err(ClusterError::Oversized { size, limit }) => {
                assert_eq!(limit, MAX_DATAGRAM_BYTES);
                assert!(size > limit);
            }
            other => panic!("expected Oversized, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_chunks_fit_the_datagram_budget() {
        let records: Vec<DnsRecord> = (0..200).map(sample_record).collect();
        let mut header = GossipMessage::new(
            NodeId::from("node-a"),
            0,
            MessageKind::SyncFull {
                chunk: 0,
                total: 0,
                reply: false,
            },
        );
        let base = encoded_len(&header);

        let chunks = chunk_records(records.clone(), base);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), records.len());

        for chunk in chunks {
            header.record_deltas = chunk;
            assert!(encode(&header).is_ok(), "every chunk must encode within budget");
        }
    }

    #[test]
    fn test_empty_record_set_yields_one_empty_chunk() {
        let chunks = chunk_records(Vec::new(), 64);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_message_kind_names() {
        assert_eq!(MessageKind::Ping { seq: 1 }.name(), "PING");
        assert_eq!(MessageKind::Gossip.name(), "GOSSIP");
        assert_eq!(MessageKind::Leave.name(), "LEAVE");
        assert_eq!(
            MessageKind::SyncDigest {
                digest: 0,
                record_count: 0
            }
            .name(),
            "SYNC_DIGEST"
        );
    }

    // ============================================================
    // CHANNEL TESTS
    // ============================================================

    #[tokio::test]
    async fn test_loopback_send_and_receive() {
        let a = UdpChannel::bind("protocol", loopback(), false, Duration::from_millis(200))
            .await
            .unwrap();
        let b = UdpChannel::bind("protocol", loopback(), false, Duration::from_millis(200))
            .await
            .unwrap();

        let msg = GossipMessage::new(NodeId::from("node-a"), 7, MessageKind::Ping { seq: 42 });
        a.send(&msg, b.local_addr().unwrap()).await.unwrap();

        let mut buf = UdpChannel::recv_buffer();
        let (src, decoded) = tokio::time::timeout(Duration::from_secs(2), b.recv(&mut buf))
            .await
            .expect("datagram should arrive")
            .unwrap();

        assert_eq!(src, a.local_addr().unwrap());
        let decoded = decoded.unwrap();
        assert_eq!(decoded.sender_id, NodeId::from("node-a"));
        assert_eq!(decoded.incarnation, 7);
        assert_eq!(decoded.kind, MessageKind::Ping { seq: 42 });
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = UdpChannel::bind("protocol", loopback(), false, Duration::from_millis(100))
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        let second = UdpChannel::bind("discovery", taken, true, Duration::from_millis(100)).await;
        match second {
            Err(ClusterError::Bind { channel, addr, .. }) => {
                assert_eq!(channel, "discovery");
                assert_eq!(addr, taken);
            }
            other => panic!("expected Bind error, got {:?}", other.map(|c| c.name())),
        }
    }
}
