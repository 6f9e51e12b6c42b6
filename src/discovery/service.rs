use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::{Announcement, DiscoveredNode, DiscoveredNodeInfo};
use crate::config::{ClusterConfig, ProtocolTimings};
use crate::error::Result;
use crate::membership::MembershipService;
use crate::membership::types::NodeId;
use crate::sync::stats::SyncStatistics;
use crate::transport::UdpChannel;
use crate::transport::codec::{GossipMessage, MessageKind};

pub struct DiscoveryService {
    local: Announcement,
    channel: Arc<UdpChannel>,
    targets: RwLock<Vec<SocketAddr>>,
    membership: Arc<MembershipService>,
    discovered: DashMap<NodeId, DiscoveredNode>,
    stats: Arc<SyncStatistics>,
    timings: ProtocolTimings,
}

impl DiscoveryService {
    pub fn new(
        config: &ClusterConfig,
        channel: Arc<UdpChannel>,
        membership: Arc<MembershipService>,
        stats: Arc<SyncStatistics>,
    ) -> Result<Arc<Self>> {
        let local = Announcement {
            node_id: config.node_id.clone(),
            ip: config.host_ip,
            discovery_port: channel.local_addr()?.port(),
            protocol_port: membership.advertised_addr().port(),
            service_name: config.service_name.clone(),
            metadata: config.metadata.clone(),
        };

        let mut targets = config.effective_discovery_targets();
        if config.discovery_port == 0 && config.discovery_targets.is_empty() {
            // Ephemeral port: the broadcast fallback would point at port 0.
            targets.clear();
        }

        Ok(Arc::new(Self {
            local,
            channel,
            targets: RwLock::new(targets),
            membership,
            discovered: DashMap::new(),
            stats,
            timings: config.timings.clone(),
        }))
    }

    pub fn local_announcement(&self) -> &Announcement {
        &self.local
    }

    pub fn add_target(&self, addr: SocketAddr) {
        let mut targets = self.targets.write();
        if !targets.contains(&addr) {
            info!("Added discovery target {}", addr);
            targets.push(addr);
        }
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.read().clone()
    }

    /// Sends one announcement to every target.
    pub async fn announce(&self) {
        let msg = GossipMessage::new(
            self.local.node_id.clone(),
            self.membership.incarnation(),
            MessageKind::Discover(self.local.clone()),
        );

        for target in self.targets() {
            if let Err(e) = self.channel.send(&msg, target).await {
                warn!("Failed to send discovery announcement to {}: {}", target, e);
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting discovery for service '{}' ({:?} interval)",
            self.local.service_name, self.timings.discovery_interval
        );

        let mut ticker = tokio::time::interval(self.timings.discovery_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.announce().await;
            self.expire(Instant::now());
        }
    }

    pub async fn run_receiver(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = UdpChannel::recv_buffer();

        loop {
            let received = tokio::select! {
                received = self.channel.recv(&mut buf) => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok((src, Ok(msg))) => {
                    self.on_discover(msg, src).await;
                }
                Ok((src, Err(e))) => debug!("Dropping malformed discovery datagram from {}: {}", src, e),
                Err(e) => {
                    warn!("Failed to receive on discovery channel: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handles one discovery datagram. Returns true if the sender was new to the
    /// membership view.
    pub async fn on_discover(&self, msg: GossipMessage, src: SocketAddr) -> bool {
        let MessageKind::Discover(announcement) = msg.kind else {
            debug!("Ignoring {} on discovery channel from {}", msg.kind.name(), src);
            return false;
        };

        if announcement.node_id == self.local.node_id {
            return false;
        }
        if announcement.service_name != self.local.service_name {
            debug!(
                "Ignoring announcement for service '{}' from {}",
                announcement.service_name, src
            );
            return false;
        }
        if msg.sender_id != announcement.node_id {
            debug!(
                "Ignoring announcement from {}: sender {} does not match payload {}",
                src, msg.sender_id, announcement.node_id
            );
            return false;
        }

        let now = Instant::now();
        match self.discovered.entry(announcement.node_id.clone()) {
            Entry::Occupied(mut slot) => {
                let node = slot.get_mut();
                node.last_seen = now;
                node.announcement = announcement.clone();
            }
            Entry::Vacant(slot) => {
                info!(
                    "Discovered node {} at {} via announcement",
                    announcement.node_id,
                    announcement.protocol_addr()
                );
                self.stats.node_discovered();
                slot.insert(DiscoveredNode {
                    announcement: announcement.clone(),
                    first_seen: now,
                    last_seen: now,
                });
            }
        }

        self.membership.introduce(&announcement).await
    }

    /// Forgets nodes that stopped announcing. Membership state is not touched.
    pub fn expire(&self, now: Instant) -> Vec<NodeId> {
        let timeout = self.timings.discovery_timeout;
        let mut expired = Vec::new();
        self.discovered.retain(|node_id, node| {
            let keep = now.saturating_duration_since(node.last_seen) < timeout;
            if !keep {
                expired.push(node_id.clone());
            }
            keep
        });

        for node_id in &expired {
            info!("Node {} stopped announcing, removed from discovered list", node_id);
        }
        expired
    }

    pub fn discovered_nodes(&self) -> Vec<DiscoveredNodeInfo> {
        let now = Instant::now();
        let mut nodes: Vec<DiscoveredNodeInfo> = self
            .discovered
            .iter()
            .map(|entry| entry.value().info(now))
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }
}
