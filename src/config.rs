//! Node configuration.
//!
//! The binary fills [`ClusterConfig`] from CLI flags and environment variables
//! (`NODE_ID`, `DISCOVERY_PORT`, `PROTOCOL_PORT`, `ENABLE_SYNC`, `HOST_IP`, ...).
//! Protocol constants live in [`ProtocolTimings`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{ClusterError, Result};
use crate::membership::types::NodeId;

pub const DEFAULT_DISCOVERY_PORT: u16 = 8889;
pub const DEFAULT_PROTOCOL_PORT: u16 = 8890;
pub const DEFAULT_SERVICE_NAME: &str = "joyride-dns";

/// Top-level node configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub node_id: NodeId,
    /// Address advertised to peers.
    pub host_ip: IpAddr,
    /// Address the sockets bind to.
    pub bind_ip: IpAddr,
    pub discovery_port: u16,
    pub protocol_port: u16,
    /// When false no sockets are bound and records stay local.
    pub enable_sync: bool,
    /// Announcements from other service names are ignored.
    pub service_name: String,
    /// Where discovery announcements are sent. Empty means limited broadcast.
    pub discovery_targets: Vec<SocketAddr>,
    /// Protocol addresses pinged once at startup.
    pub seeds: Vec<SocketAddr>,
    pub metadata: HashMap<String, String>,
    pub timings: ProtocolTimings,
}

impl ClusterConfig {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    pub fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.discovery_port)
    }

    pub fn protocol_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.protocol_port)
    }

    /// Discovery destinations, falling back to `255.255.255.255:<discovery_port>`.
    pub fn effective_discovery_targets(&self) -> Vec<SocketAddr> {
        if self.discovery_targets.is_empty() {
            vec![SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                self.discovery_port,
            )]
        } else {
            self.discovery_targets.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.0.trim().is_empty() {
            return Err(ClusterError::Config("node id must not be empty".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(ClusterError::Config("service name must not be empty".into()));
        }
        if self.discovery_port != 0 && self.discovery_port == self.protocol_port {
            return Err(ClusterError::Config(format!(
                "discovery and protocol ports must differ (both {})",
                self.discovery_port
            )));
        }
        self.timings.validate()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        metadata.insert("role".to_string(), "dns-server".to_string());

        Self {
            node_id: NodeId::new(),
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            protocol_port: DEFAULT_PROTOCOL_PORT,
            enable_sync: true,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            discovery_targets: Vec::new(),
            seeds: Vec::new(),
            metadata,
            timings: ProtocolTimings::default(),
        }
    }
}

/// SWIM and anti-entropy constants.
///
/// Defaults follow the SWIM paper: 1s protocol period, probe timeout well under the
/// period, 3 indirect probes, suspicion after 3 periods without an ack.
#[derive(Debug, Clone)]
pub struct ProtocolTimings {
    /// `T_disc`: interval between discovery announcements.
    pub discovery_interval: Duration,
    /// Discovered nodes not re-announced within this window are forgotten.
    pub discovery_timeout: Duration,
    /// `T_protocol`: membership round interval.
    pub protocol_interval: Duration,
    /// `T_ping`: wait for a direct ack before asking for indirect probes.
    pub ping_timeout: Duration,
    /// Peers probed directly per round (`k`).
    pub probe_fanout: usize,
    /// Helpers asked to PING_REQ a silent target (`m`).
    pub indirect_probes: usize,
    /// Suspicion window, in protocol periods, measured from probe start.
    pub suspicion_multiplier: u32,
    /// Suspect → Failed timeout.
    pub suspicion_timeout: Duration,
    /// Failed/Left → removed from the view.
    pub removal_grace: Duration,
    /// Each delta is sent `retransmit_multiplier * ceil(log2(N + 1))` times.
    pub retransmit_multiplier: u32,
    /// `T_full_sync`: anti-entropy digest exchange interval.
    pub full_sync_interval: Duration,
    /// `T_tombstone_grace`: how long tombstones are retained.
    pub tombstone_grace: Duration,
    /// Minimum spacing between accepted `force_sync` calls.
    pub force_sync_min_interval: Duration,
    /// Timeout applied to every socket send.
    pub send_timeout: Duration,
    /// Upper bound on waiting for tasks during shutdown.
    pub shutdown_grace: Duration,
}

impl ProtocolTimings {
    /// Suspicion window derived from the protocol period.
    pub fn suspicion_window(&self) -> Duration {
        self.protocol_interval * self.suspicion_multiplier
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol_interval.is_zero() {
            return Err(ClusterError::Config("protocol interval must be > 0".into()));
        }
        if self.ping_timeout >= self.suspicion_window() {
            return Err(ClusterError::Config(format!(
                "ping timeout {:?} must be shorter than the suspicion window {:?}",
                self.ping_timeout,
                self.suspicion_window()
            )));
        }
        if self.probe_fanout == 0 {
            return Err(ClusterError::Config("probe fanout must be >= 1".into()));
        }
        if self.full_sync_interval.is_zero() || self.discovery_interval.is_zero() {
            return Err(ClusterError::Config("loop intervals must be > 0".into()));
        }
        Ok(())
    }

    /// Timings scaled down for loopback tests.
    pub fn fast() -> Self {
        Self {
            discovery_interval: Duration::from_millis(100),
            discovery_timeout: Duration::from_secs(2),
            protocol_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(20),
            probe_fanout: 1,
            indirect_probes: 2,
            suspicion_multiplier: 3,
            suspicion_timeout: Duration::from_millis(150),
            removal_grace: Duration::from_millis(500),
            retransmit_multiplier: 3,
            full_sync_interval: Duration::from_millis(300),
            tombstone_grace: Duration::from_secs(5),
            force_sync_min_interval: Duration::from_millis(200),
            send_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(90),
            protocol_interval: Duration::from_secs(1),
            ping_timeout: Duration::from_millis(300),
            probe_fanout: 1,
            indirect_probes: 3,
            suspicion_multiplier: 3,
            suspicion_timeout: Duration::from_secs(3),
            removal_grace: Duration::from_secs(10),
            retransmit_multiplier: 3,
            full_sync_interval: Duration::from_secs(30),
            tombstone_grace: Duration::from_secs(300),
            force_sync_min_interval: Duration::from_secs(5),
            send_timeout: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_ports() {
        let config = ClusterConfig::default();
        assert_eq!(config.discovery_port, 8889);
        assert_eq!(config.protocol_port, 8890);
        assert!(config.enable_sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broadcast_target_when_none_configured() {
        let config = ClusterConfig::default();
        let targets = config.effective_discovery_targets();
        assert_eq!(targets, vec!["255.255.255.255:8889".parse().unwrap()]);
    }

    #[test]
    fn test_same_ports_rejected() {
        let mut config = ClusterConfig::default();
        config.protocol_port = config.discovery_port;
        assert!(matches!(config.validate(), Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_ping_timeout_must_fit_suspicion_window() {
        let mut timings = ProtocolTimings::default();
        timings.ping_timeout = Duration::from_secs(5);
        assert!(timings.validate().is_err());
        assert!(ProtocolTimings::fast().validate().is_ok());
    }
}
