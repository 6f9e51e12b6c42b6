//! UDP Transport
//!
//! Two logical channels on two ports, so neither socket needs to demultiplex:
//! - **discovery**: broadcast-enabled, carries `DISCOVER` announcements only.
//! - **protocol**: SWIM probes, gossip and anti-entropy traffic.
//!
//! Every datagram is a versioned bincode [`codec::GossipMessage`] kept under
//! [`codec::MAX_DATAGRAM_BYTES`].

pub mod channel;
pub mod codec;

use std::net::SocketAddr;
use std::sync::Arc;

pub use channel::UdpChannel;
pub use codec::{GossipMessage, MessageKind};

use crate::config::ClusterConfig;
use crate::error::Result;

pub struct Transport {
    pub discovery: Arc<UdpChannel>,
    pub protocol: Arc<UdpChannel>,
}

impl Transport {
    /// Binds both sockets. Any bind failure aborts startup.
    pub async fn bind(config: &ClusterConfig) -> Result<Self> {
        let send_timeout = config.timings.send_timeout;
        let protocol = UdpChannel::bind("protocol", config.protocol_bind_addr(), false, send_timeout).await?;
        let discovery = UdpChannel::bind("discovery", config.discovery_bind_addr(), true, send_timeout).await?;

        Ok(Self {
            discovery: Arc::new(discovery),
            protocol: Arc::new(protocol),
        })
    }

    pub fn protocol_addr(&self) -> Result<SocketAddr> {
        self.protocol.local_addr()
    }

    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        self.discovery.local_addr()
    }
}

#[cfg(test)]
mod tests;
