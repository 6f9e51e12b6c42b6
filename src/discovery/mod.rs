//! Peer Discovery
//!
//! Periodic `DISCOVER` announcements on the broadcast-enabled discovery channel.
//! Hearing an announcement from an unknown node of the same service registers it
//! with membership and triggers a PING handshake; liveness from then on is owned by
//! SWIM. Nodes that stop announcing are dropped from the discovered list after
//! `discovery_timeout`.

pub mod service;
pub mod types;

pub use service::DiscoveryService;
pub use types::{Announcement, DiscoveredNodeInfo};
