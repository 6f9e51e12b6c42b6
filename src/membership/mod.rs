//! Membership Module
//!
//! SWIM failure detection and membership dissemination over the protocol channel.
//!
//! ## Core Mechanisms
//! - **Probing**: each round pings `k` random Alive peers; silent targets get indirect
//!   probes through `m` helpers before they are suspected.
//! - **Suspicion**: Suspect peers fail after a timeout unless they refute with a
//!   higher incarnation; failed and departed peers are dropped after a grace period.
//! - **Piggybacking**: membership and record deltas ride on every outgoing message,
//!   each retransmitted `λ·⌈log2(N+1)⌉` times.
//! - **Dispatch**: record traffic is handed to a [`handler::SyncHandler`]; state
//!   changes are published as [`types::MembershipEvent`]s.

pub mod gossip;
pub mod handler;
pub mod registry;
pub mod service;
pub mod types;

pub use handler::SyncHandler;
pub use registry::NodeRegistry;
pub use service::MembershipService;
pub use types::{MembershipEvent, NodeId, PeerInfo, PeerState};
