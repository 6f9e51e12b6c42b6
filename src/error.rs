//! Error types for the cluster core.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors surfaced by the cluster core.
///
/// Transient network conditions (timeouts, unreachable hosts) are not errors here:
/// they feed the SWIM state machine instead.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A socket could not be bound at startup. Fatal.
    #[error("failed to bind {channel} socket on {addr}: {source}")]
    Bind {
        channel: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// IO error on an already bound socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Envelope was produced by an incompatible wire version.
    #[error("unsupported wire version {0}")]
    WireVersion(u8),

    /// Encoded envelope exceeds the datagram budget.
    #[error("datagram of {size} bytes exceeds the {limit} byte budget")]
    Oversized { size: usize, limit: usize },

    /// Hostname failed syntax validation.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// IP address failed to parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// TTL outside the accepted range.
    #[error("invalid ttl: {0}")]
    InvalidTtl(u32),

    /// `force_sync` was called again before the minimum interval elapsed.
    #[error("force sync rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Operation requires the sync engine but it was disabled by configuration.
    #[error("synchronization is disabled")]
    SyncDisabled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
