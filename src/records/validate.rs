//! Synchronous validation for the local mutation API.

use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use super::types::RecordType;
use crate::error::{ClusterError, Result};

pub const DEFAULT_TTL: u32 = 300;

const MAX_HOSTNAME_LEN: usize = 253;
/// RFC 2181 section 8.
const MAX_TTL: u32 = i32::MAX as u32;

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static label regex")
});

/// Lowercases, strips a trailing dot and checks RFC 1123 label syntax.
pub fn normalize_hostname(hostname: &str) -> Result<String> {
    let name = hostname.trim().trim_end_matches('.').to_ascii_lowercase();

    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return Err(ClusterError::InvalidHostname(hostname.to_string()));
    }

    if !name.split('.').all(|label| LABEL.is_match(label)) {
        return Err(ClusterError::InvalidHostname(hostname.to_string()));
    }

    Ok(name)
}

/// Parses an address and derives the record type from its family.
pub fn parse_address(value: &str) -> Result<(IpAddr, RecordType)> {
    let ip: IpAddr = value
        .trim()
        .parse()
        .map_err(|_| ClusterError::InvalidAddress(value.to_string()))?;

    let record_type = match ip {
        IpAddr::V4(_) => RecordType::A,
        IpAddr::V6(_) => RecordType::AAAA,
    };

    Ok((ip, record_type))
}

pub fn check_ttl(ttl: u32) -> Result<u32> {
    if ttl > MAX_TTL {
        return Err(ClusterError::InvalidTtl(ttl));
    }
    Ok(ttl)
}
