//! Cluster Status Reporter
//!
//! JSON view of the node (membership, discovered nodes, sync statistics) and the
//! axum admin API built on top of it.

pub mod handlers;
pub mod reporter;

pub use reporter::{ClusterStatus, MembershipSummary, NodeStatus, StatusReporter};

#[cfg(test)]
mod tests;
