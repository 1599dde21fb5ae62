//! Cluster error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a gossip transport.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("gossip transport has left the cluster")]
    Left,

    #[error("no reachable peers among {0} candidates")]
    Unreachable(usize),
}

/// Errors from membership views.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster already assigned")]
    AlreadyAssigned,

    #[error("leaving the cluster timed out after {0:?}")]
    LeaveTimeout(Duration),

    #[error("failed to encode cluster message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Gossip(#[from] GossipError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors from joining the cluster at startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("peering strategy {strategy} failed: {reason}")]
    Peering { strategy: String, reason: String },

    #[error("all {0} peering strategies exhausted without joining a peer")]
    Exhausted(usize),
}
