//! Gossip transport contract.
//!
//! The membership layer never speaks a wire protocol itself. It consumes a
//! `Gossip` implementation that owns peer discovery, failure detection and
//! message fan-out, and translates that into `Peer` snapshots.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use flotilla_core::{Peer, PeerFlags};

use crate::error::GossipError;

/// Liveness of a node as judged by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Left,
}

/// A row of the gossip membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipNode {
    pub name: String,
    pub addr: SocketAddr,
    /// Opaque metadata; Flotilla stores encoded `NodeMeta` here.
    pub meta: Vec<u8>,
    pub state: NodeState,
}

/// Notifications from the gossip engine.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    Joined(GossipNode),
    Updated(GossipNode),
    Left(GossipNode),
    /// A user payload broadcast by some member.
    Message(Vec<u8>),
}

#[async_trait]
pub trait Gossip: Send + Sync {
    fn local_node(&self) -> GossipNode;

    /// Every node the local engine knows about, including departed ones.
    fn members(&self) -> Vec<GossipNode>;

    /// Contact `addrs`; returns how many were joined.
    async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, GossipError>;

    async fn leave(&self, timeout: Duration) -> Result<(), GossipError>;

    fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError>;

    fn subscribe(&self) -> broadcast::Receiver<GossipEvent>;
}

/// What a Flotilla node advertises in its gossip metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub flags: PeerFlags,
}

impl NodeMeta {
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a flag set cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Translate a gossip row into a peer snapshot.
///
/// Nodes without readable metadata are treated as observers: they show up
/// in the view but are never deploy targets.
pub fn peer_from_node(node: &GossipNode) -> Peer {
    let mut flags = match NodeMeta::decode(&node.meta) {
        Some(meta) => meta.flags,
        None => {
            debug!(node = %node.name, "unreadable gossip metadata, treating as lurker");
            PeerFlags::LURKER
        }
    };
    // Liveness comes from the failure detector, not from what the node claims.
    flags.remove(PeerFlags::ALIVE);
    if matches!(node.state, NodeState::Alive | NodeState::Suspect) {
        flags.insert(PeerFlags::ALIVE);
    }
    Peer {
        name: node.name.clone(),
        addr: node.addr,
        flags,
    }
}
