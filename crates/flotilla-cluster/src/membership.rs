//! Membership abstraction — the capability every cluster view shares.
//!
//! A `Cluster` answers "who is out there" (`members`) and "who owns this
//! key" (`get`, `get_n`). Ownership is rendezvous hashing over the live
//! members, so any two nodes with the same view agree on owners without
//! talking to each other.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use flotilla_core::{DeployEvent, Peer};

use crate::error::ClusterResult;
use crate::gossip::{GossipEvent, peer_from_node};
use crate::rendezvous;

#[async_trait]
pub trait Cluster: Send + Sync {
    /// This node.
    fn local(&self) -> Peer;

    fn local_addr(&self) -> SocketAddr {
        self.local().addr
    }

    /// Snapshot of every known peer, departed ones flagged. No ordering.
    fn members(&self) -> Vec<Peer>;

    /// The live peer responsible for `key`.
    fn get(&self, key: &[u8]) -> Option<Peer> {
        let live = live_members(self.members());
        rendezvous::max(key, &live).cloned()
    }

    /// Up to `n` live peers, most responsible first.
    fn get_n(&self, n: usize, key: &[u8]) -> Vec<Peer> {
        let live = live_members(self.members());
        rendezvous::max_n(n, key, &live).into_iter().cloned().collect()
    }

    /// Leave the cluster. Idempotent.
    async fn shutdown(&self) -> ClusterResult<()>;
}

#[async_trait]
impl<C: Cluster + ?Sized> Cluster for Arc<C> {
    fn local(&self) -> Peer {
        (**self).local()
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    fn members(&self) -> Vec<Peer> {
        (**self).members()
    }

    fn get(&self, key: &[u8]) -> Option<Peer> {
        (**self).get(key)
    }

    fn get_n(&self, n: usize, key: &[u8]) -> Vec<Peer> {
        (**self).get_n(n, key)
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        (**self).shutdown().await
    }
}

fn live_members(members: Vec<Peer>) -> Vec<Peer> {
    members.into_iter().filter(Peer::is_alive).collect()
}

/// Payloads Flotilla exchanges over gossip broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterMessage {
    Deploy(DeployEvent),
}

/// Decoded membership and deploy notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Joined(Peer),
    Updated(Peer),
    Left(Peer),
    Deploy(DeployEvent),
    /// The receiver fell behind and missed this many events.
    Lagged(u64),
}

/// Anything that can open a fresh `EventStream`.
pub trait EventSource: Send + Sync {
    fn events(&self) -> EventStream;
}

impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    fn events(&self) -> EventStream {
        (**self).events()
    }
}

/// Stream of `ClusterEvent`s decoded from a gossip subscription.
pub struct EventStream {
    rx: broadcast::Receiver<GossipEvent>,
}

impl EventStream {
    pub fn new(rx: broadcast::Receiver<GossipEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the gossip engine is gone.
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        loop {
            match self.rx.recv().await {
                Ok(GossipEvent::Joined(node)) => return Some(ClusterEvent::Joined(peer_from_node(&node))),
                Ok(GossipEvent::Updated(node)) => return Some(ClusterEvent::Updated(peer_from_node(&node))),
                Ok(GossipEvent::Left(node)) => return Some(ClusterEvent::Left(peer_from_node(&node))),
                Ok(GossipEvent::Message(payload)) => {
                    match serde_json::from_slice::<ClusterMessage>(&payload) {
                        Ok(ClusterMessage::Deploy(event)) => return Some(ClusterEvent::Deploy(event)),
                        Err(e) => {
                            debug!(error = %e, bytes = payload.len(), "ignoring undecodable cluster message");
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => return Some(ClusterEvent::Lagged(missed)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
