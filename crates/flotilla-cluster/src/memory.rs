//! In-process gossip network.
//!
//! `MemoryNetwork` is a shared registry standing in for the wire: nodes
//! register an address, `join` succeeds for registered live addresses, and
//! broadcasts fan out to every member's subscribers (the sender included).
//! Used by tests and by single-process fleets.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use flotilla_core::PeerFlags;

use crate::error::GossipError;
use crate::gossip::{Gossip, GossipEvent, GossipNode, NodeMeta, NodeState};

const EVENT_CAPACITY: usize = 256;

struct Registered {
    node: GossipNode,
    events: broadcast::Sender<GossipEvent>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<SocketAddr, Registered>,
    /// Addresses that are part of the (single) cluster.
    cluster: BTreeSet<SocketAddr>,
}

impl NetworkState {
    fn notify_cluster(&self, event: &GossipEvent) {
        for addr in &self.cluster {
            if let Some(reg) = self.nodes.get(addr) {
                // No subscribers is fine.
                let _ = reg.events.send(event.clone());
            }
        }
    }
}

/// Shared registry of in-process gossip nodes.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node on the network. It is reachable, but not part of the
    /// cluster until it joins or is joined.
    pub fn register(&self, name: &str, addr: SocketAddr, flags: PeerFlags) -> MemoryGossip {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let node = GossipNode {
            name: name.to_string(),
            addr,
            meta: NodeMeta { flags }.encode(),
            state: NodeState::Alive,
        };
        let mut state = self.lock();
        state.nodes.insert(addr, Registered { node, events });
        debug!(node = name, %addr, "registered in-memory gossip node");
        MemoryGossip {
            network: self.clone(),
            addr,
        }
    }

    /// Simulate an abrupt failure: the node is marked dead and the cluster
    /// is told it left.
    pub fn kill(&self, addr: SocketAddr) {
        let mut state = self.lock();
        let Some(reg) = state.nodes.get_mut(&addr) else {
            return;
        };
        reg.node.state = NodeState::Dead;
        let event = GossipEvent::Left(reg.node.clone());
        state.notify_cluster(&event);
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One node's handle onto a `MemoryNetwork`.
#[derive(Clone)]
pub struct MemoryGossip {
    network: MemoryNetwork,
    addr: SocketAddr,
}

impl MemoryGossip {
    /// Re-advertise this node's capabilities.
    pub fn set_flags(&self, flags: PeerFlags) {
        let mut state = self.network.lock();
        let Some(reg) = state.nodes.get_mut(&self.addr) else {
            return;
        };
        reg.node.meta = NodeMeta { flags }.encode();
        let event = GossipEvent::Updated(reg.node.clone());
        if state.cluster.contains(&self.addr) {
            state.notify_cluster(&event);
        }
    }

    fn is_live(state: &NetworkState, addr: &SocketAddr) -> bool {
        state
            .nodes
            .get(addr)
            .is_some_and(|reg| reg.node.state == NodeState::Alive)
    }
}

#[async_trait]
impl Gossip for MemoryGossip {
    fn local_node(&self) -> GossipNode {
        let state = self.network.lock();
        match state.nodes.get(&self.addr) {
            Some(reg) => reg.node.clone(),
            None => GossipNode {
                name: String::new(),
                addr: self.addr,
                meta: Vec::new(),
                state: NodeState::Left,
            },
        }
    }

    fn members(&self) -> Vec<GossipNode> {
        let state = self.network.lock();
        if !state.cluster.contains(&self.addr) {
            return state
                .nodes
                .get(&self.addr)
                .map(|reg| vec![reg.node.clone()])
                .unwrap_or_default();
        }
        state
            .cluster
            .iter()
            .filter_map(|addr| state.nodes.get(addr))
            .map(|reg| reg.node.clone())
            .collect()
    }

    async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, GossipError> {
        let mut state = self.network.lock();
        if !Self::is_live(&state, &self.addr) {
            return Err(GossipError::Left);
        }

        let reachable: Vec<SocketAddr> = addrs
            .iter()
            .filter(|addr| **addr != self.addr && Self::is_live(&state, addr))
            .copied()
            .collect();
        if reachable.is_empty() {
            return Err(GossipError::Unreachable(addrs.len()));
        }

        let mut newcomers = Vec::new();
        for addr in reachable.iter().chain(std::iter::once(&self.addr)) {
            if state.cluster.insert(*addr) {
                newcomers.push(*addr);
            }
        }
        for addr in newcomers {
            if let Some(reg) = state.nodes.get(&addr) {
                let event = GossipEvent::Joined(reg.node.clone());
                state.notify_cluster(&event);
            }
        }

        info!(addr = %self.addr, joined = reachable.len(), "joined in-memory cluster");
        Ok(reachable.len())
    }

    async fn leave(&self, _timeout: Duration) -> Result<(), GossipError> {
        let mut state = self.network.lock();
        let Some(reg) = state.nodes.get_mut(&self.addr) else {
            return Ok(());
        };
        if reg.node.state == NodeState::Left {
            return Ok(());
        }
        reg.node.state = NodeState::Left;
        let event = GossipEvent::Left(reg.node.clone());
        state.notify_cluster(&event);
        Ok(())
    }

    fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        let state = self.network.lock();
        if !Self::is_live(&state, &self.addr) {
            return Err(GossipError::Left);
        }
        let event = GossipEvent::Message(payload);
        if state.cluster.contains(&self.addr) {
            state.notify_cluster(&event);
        } else if let Some(reg) = state.nodes.get(&self.addr) {
            let _ = reg.events.send(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GossipEvent> {
        let state = self.network.lock();
        match state.nodes.get(&self.addr) {
            Some(reg) => reg.events.subscribe(),
            // Unregistered handle: a receiver that reports closed immediately.
            None => broadcast::channel(1).1,
        }
    }
}
