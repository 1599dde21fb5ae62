//! Live membership — a view straight onto the gossip membership table.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use flotilla_core::{DeployEvent, Peer};

use crate::error::{ClusterError, ClusterResult};
use crate::gossip::{Gossip, peer_from_node};
use crate::membership::{Cluster, ClusterMessage, EventSource, EventStream};

pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LiveCluster {
    gossip: Arc<dyn Gossip>,
    leave_timeout: Duration,
    left: AtomicBool,
}

impl LiveCluster {
    pub fn new(gossip: Arc<dyn Gossip>) -> Self {
        Self {
            gossip,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
            left: AtomicBool::new(false),
        }
    }

    /// Bound on how long `shutdown` waits for the leave to propagate.
    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout = timeout;
        self
    }

    pub fn gossip(&self) -> &Arc<dyn Gossip> {
        &self.gossip
    }

    /// Announce a deploy stage transition to every member.
    pub fn publish(&self, event: &DeployEvent) -> ClusterResult<()> {
        let payload = serde_json::to_vec(&ClusterMessage::Deploy(event.clone()))?;
        self.gossip.broadcast(payload)?;
        Ok(())
    }
}

impl EventSource for LiveCluster {
    /// Membership changes and deploy announcements, decoded.
    fn events(&self) -> EventStream {
        EventStream::new(self.gossip.subscribe())
    }
}

#[async_trait]
impl Cluster for LiveCluster {
    fn local(&self) -> Peer {
        peer_from_node(&self.gossip.local_node())
    }

    fn members(&self) -> Vec<Peer> {
        // The gossip table should not repeat names, but a restarted node can
        // briefly appear under two addresses. Prefer the live entry.
        let mut by_name: HashMap<String, Peer> = HashMap::new();
        for node in self.gossip.members() {
            let peer = peer_from_node(&node);
            match by_name.get(&peer.name) {
                Some(existing) if existing.is_alive() || !peer.is_alive() => {}
                _ => {
                    by_name.insert(peer.name.clone(), peer);
                }
            }
        }
        by_name.into_values().collect()
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let local = self.gossip.local_node();
        match tokio::time::timeout(self.leave_timeout, self.gossip.leave(self.leave_timeout)).await {
            Ok(Ok(())) => {
                info!(node = %local.name, "left cluster");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(node = %local.name, error = %e, "failed to leave cluster");
                Err(e.into())
            }
            Err(_) => {
                warn!(node = %local.name, timeout = ?self.leave_timeout, "leave timed out");
                Err(ClusterError::LeaveTimeout(self.leave_timeout))
            }
        }
    }
}
