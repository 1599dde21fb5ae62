//! Static membership — a fixed peer list for tests and non-clustered nodes.

use std::collections::HashSet;

use async_trait::async_trait;

use flotilla_core::Peer;

use crate::error::ClusterResult;
use crate::membership::Cluster;

#[derive(Debug, Clone)]
pub struct StaticCluster {
    local: Peer,
    peers: Vec<Peer>,
}

impl StaticCluster {
    /// Duplicate names keep their first occurrence.
    pub fn new(local: Peer, peers: Vec<Peer>) -> Self {
        let mut seen = HashSet::new();
        let peers = peers
            .into_iter()
            .filter(|p| seen.insert(p.name.clone()))
            .collect();
        Self { local, peers }
    }

    /// A fleet of one.
    pub fn single(local: Peer) -> Self {
        Self::new(local.clone(), vec![local])
    }
}

#[async_trait]
impl Cluster for StaticCluster {
    fn local(&self) -> Peer {
        self.local.clone()
    }

    fn members(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(name: &str, last: u8) -> Peer {
        Peer::new(name, SocketAddr::from(([10, 0, 0, last], 7946)))
    }

    #[test]
    fn duplicates_collapse() {
        let cluster = StaticCluster::new(peer("a", 1), vec![peer("a", 1), peer("b", 2), peer("a", 9)]);
        let members = cluster.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].addr.port(), 7946);
        assert_eq!(members[0].addr.ip().to_string(), "10.0.0.1");
    }

    #[tokio::test]
    async fn single_node_owns_everything() {
        let cluster = StaticCluster::single(peer("solo", 1));
        assert_eq!(cluster.get(b"anything").unwrap().name, "solo");
        assert_eq!(cluster.local_addr(), SocketAddr::from(([10, 0, 0, 1], 7946)));
        cluster.shutdown().await.unwrap();
        cluster.shutdown().await.unwrap();
        assert_eq!(cluster.members().len(), 1);
    }
}
