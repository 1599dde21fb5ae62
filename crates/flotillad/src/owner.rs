//! Ownership queries — which peers are responsible for a key.

use std::iter;

use flotilla_cluster::{Cluster, StaticCluster, rendezvous};
use flotilla_core::{FlotillaConfig, Peer};

/// The configured node plus one peer per seed, named by address.
pub fn configured_cluster(config: &FlotillaConfig) -> StaticCluster {
    let local = Peer::new(config.node.name.clone(), config.node.bind);
    let seeds = config
        .seeds()
        .iter()
        .filter(|addr| **addr != config.node.bind)
        .map(|addr| Peer::new(addr.to_string(), *addr));
    let peers = iter::once(local.clone()).chain(seeds).collect();
    StaticCluster::new(local, peers)
}

pub fn owners(config: &FlotillaConfig, key: &str, replicas: usize) -> Vec<Peer> {
    configured_cluster(config).get_n(replicas.max(1), key.as_bytes())
}

pub fn print_owners(config: &FlotillaConfig, key: &str, replicas: usize) {
    for (rank, peer) in owners(config, key, replicas).iter().enumerate() {
        let weight = rendezvous::weight(&peer.name, key.as_bytes());
        println!("{}\t{}\t{}\t{}", rank + 1, peer.name, peer.addr, weight);
    }
}
