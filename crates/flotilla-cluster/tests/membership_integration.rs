//! Membership integration tests.
//!
//! Multi-node scenarios on an in-memory gossip network: bootstrap, views
//! layered over the gossip table, and ownership agreement between nodes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flotilla_cluster::{
    Bootstrap, CachedCluster, Cluster, ClusterEvent, EventSource, LiveCluster, MemoryNetwork,
    PendingCluster, StaticPeers,
};
use flotilla_core::PeerFlags;
use flotilla_core::backoff::Constant;

fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 7946))
}

async fn form(net: &MemoryNetwork, size: u8) -> Vec<Arc<LiveCluster>> {
    let mut nodes = Vec::new();
    for i in 1..=size {
        let gossip = net.register(&format!("node-{i}"), addr(i), PeerFlags::DEPLOYER);
        let joined = Bootstrap::new()
            .with_backoff(Box::new(Constant(Duration::from_millis(1))))
            .single_node(i == 1)
            .with_strategy(StaticPeers(vec![addr(1)]))
            .run(&gossip)
            .await
            .unwrap();
        assert_eq!(joined, usize::from(i > 1));
        nodes.push(Arc::new(LiveCluster::new(Arc::new(gossip))));
    }
    nodes
}

#[tokio::test]
async fn nodes_agree_on_owners() {
    let net = MemoryNetwork::new();
    let nodes = form(&net, 5).await;

    for node in &nodes {
        assert_eq!(node.members().len(), 5);
    }
    for i in 0..50 {
        let key = format!("tenant-{i}");
        let owners: Vec<_> = nodes.iter().map(|n| n.get(key.as_bytes()).unwrap().name).collect();
        assert!(owners.windows(2).all(|w| w[0] == w[1]), "disagreement on {key}: {owners:?}");

        let replicas = nodes[0].get_n(3, key.as_bytes());
        assert_eq!(replicas.len(), 3);
        assert_eq!(replicas[0].name, owners[0]);
    }
}

#[tokio::test]
async fn only_the_dead_nodes_keys_move() {
    let net = MemoryNetwork::new();
    let nodes = form(&net, 4).await;
    let observer = CachedCluster::with_ttl(nodes[0].clone(), Duration::from_millis(1));

    let keys: Vec<String> = (0..200).map(|i| format!("key-{i}")).collect();
    let before: Vec<String> = keys.iter().map(|k| observer.get(k.as_bytes()).unwrap().name).collect();

    net.kill(addr(3));
    tokio::time::sleep(Duration::from_millis(5)).await;

    for (key, owner) in keys.iter().zip(&before) {
        let now = observer.get(key.as_bytes()).unwrap().name;
        assert_ne!(now, "node-3");
        if owner != "node-3" {
            assert_eq!(&now, owner, "{key} moved without cause");
        }
    }
}

#[tokio::test]
async fn pending_view_becomes_live() {
    let net = MemoryNetwork::new();
    let nodes = form(&net, 3).await;

    let pending = PendingCluster::new(nodes[0].local());
    assert!(pending.members().is_empty());
    assert!(pending.get(b"key").is_none());

    pending.assign(nodes[0].clone()).unwrap();
    assert_eq!(pending.members().len(), 3);
    assert_eq!(pending.get(b"key"), nodes[1].get(b"key"));
    assert!(pending.assign(nodes[1].clone()).is_err());
}

#[tokio::test]
async fn leave_is_announced() {
    let net = MemoryNetwork::new();
    let nodes = form(&net, 3).await;
    let mut events = nodes[0].events();

    nodes[2].shutdown().await.unwrap();

    loop {
        match events.recv().await {
            Some(ClusterEvent::Left(peer)) => {
                assert_eq!(peer.name, "node-3");
                assert!(!peer.is_alive());
                break;
            }
            Some(_) => continue,
            None => panic!("event stream closed before the leave arrived"),
        }
    }
    assert!(nodes[0].get_n(5, b"key").iter().all(|p| p.name != "node-3"));
}
