//! Standalone mode — a whole fleet inside one process.
//!
//! 1. Register every node on an in-memory gossip network and bootstrap it
//! 2. Give each node a coordinator that announces stages over gossip
//! 3. Roll the archive out from the first node
//! 4. Leave the cluster, followers first

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use flotilla_cluster::{Bootstrap, CachedCluster, Cluster, LiveCluster, MemoryNetwork, StaticPeers};
use flotilla_core::{Archive, DeployRecord, FlotillaConfig, Location, PeerFlags};
use flotilla_rollout::{
    Coordinator, Filter, LocalRemote, Monitor, Observer, Rollout, RolloutSummary, deploy_event,
};

use crate::simulate::SimulatedDeployer;

const SIMULATED_DELAY: std::ops::Range<Duration> = Duration::from_millis(50)..Duration::from_millis(400);

/// Run a rollout of `location` across `fleet` in-process nodes.
pub async fn run_standalone(
    config: &FlotillaConfig,
    location: &str,
    fleet: u16,
    only: Option<&str>,
    fail_rate: f64,
) -> anyhow::Result<RolloutSummary> {
    let location = Location::parse(location)?;
    let options = config.deploy_options()?;
    info!(node = %config.node.name, fleet, %location, "Flotilla daemon starting in standalone mode");

    // ── Membership ──────────────────────────────────────────────

    let net = MemoryNetwork::new();
    let leader_addr = config.node.bind;
    let mut nodes: Vec<Arc<LiveCluster>> = Vec::with_capacity(usize::from(fleet));
    let mut remote = LocalRemote::new();

    for index in 0..fleet.max(1) {
        let (name, addr) = node_identity(config, index);
        let gossip = net.register(&name, addr, PeerFlags::DEPLOYER);

        let bootstrap = if index == 0 {
            Bootstrap::new()
                .with_strategy(StaticPeers(config.seeds().to_vec()))
                .with_attempts(config.join_attempts())
                .with_backoff(config.join_backoff()?)
                .single_node(config.single_node_enabled())
        } else {
            Bootstrap::new()
                .with_strategy(StaticPeers(vec![leader_addr]))
                .with_attempts(config.join_attempts())
                .with_backoff(config.join_backoff()?)
        };
        let joined = bootstrap
            .run(&gossip)
            .await
            .with_context(|| format!("bootstrapping {name}"))?;
        info!(node = %name, %addr, joined, "node up");

        let live = Arc::new(LiveCluster::new(Arc::new(gossip)));

        // ── Coordinator ─────────────────────────────────────────
        let announcer = live.clone();
        let node = name.clone();
        let observer: Observer = Arc::new(move |record: &DeployRecord| {
            if let Err(e) = announcer.publish(&deploy_event(&node, record)) {
                warn!(node = %node, error = %e, "failed to announce deploy stage");
            }
        });
        let deployer = Arc::new(SimulatedDeployer::new(name.clone(), SIMULATED_DELAY, fail_rate));
        remote.insert(Arc::new(Coordinator::with_observer(name, deployer, observer)));

        nodes.push(live);
    }

    let leader = nodes[0].clone();
    let view = CachedCluster::with_ttl(leader.clone(), config.cache_ttl()?);
    info!(members = view.members().len(), "fleet formed");

    // ── Rollout ─────────────────────────────────────────────────

    let mut rollout = Rollout::new(
        Arc::new(remote),
        Monitor::new(Arc::from(config.tick_backoff()?)).with_events(leader.clone()),
    );
    if let Some(pattern) = only {
        rollout = rollout.with_filter(Filter::name(pattern).context("invalid --only pattern")?);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, cancelling rollout");
            let _ = cancel_tx.send(true);
        }
    });

    let archive = Archive::new(config.node.name.clone(), location, leader.local());
    let result = rollout.deploy(&view, &archive, &options, cancel_rx).await;

    // ── Shutdown ────────────────────────────────────────────────

    for node in nodes.iter().skip(1).rev() {
        if let Err(e) = node.shutdown().await {
            warn!(node = %node.local().name, error = %e, "leave failed");
        }
    }
    view.shutdown().await?;

    info!("Flotilla daemon stopped");
    Ok(result?)
}

/// Name and address of the `index`th in-process node. Node zero is the one
/// from the config; the rest take consecutive ports after it.
fn node_identity(config: &FlotillaConfig, index: u16) -> (String, SocketAddr) {
    if index == 0 {
        return (config.node.name.clone(), config.node.bind);
    }
    let bind = config.node.bind;
    let addr = SocketAddr::new(bind.ip(), bind.port().wrapping_add(index));
    (format!("{}-{}", config.node.name, index + 1), addr)
}
