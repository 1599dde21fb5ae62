//! Cluster bootstrap — find somebody to join.
//!
//! Peering strategies are tried in order. Each yields candidate addresses;
//! the join against them is retried a bounded number of times with a
//! backoff between attempts. The first strategy that joins at least one
//! peer wins. When every strategy comes up empty the node either carries on
//! alone (single-node mode) or refuses to start.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use flotilla_core::backoff::{Backoff, Constant};

use crate::error::BootstrapError;
use crate::gossip::Gossip;

/// A source of candidate peer addresses.
#[async_trait]
pub trait PeeringStrategy: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn peers(&self) -> Result<Vec<SocketAddr>, BootstrapError>;
}

/// A fixed list of seed addresses, usually from configuration.
#[derive(Debug, Clone)]
pub struct StaticPeers(pub Vec<SocketAddr>);

#[async_trait]
impl PeeringStrategy for StaticPeers {
    fn name(&self) -> &str {
        "static"
    }

    async fn peers(&self) -> Result<Vec<SocketAddr>, BootstrapError> {
        Ok(self.0.clone())
    }
}

pub struct Bootstrap {
    strategies: Vec<Box<dyn PeeringStrategy>>,
    attempts: u32,
    backoff: Box<dyn Backoff>,
    single_node: bool,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("Bootstrap")
            .field("strategies", &names)
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("single_node", &self.single_node)
            .finish()
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bootstrap {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
            attempts: 3,
            backoff: Box::new(Constant(Duration::from_secs(1))),
            single_node: false,
        }
    }

    pub fn with_strategy(mut self, strategy: impl PeeringStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Join attempts per strategy (at least one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn single_node(mut self, enabled: bool) -> Self {
        self.single_node = enabled;
        self
    }

    /// Join the cluster. Returns the number of peers joined, zero when
    /// running alone in single-node mode.
    pub async fn run(&self, gossip: &dyn Gossip) -> Result<usize, BootstrapError> {
        let local = gossip.local_node().addr;

        for strategy in &self.strategies {
            let candidates = match strategy.peers().await {
                Ok(peers) => peers,
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "peering strategy failed");
                    continue;
                }
            };
            let candidates: Vec<SocketAddr> =
                candidates.into_iter().filter(|addr| *addr != local).collect();
            if candidates.is_empty() {
                debug!(strategy = strategy.name(), "peering strategy yielded no candidates");
                continue;
            }

            if let Some(joined) = self.join_with_retry(gossip, strategy.name(), &candidates).await {
                info!(strategy = strategy.name(), joined, "bootstrapped cluster");
                return Ok(joined);
            }
        }

        if self.single_node {
            info!("no peers joined, continuing as a single node");
            return Ok(0);
        }
        Err(BootstrapError::Exhausted(self.strategies.len()))
    }

    async fn join_with_retry(
        &self,
        gossip: &dyn Gossip,
        strategy: &str,
        candidates: &[SocketAddr],
    ) -> Option<usize> {
        for attempt in 0..self.attempts {
            match gossip.join(candidates).await {
                Ok(joined) if joined > 0 => return Some(joined),
                Ok(_) => {
                    debug!(strategy, attempt, "join reached no peers");
                }
                Err(e) => {
                    warn!(strategy, attempt, candidates = candidates.len(), error = %e, "join failed");
                }
            }
            if attempt + 1 < self.attempts {
                tokio::time::sleep(self.backoff.backoff(attempt)).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use flotilla_core::PeerFlags;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 7946))
    }

    struct Broken;

    #[async_trait]
    impl PeeringStrategy for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn peers(&self) -> Result<Vec<SocketAddr>, BootstrapError> {
            Err(BootstrapError::Peering {
                strategy: "broken".into(),
                reason: "cloud API unavailable".into(),
            })
        }
    }

    /// Counts how often it is consulted.
    struct Counted(AtomicU32, Vec<SocketAddr>);

    #[async_trait]
    impl PeeringStrategy for &'static Counted {
        fn name(&self) -> &str {
            "counted"
        }

        async fn peers(&self) -> Result<Vec<SocketAddr>, BootstrapError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(self.1.clone())
        }
    }

    fn quick() -> Box<dyn Backoff> {
        Box::new(Constant(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn first_successful_strategy_wins() {
        let net = MemoryNetwork::new();
        let local = net.register("a", addr(1), PeerFlags::DEPLOYER);
        net.register("b", addr(2), PeerFlags::DEPLOYER);

        static LATER: Counted = Counted(AtomicU32::new(0), Vec::new());
        let joined = Bootstrap::new()
            .with_backoff(quick())
            .with_strategy(Broken)
            .with_strategy(StaticPeers(vec![addr(1)]))
            .with_strategy(StaticPeers(vec![addr(9), addr(2)]))
            .with_strategy(&LATER)
            .run(&local)
            .await
            .unwrap();

        assert_eq!(joined, 1);
        assert_eq!(LATER.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_strategies_fail() {
        let net = MemoryNetwork::new();
        let local = net.register("a", addr(1), PeerFlags::DEPLOYER);

        let err = Bootstrap::new()
            .with_backoff(quick())
            .with_attempts(2)
            .with_strategy(StaticPeers(vec![addr(2)]))
            .with_strategy(Broken)
            .run(&local)
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Exhausted(2)));
    }

    #[tokio::test]
    async fn single_node_proceeds_alone() {
        let net = MemoryNetwork::new();
        let local = net.register("a", addr(1), PeerFlags::DEPLOYER);

        let joined = Bootstrap::new()
            .with_backoff(quick())
            .single_node(true)
            .with_strategy(StaticPeers(vec![addr(2)]))
            .run(&local)
            .await
            .unwrap();
        assert_eq!(joined, 0);
    }

    #[tokio::test]
    async fn retries_until_peer_appears() {
        let net = MemoryNetwork::new();
        let local = net.register("a", addr(1), PeerFlags::DEPLOYER);

        let late = net.clone();
        let spawner = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            late.register("b", addr(2), PeerFlags::DEPLOYER)
        });

        let joined = Bootstrap::new()
            .with_backoff(Box::new(Constant(Duration::from_millis(20))))
            .with_attempts(20)
            .with_strategy(StaticPeers(vec![addr(2)]))
            .run(&local)
            .await
            .unwrap();
        assert_eq!(joined, 1);
        spawner.await.unwrap();
    }
}
