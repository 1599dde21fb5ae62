//! Cached membership — memoizes another view for a short TTL.
//!
//! Gossip membership tables are cheap to read once but rollouts and
//! ownership queries read them in tight loops. `Memo` keeps the last fetch
//! and refreshes it at most once per TTL window, however many callers race
//! on the expiry.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use flotilla_core::Peer;

use crate::error::ClusterResult;
use crate::membership::Cluster;

pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// A value refreshed at most once per `ttl`.
pub struct Memo<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> Memo<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached value, calling `fetch` if it has expired.
    ///
    /// Readers share the lock while the value is fresh. On expiry one caller
    /// takes the write lock and re-checks before fetching, so callers that
    /// queued behind it reuse its result instead of fetching again.
    pub fn get_or_refresh(&self, fetch: impl FnOnce() -> T) -> T {
        {
            let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = self.fresh(&slot) {
                return value;
            }
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.fresh(&slot) {
            return value;
        }
        let value = fetch();
        *slot = Some((Instant::now(), value.clone()));
        value
    }

    /// Drop the cached value so the next read refetches.
    pub fn invalidate(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn fresh(&self, slot: &Option<(Instant, T)>) -> Option<T> {
        match slot {
            Some((fetched_at, value)) if fetched_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }
}

/// Wraps any `Cluster`, caching its member list.
pub struct CachedCluster<C> {
    inner: C,
    members: Memo<Vec<Peer>>,
}

impl<C: Cluster> CachedCluster<C> {
    pub fn new(inner: C) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            members: Memo::new(ttl),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn invalidate(&self) {
        self.members.invalidate();
    }
}

#[async_trait]
impl<C: Cluster> Cluster for CachedCluster<C> {
    fn local(&self) -> Peer {
        self.inner.local()
    }

    fn members(&self) -> Vec<Peer> {
        self.members.get_or_refresh(|| {
            let members = self.inner.members();
            debug!(count = members.len(), "refreshed cached membership");
            members
        })
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        self.invalidate();
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::StaticCluster;
    use std::net::SocketAddr;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often the wrapped view is actually read.
    struct Counting {
        inner: StaticCluster,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Cluster for Counting {
        fn local(&self) -> Peer {
            self.inner.local()
        }

        fn members(&self) -> Vec<Peer> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent callers.
            std::thread::sleep(Duration::from_millis(5));
            self.inner.members()
        }

        async fn shutdown(&self) -> ClusterResult<()> {
            Ok(())
        }
    }

    fn counting() -> Counting {
        let peers: Vec<Peer> = (1..=3)
            .map(|i| Peer::new(format!("node-{i}"), SocketAddr::from(([10, 0, 0, i], 7946))))
            .collect();
        Counting {
            inner: StaticCluster::new(peers[0].clone(), peers),
            fetches: AtomicUsize::new(0),
        }
    }

    #[test]
    fn concurrent_reads_fetch_once_per_window() {
        let cached = CachedCluster::with_ttl(counting(), Duration::from_secs(60));
        let barrier = Barrier::new(16);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    barrier.wait();
                    assert_eq!(cached.members().len(), 3);
                });
            }
        });

        assert_eq!(cached.inner().fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiry_triggers_refetch() {
        let cached = CachedCluster::with_ttl(counting(), Duration::from_millis(30));

        for _ in 0..3 {
            cached.members();
            cached.members();
            std::thread::sleep(Duration::from_millis(45));
        }

        assert_eq!(cached.inner().fetches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ownership_queries_use_the_cache() {
        let cached = CachedCluster::with_ttl(counting(), Duration::from_secs(60));
        let owner = cached.get(b"key").unwrap();
        assert_eq!(cached.get_n(1, b"key"), vec![owner]);
        assert_eq!(cached.inner().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_invalidates() {
        let cached = CachedCluster::with_ttl(counting(), Duration::from_secs(60));
        cached.members();
        cached.shutdown().await.unwrap();
        cached.members();
        assert_eq!(cached.inner().fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_reuses_value_inside_ttl() {
        let memo = Memo::new(Duration::from_secs(60));
        assert_eq!(memo.get_or_refresh(|| 1), 1);
        assert_eq!(memo.get_or_refresh(|| 2), 1);
        memo.invalidate();
        assert_eq!(memo.get_or_refresh(|| 3), 3);
    }
}
