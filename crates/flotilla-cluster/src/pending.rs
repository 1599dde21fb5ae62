//! Pending membership — a placeholder handed out before the real cluster
//! exists, e.g. while bootstrap is still joining.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::info;

use flotilla_core::Peer;

use crate::error::{ClusterError, ClusterResult};
use crate::membership::Cluster;

/// Answers empty until `assign` is called, then forwards everything.
pub struct PendingCluster {
    local: Peer,
    inner: OnceLock<Arc<dyn Cluster>>,
}

impl PendingCluster {
    pub fn new(local: Peer) -> Self {
        Self {
            local,
            inner: OnceLock::new(),
        }
    }

    /// Install the real cluster. Only the first call succeeds.
    pub fn assign(&self, cluster: Arc<dyn Cluster>) -> ClusterResult<()> {
        self.inner
            .set(cluster)
            .map_err(|_| ClusterError::AlreadyAssigned)?;
        info!(node = %self.local.name, "pending cluster assigned");
        Ok(())
    }

    pub fn is_assigned(&self) -> bool {
        self.inner.get().is_some()
    }
}

#[async_trait]
impl Cluster for PendingCluster {
    fn local(&self) -> Peer {
        match self.inner.get() {
            Some(cluster) => cluster.local(),
            None => self.local.clone(),
        }
    }

    fn members(&self) -> Vec<Peer> {
        self.inner
            .get()
            .map(|cluster| cluster.members())
            .unwrap_or_default()
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        match self.inner.get() {
            Some(cluster) => cluster.shutdown().await,
            None => Ok(()),
        }
    }
}
