//! Reaching a peer's coordinator.
//!
//! The orchestrator only needs two calls per peer: start a deploy and read
//! back the latest record. `Remote` abstracts the transport; `LocalRemote`
//! routes to in-process coordinators by peer name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use flotilla_core::{Archive, DeployOptions, DeployRecord, Peer};

use crate::coordinator::{Admission, Coordinator};
use crate::error::RemoteError;

#[async_trait]
pub trait Remote: Send + Sync {
    /// The peer's most recent deploy record, if it has ever deployed.
    async fn check(&self, peer: &Peer) -> Result<Option<DeployRecord>, RemoteError>;

    async fn deploy(
        &self,
        peer: &Peer,
        archive: &Archive,
        options: &DeployOptions,
    ) -> Result<Admission, RemoteError>;
}

#[derive(Debug, Default, Clone)]
pub struct LocalRemote {
    coordinators: HashMap<String, Arc<Coordinator>>,
}

impl LocalRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.insert(coordinator);
        self
    }

    pub fn insert(&mut self, coordinator: Arc<Coordinator>) {
        self.coordinators.insert(coordinator.name().to_string(), coordinator);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Coordinator>> {
        self.coordinators.get(name)
    }

    fn lookup(&self, peer: &Peer) -> Result<&Arc<Coordinator>, RemoteError> {
        self.get(&peer.name)
            .ok_or_else(|| RemoteError::UnknownPeer(peer.name.clone()))
    }
}

#[async_trait]
impl Remote for LocalRemote {
    async fn check(&self, peer: &Peer) -> Result<Option<DeployRecord>, RemoteError> {
        Ok(self.lookup(peer)?.record())
    }

    async fn deploy(
        &self,
        peer: &Peer,
        archive: &Archive,
        options: &DeployOptions,
    ) -> Result<Admission, RemoteError> {
        Ok(self.lookup(peer)?.deploy(archive.clone(), options.clone()))
    }
}
