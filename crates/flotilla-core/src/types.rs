//! Shared types used across Flotilla crates.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::location::Location;

// ── Peer ──────────────────────────────────────────────────────────

bitflags! {
    /// Capability and status bits a peer advertises through gossip metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PeerFlags: u32 {
        /// Runs a coordinator and accepts deploys.
        const DEPLOYER = 1;
        /// Participates in gossip but is never a rollout target.
        const LURKER = 1 << 1;
        /// Believed alive by the local gossip view.
        const ALIVE = 1 << 2;
    }
}

/// A participant in the cluster, as seen by one membership query.
///
/// The name is the rendezvous hashing key and must survive gossip restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub addr: SocketAddr,
    pub flags: PeerFlags,
}

impl Peer {
    /// A live peer that accepts deploys.
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            flags: PeerFlags::DEPLOYER | PeerFlags::ALIVE,
        }
    }

    pub fn with_flags(mut self, flags: PeerFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.flags.contains(PeerFlags::ALIVE)
    }

    /// Whether a rollout may target this peer.
    pub fn accepts_deploys(&self) -> bool {
        self.flags.contains(PeerFlags::DEPLOYER) && !self.flags.contains(PeerFlags::LURKER)
    }

    /// Flag the peer as gone. Departed peers are kept, not deleted.
    pub fn mark_gone(&mut self) {
        self.flags.remove(PeerFlags::ALIVE);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

// ── Archive ───────────────────────────────────────────────────────

/// Random 128-bit deploy identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeployId(Uuid);

impl DeployId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeployId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for DeployId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeployId({})", self.0.hyphenated())
    }
}

impl FromStr for DeployId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable descriptor of a deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub id: DeployId,
    /// Who asked for the deploy.
    pub initiator: String,
    pub location: Location,
    /// Peer that originated the rollout.
    pub leader: Peer,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
}

impl Archive {
    pub fn new(initiator: impl Into<String>, location: Location, leader: Peer) -> Self {
        Self {
            id: DeployId::random(),
            initiator: initiator.into(),
            location,
            leader,
            created_at: epoch_secs(),
        }
    }
}

// ── Deploy records ────────────────────────────────────────────────

/// How many peers a rollout touches per batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Fraction of the target list, clamped to `(0, 1]`.
    Percent(f64),
    /// Fixed batch size.
    Constant(usize),
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Constant(1)
    }
}

/// Per-rollout options, carried with every deploy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployOptions {
    pub concurrency: Concurrency,
    /// Upper bound on each convergence wait.
    pub timeout: Duration,
    /// Keep rolling after failures and tally them instead of halting.
    pub ignore_failures: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
            timeout: Duration::from_secs(300),
            ignore_failures: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Deploying,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Deploying => "deploying",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        })
    }
}

/// Latest known outcome of a deploy on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub archive: Archive,
    pub options: DeployOptions,
    pub stage: Stage,
}

/// A stage transition announced to the rest of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub peer: String,
    pub archive: DeployId,
    pub stage: Stage,
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
