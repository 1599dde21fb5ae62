//! flotilla-rollout — getting an archive onto every node.
//!
//! Each node runs a `Coordinator` that admits at most one deploy at a time
//! and hands it to a `Deployer`. A `Rollout` on the initiating node picks
//! targets from cluster membership, splits them into batches and drives
//! each batch through a `Remote` until it converges, fails, or times out.
//!
//! # Components
//!
//! - **`coordinator`** — per-node deploy state machine (Ready, Deploying, Failed)
//! - **`remote`** — reaching other nodes' coordinators
//! - **`filter`** — choosing which peers a rollout targets
//! - **`strategy`** — batch sizing (percent or constant)
//! - **`monitor`** — waiting for outstanding work, woken by timer and gossip
//! - **`controller`** — the batch rollout itself

pub mod controller;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod remote;
pub mod strategy;

pub use controller::{Rollout, RolloutSummary};
pub use coordinator::{
    Admission, Coordinator, CoordinatorState, DeployContext, Deployer, Observer, deploy_event,
};
pub use error::{CoordinatorError, RemoteError, RolloutError, RolloutResult};
pub use filter::Filter;
pub use monitor::Monitor;
pub use remote::{LocalRemote, Remote};
pub use strategy::{ConstantPartitioner, Partitioner, PercentPartitioner, batch_count, batches};
