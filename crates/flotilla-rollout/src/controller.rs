//! Rollout controller — pushes one archive across the fleet in batches.
//!
//! ```text
//! members ─▶ eligible (alive, deployer, not lurker) ─▶ filter ─▶ sort by name
//!        ─▶ wait until no target is mid-deploy
//!        ─▶ for each batch: dispatch ─▶ wait for convergence (bounded)
//! ```
//!
//! By default a rollout is fail-fast: the first failed peer stops it and no
//! further batches are dispatched. With `ignore_failures` every batch runs
//! and failures are tallied.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use flotilla_cluster::Cluster;
use flotilla_core::{Archive, DeployId, DeployOptions, Peer, Stage};

use crate::coordinator::Admission;
use crate::error::{RolloutError, RolloutResult};
use crate::filter::Filter;
use crate::monitor::Monitor;
use crate::remote::Remote;
use crate::strategy::{Partitioner, batch_count, batches};

/// Result of one rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloutSummary {
    pub archive: DeployId,
    /// Peers selected for the rollout.
    pub targets: usize,
    /// Peers that accepted the archive.
    pub dispatched: usize,
    pub failures: usize,
    /// Stopped early on a failure.
    pub halted: bool,
}

impl RolloutSummary {
    pub fn success(&self) -> bool {
        self.failures == 0
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    dispatched: usize,
    failures: usize,
}

pub struct Rollout {
    remote: Arc<dyn Remote>,
    monitor: Monitor,
    filter: Filter,
}

impl Rollout {
    pub fn new(remote: Arc<dyn Remote>, monitor: Monitor) -> Self {
        Self {
            remote,
            monitor,
            filter: Filter::Always,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Peers this rollout would touch, in dispatch order.
    pub fn targets(&self, cluster: &dyn Cluster) -> Vec<Peer> {
        let eligible = cluster
            .members()
            .into_iter()
            .filter(|p| p.is_alive() && p.accepts_deploys());
        let mut targets = self.filter.apply(eligible);
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    /// Roll `archive` out to every target. Only cancellation is an error;
    /// peer failures are reported in the summary.
    pub async fn deploy(
        &self,
        cluster: &dyn Cluster,
        archive: &Archive,
        options: &DeployOptions,
        mut cancel: watch::Receiver<bool>,
    ) -> RolloutResult<RolloutSummary> {
        let targets = self.targets(cluster);
        let mut summary = RolloutSummary {
            archive: archive.id,
            targets: targets.len(),
            dispatched: 0,
            failures: 0,
            halted: false,
        };
        if targets.is_empty() {
            warn!(archive = %archive.id, "no eligible peers, nothing to roll out");
            return Ok(summary);
        }

        self.wait_idle(&targets, options.timeout, &mut cancel).await?;

        let size = options.concurrency.partition(targets.len());
        let total = batch_count(targets.len(), size);
        info!(
            archive = %archive.id,
            location = %archive.location,
            targets = targets.len(),
            batches = total,
            batch_size = size,
            ignore_failures = options.ignore_failures,
            "starting rollout"
        );

        for (index, range) in batches(targets.len(), &options.concurrency).into_iter().enumerate() {
            let batch = &targets[range];
            debug!(archive = %archive.id, batch = index + 1, total, peers = batch.len(), "dispatching batch");

            let outcome = self.run_batch(batch, archive, options, &mut cancel).await?;
            summary.dispatched += outcome.dispatched;
            summary.failures += outcome.failures;

            if outcome.failures > 0 && !options.ignore_failures {
                summary.halted = index + 1 < total || outcome.dispatched < batch.len();
                warn!(
                    archive = %archive.id,
                    batch = index + 1,
                    total,
                    failures = summary.failures,
                    "halting rollout after failure"
                );
                break;
            }
        }

        if summary.success() {
            info!(archive = %archive.id, dispatched = summary.dispatched, "rollout completed");
        } else {
            warn!(
                archive = %archive.id,
                dispatched = summary.dispatched,
                failures = summary.failures,
                halted = summary.halted,
                "rollout finished with failures"
            );
        }
        Ok(summary)
    }

    /// Wait until none of `targets` is running a deploy. Gives up quietly
    /// after `timeout`; busy peers will reject the dispatch instead.
    async fn wait_idle(
        &self,
        targets: &[Peer],
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> RolloutResult<()> {
        let (tx, rx) = mpsc::channel(targets.len().max(1));
        for peer in targets {
            let _ = tx.try_send(peer.clone());
        }
        drop(tx);

        let remote = &*self.remote;
        let check = move |peer: Peer| async move {
            match remote.check(&peer).await {
                Ok(Some(record)) if record.stage == Stage::Deploying => {
                    trace!(peer = %peer.name, archive = %record.archive.id, "peer busy");
                    Ok(Some(peer))
                }
                Ok(_) => Ok(None),
                Err(e) => {
                    debug!(peer = %peer.name, error = %e, "idle check failed");
                    Ok(None)
                }
            }
        };

        match tokio::time::timeout(timeout, self.monitor.wait(rx, check, cancel)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "peers still busy with an earlier deploy, proceeding");
                Ok(())
            }
        }
    }

    async fn run_batch(
        &self,
        batch: &[Peer],
        archive: &Archive,
        options: &DeployOptions,
        cancel: &mut watch::Receiver<bool>,
    ) -> RolloutResult<BatchOutcome> {
        let fail_fast = !options.ignore_failures;
        let mut outcome = BatchOutcome::default();
        let mut accepted = Vec::with_capacity(batch.len());

        for peer in batch {
            match self.remote.deploy(peer, archive, options).await {
                Ok(Admission::Accepted) => {
                    debug!(peer = %peer.name, archive = %archive.id, "dispatched");
                    accepted.push(peer.clone());
                }
                Ok(Admission::Busy) => {
                    warn!(peer = %peer.name, archive = %archive.id, "peer busy with another deploy");
                    outcome.failures += 1;
                }
                Err(e) => {
                    warn!(peer = %peer.name, archive = %archive.id, error = %e, "dispatch failed");
                    outcome.failures += 1;
                }
            }
            if fail_fast && outcome.failures > 0 {
                break;
            }
        }
        outcome.dispatched = accepted.len();
        if (fail_fast && outcome.failures > 0) || accepted.is_empty() {
            return Ok(outcome);
        }

        let (tx, rx) = mpsc::channel(accepted.len());
        for peer in accepted {
            let _ = tx.try_send(peer);
        }
        drop(tx);

        let resolved = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let (resolved_ref, failed_ref) = (&resolved, &failed);
        let remote = &*self.remote;
        let id = archive.id;

        let check = move |peer: Peer| async move {
            let failure = match remote.check(&peer).await {
                Ok(Some(record)) if record.archive.id == id => match record.stage {
                    Stage::Deploying => return Ok(Some(peer)),
                    Stage::Completed => {
                        resolved_ref.fetch_add(1, Ordering::SeqCst);
                        info!(peer = %peer.name, archive = %id, "peer deployed");
                        return Ok(None);
                    }
                    Stage::Failed => {
                        warn!(peer = %peer.name, archive = %id, "peer failed to deploy");
                        peer.name
                    }
                },
                // Not started on this archive yet.
                Ok(_) => return Ok(Some(peer)),
                Err(e) => {
                    warn!(peer = %peer.name, archive = %id, error = %e, "status check failed");
                    peer.name
                }
            };
            resolved_ref.fetch_add(1, Ordering::SeqCst);
            failed_ref.fetch_add(1, Ordering::SeqCst);
            if fail_fast {
                Err(RolloutError::PeerFailed(failure))
            } else {
                Ok(None)
            }
        };

        let wait = self.monitor.wait(rx, check, cancel);
        match tokio::time::timeout(options.timeout, wait).await {
            Ok(Ok(())) => {}
            Ok(Err(RolloutError::PeerFailed(peer))) => {
                debug!(%peer, archive = %id, "batch stopped on first failure");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let stuck = outcome.dispatched - resolved.load(Ordering::SeqCst);
                warn!(archive = %id, stuck, timeout = ?options.timeout, "batch did not converge in time");
                outcome.failures += stuck;
            }
        }
        outcome.failures += failed.load(Ordering::SeqCst);
        Ok(outcome)
    }
}
