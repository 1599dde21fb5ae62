//! Deploy coordinator — serializes deploys on a single node.
//!
//! A node runs one deploy at a time. `deploy` either admits the archive and
//! hands it to the `Deployer` on a background task, or rejects it because a
//! deploy is already running. The deployer reports back through its
//! `DeployContext`; a drain task applies those completions to the state
//! machine:
//!
//! ```text
//! Ready ──deploy──▶ Deploying ──ok──▶ Ready
//!   ▲                   │
//!   │                   └──err──▶ Failed(reason)
//!   └──────deploy (ok)──────────────────┘
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use flotilla_core::{Archive, DeployEvent, DeployId, DeployOptions, DeployRecord, Stage};

use crate::error::CoordinatorError;

/// Runs the actual deploy for one archive on this node.
///
/// Implementations must eventually call `DeployContext::complete` or
/// `DeployContext::fail`. Dropping the context without either counts as a
/// failure.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, ctx: DeployContext);
}

/// Called with every record transition, in order.
pub type Observer = Arc<dyn Fn(&DeployRecord) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Ready,
    Deploying,
    Failed(String),
}

/// Outcome of asking a coordinator to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Another deploy is running; nothing was started.
    Busy,
}

struct Completion {
    archive: DeployId,
    result: Result<(), String>,
}

/// Handle given to a `Deployer` for one admitted archive.
pub struct DeployContext {
    pub archive: Archive,
    pub options: DeployOptions,
    done: Option<mpsc::UnboundedSender<Completion>>,
}

impl DeployContext {
    pub fn complete(mut self) {
        self.finish(Ok(()));
    }

    pub fn fail(mut self, reason: impl fmt::Display) {
        self.finish(Err(reason.to_string()));
    }

    fn finish(&mut self, result: Result<(), String>) {
        if let Some(done) = self.done.take() {
            // The coordinator may already be gone; nobody is left to tell.
            let _ = done.send(Completion {
                archive: self.archive.id,
                result,
            });
        }
    }
}

impl Drop for DeployContext {
    fn drop(&mut self) {
        if self.done.is_some() {
            warn!(archive = %self.archive.id, "deployer dropped its context without reporting");
            self.finish(Err("deployer exited without reporting a result".to_string()));
        }
    }
}

impl fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployContext")
            .field("archive", &self.archive.id)
            .field("reported", &self.done.is_none())
            .finish()
    }
}

struct Slot {
    state: CoordinatorState,
    record: Option<DeployRecord>,
}

struct Shared {
    name: String,
    slot: Mutex<Slot>,
    /// Held across a transition and its announcement, so the observer sees
    /// transitions in the order they happened.
    turn: Mutex<()>,
    state_tx: watch::Sender<CoordinatorState>,
    observer: Option<Observer>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, record: &DeployRecord) {
        if let Some(observer) = &self.observer {
            observer(record);
        }
    }

    fn apply(&self, completion: Completion) {
        let _turn = self.turn();
        let (record, state) = {
            let mut slot = self.lock();
            let Some(record) = slot.record.as_mut().filter(|r| r.archive.id == completion.archive) else {
                warn!(node = %self.name, archive = %completion.archive, "ignoring completion for an archive that is not current");
                return;
            };
            if record.stage != Stage::Deploying {
                warn!(node = %self.name, archive = %completion.archive, "ignoring repeated completion");
                return;
            }

            let state = match completion.result {
                Ok(()) => {
                    record.stage = Stage::Completed;
                    info!(node = %self.name, archive = %completion.archive, "deploy completed");
                    CoordinatorState::Ready
                }
                Err(reason) => {
                    record.stage = Stage::Failed;
                    error!(node = %self.name, archive = %completion.archive, %reason, "deploy failed");
                    CoordinatorState::Failed(reason)
                }
            };
            let record = record.clone();
            slot.state = state.clone();
            (record, state)
        };
        self.notify(&record);
        // After the observer, so waiters wake with the terminal stage announced.
        self.state_tx.send_replace(state);
    }
}

/// Per-node deploy state machine.
///
/// Must be created inside a Tokio runtime; it spawns its completion drain.
pub struct Coordinator {
    shared: Arc<Shared>,
    done_tx: mpsc::UnboundedSender<Completion>,
    deployer: Arc<dyn Deployer>,
}

impl Coordinator {
    pub fn new(name: impl Into<String>, deployer: Arc<dyn Deployer>) -> Self {
        Self::spawn(name.into(), deployer, None)
    }

    /// Like `new`, but `observer` sees every record transition.
    pub fn with_observer(name: impl Into<String>, deployer: Arc<dyn Deployer>, observer: Observer) -> Self {
        Self::spawn(name.into(), deployer, Some(observer))
    }

    fn spawn(name: String, deployer: Arc<dyn Deployer>, observer: Option<Observer>) -> Self {
        let (state_tx, _) = watch::channel(CoordinatorState::Ready);
        let shared = Arc::new(Shared {
            name,
            slot: Mutex::new(Slot {
                state: CoordinatorState::Ready,
                record: None,
            }),
            turn: Mutex::new(()),
            state_tx,
            observer,
        });

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let drain = shared.clone();
        tokio::spawn(async move {
            // Ends once the coordinator and every outstanding context are gone.
            while let Some(completion) = done_rx.recv().await {
                drain.apply(completion);
            }
            debug!(node = %drain.name, "coordinator drain stopped");
        });

        Self {
            shared,
            done_tx,
            deployer,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Start deploying `archive` unless a deploy is already running.
    pub fn deploy(&self, archive: Archive, options: DeployOptions) -> Admission {
        let turn = self.shared.turn();
        let record = {
            let mut slot = self.shared.lock();
            if slot.state == CoordinatorState::Deploying {
                debug!(node = %self.shared.name, archive = %archive.id, "deploy rejected, another is running");
                return Admission::Busy;
            }
            let record = DeployRecord {
                archive,
                options,
                stage: Stage::Deploying,
            };
            slot.state = CoordinatorState::Deploying;
            slot.record = Some(record.clone());
            self.shared.state_tx.send_replace(CoordinatorState::Deploying);
            record
        };

        info!(
            node = %self.shared.name,
            archive = %record.archive.id,
            location = %record.archive.location,
            "deploy accepted"
        );
        // Announce before the deployer starts so Deploying is always seen
        // ahead of its terminal stage.
        self.shared.notify(&record);
        drop(turn);

        let ctx = DeployContext {
            archive: record.archive,
            options: record.options,
            done: Some(self.done_tx.clone()),
        };
        let deployer = self.deployer.clone();
        tokio::spawn(async move { deployer.deploy(ctx).await });

        Admission::Accepted
    }

    /// `Ok` when idle and the last deploy (if any) succeeded.
    pub fn status(&self) -> Result<(), CoordinatorError> {
        match &self.shared.lock().state {
            CoordinatorState::Ready => Ok(()),
            CoordinatorState::Deploying => Err(CoordinatorError::Deploying),
            CoordinatorState::Failed(reason) => Err(CoordinatorError::Failed(reason.clone())),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.lock().state.clone()
    }

    /// The most recent deploy, running or finished.
    pub fn record(&self) -> Option<DeployRecord> {
        self.shared.lock().record.clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until no deploy is running and return the resulting status.
    pub async fn settled(&self) -> Result<(), CoordinatorError> {
        let mut rx = self.subscribe();
        // The sender lives in `shared`, which outlives this borrow.
        let _ = rx.wait_for(|s| *s != CoordinatorState::Deploying).await;
        self.status()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// The gossip announcement for a record transition on `peer`.
pub fn deploy_event(peer: &str, record: &DeployRecord) -> DeployEvent {
    DeployEvent {
        peer: peer.to_string(),
        archive: record.archive.id,
        stage: record.stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{Location, Peer};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn archive() -> Archive {
        let leader = Peer::new("leader", SocketAddr::from(([10, 0, 0, 1], 7946)));
        Archive::new("tests", Location::parse("file:///tmp/app.tar").unwrap(), leader)
    }

    /// Succeeds unless told to fail, optionally parking until released.
    struct Scripted {
        calls: AtomicUsize,
        fail_on: Option<usize>,
        gate: Option<Arc<Notify>>,
    }

    impl Scripted {
        fn ok() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail_on: None, gate: None })
        }

        fn failing_on(call: usize) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail_on: Some(call), gate: None })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail_on: None, gate: Some(gate) })
        }
    }

    #[async_trait]
    impl Deployer for Scripted {
        async fn deploy(&self, ctx: DeployContext) {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_on == Some(call) {
                ctx.fail("disk full");
            } else {
                ctx.complete();
            }
        }
    }

    #[tokio::test]
    async fn successful_deploy_returns_to_ready() {
        let coordinator = Coordinator::new("a", Scripted::ok());
        assert!(coordinator.status().is_ok());
        assert!(coordinator.record().is_none());

        let archive = archive();
        assert_eq!(coordinator.deploy(archive.clone(), DeployOptions::default()), Admission::Accepted);
        coordinator.settled().await.unwrap();

        let record = coordinator.record().unwrap();
        assert_eq!(record.archive.id, archive.id);
        assert_eq!(record.stage, Stage::Completed);
    }

    #[tokio::test]
    async fn second_deploy_while_running_is_rejected() {
        let gate = Arc::new(Notify::new());
        let deployer = Scripted::gated(gate.clone());
        let coordinator = Coordinator::new("a", deployer.clone());

        let first = archive();
        assert_eq!(coordinator.deploy(first.clone(), DeployOptions::default()), Admission::Accepted);
        assert_eq!(coordinator.deploy(archive(), DeployOptions::default()), Admission::Busy);
        assert_eq!(coordinator.status(), Err(CoordinatorError::Deploying));
        assert_eq!(coordinator.record().unwrap().archive.id, first.id);

        gate.notify_one();
        coordinator.settled().await.unwrap();
        assert_eq!(deployer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_then_recovery() {
        let coordinator = Coordinator::new("a", Scripted::failing_on(1));

        coordinator.deploy(archive(), DeployOptions::default());
        let err = coordinator.settled().await.unwrap_err();
        assert_eq!(err, CoordinatorError::Failed("disk full".to_string()));
        assert_eq!(coordinator.record().unwrap().stage, Stage::Failed);

        assert_eq!(coordinator.deploy(archive(), DeployOptions::default()), Admission::Accepted);
        coordinator.settled().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn dropped_context_counts_as_failure() {
        struct Forgetful;

        #[async_trait]
        impl Deployer for Forgetful {
            async fn deploy(&self, _ctx: DeployContext) {}
        }

        let coordinator = Coordinator::new("a", Arc::new(Forgetful));
        coordinator.deploy(archive(), DeployOptions::default());
        assert!(matches!(coordinator.settled().await, Err(CoordinatorError::Failed(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn next_deploy_is_announced_after_previous_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Observer = Arc::new(move |record: &DeployRecord| {
            if record.stage == Stage::Completed {
                // Give a racing admission every chance to jump the queue.
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            sink.lock().unwrap().push((record.archive.id, record.stage));
        });
        let coordinator = Arc::new(Coordinator::with_observer("a", Scripted::ok(), observer));

        let first = archive();
        let second = archive();
        coordinator.deploy(first.clone(), DeployOptions::default());
        let retry = coordinator.clone();
        let next = second.clone();
        tokio::spawn(async move {
            while retry.deploy(next.clone(), DeployOptions::default()) == Admission::Busy {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        coordinator.settled().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (first.id, Stage::Deploying),
                (first.id, Stage::Completed),
                (second.id, Stage::Deploying),
                (second.id, Stage::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn observer_sees_transitions_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Observer = Arc::new(move |record: &DeployRecord| {
            sink.lock().unwrap().push(deploy_event("a", record));
        });
        let coordinator = Coordinator::with_observer("a", Scripted::ok(), observer);

        let archive = archive();
        coordinator.deploy(archive.clone(), DeployOptions::default());
        coordinator.settled().await.unwrap();

        let seen = seen.lock().unwrap();
        let stages: Vec<Stage> = seen.iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Deploying, Stage::Completed]);
        assert!(seen.iter().all(|e| e.archive == archive.id && e.peer == "a"));
    }
}
