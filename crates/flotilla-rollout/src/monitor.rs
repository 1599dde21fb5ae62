//! Convergence monitor — waits for a set of outstanding operations.
//!
//! Two ticklers wake the monitor: a periodic one paced by a `Backoff`, and
//! an event-driven one that fires when a deploy announcement or membership
//! lag arrives over gossip. Both feed a single-slot pulse channel, so a
//! burst of wake-ups collapses into one pass over the working set.
//!
//! ```text
//! periodic tickler ──┐
//!                    ├──▶ pulse (cap 1) ──▶ check every outstanding op
//! event tickler ─────┘
//! tasks ─────────────────▶ outstanding set
//! ```
//!
//! Each pass hands every outstanding op to the caller's `check`; an op that
//! comes back is still pending. The wait ends once the task queue is closed
//! and nothing is outstanding.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use flotilla_cluster::{ClusterEvent, EventSource, EventStream};
use flotilla_core::backoff::Backoff;

use crate::error::{RolloutError, RolloutResult};

pub struct Monitor {
    tick: Arc<dyn Backoff>,
    events: Option<Arc<dyn EventSource>>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("tick", &self.tick)
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl Monitor {
    pub fn new(tick: Arc<dyn Backoff>) -> Self {
        Self { tick, events: None }
    }

    /// Also wake on deploy announcements from `source`.
    pub fn with_events(mut self, source: Arc<dyn EventSource>) -> Self {
        self.events = Some(source);
        self
    }

    /// Drive `tasks` to completion.
    ///
    /// `check` returns `Ok(Some(task))` to keep waiting on it, `Ok(None)`
    /// once it has resolved, or an error to abandon the whole wait.
    pub async fn wait<T, F, Fut>(
        &self,
        mut tasks: mpsc::Receiver<T>,
        mut check: F,
        cancel: &mut watch::Receiver<bool>,
    ) -> RolloutResult<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = RolloutResult<Option<T>>>,
    {
        let (pulse_tx, mut pulse_rx) = mpsc::channel::<()>(1);
        let mut ticklers = JoinSet::new();
        ticklers.spawn(periodic(self.tick.clone(), pulse_tx.clone()));
        if let Some(source) = &self.events {
            ticklers.spawn(on_events(source.events(), pulse_tx.clone()));
        }
        drop(pulse_tx);

        let mut outstanding: Vec<T> = Vec::new();
        let mut open = true;

        loop {
            if !open && outstanding.is_empty() {
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = cancelled(cancel) => return Err(RolloutError::Cancelled),

                task = tasks.recv(), if open => match task {
                    Some(task) => outstanding.push(task),
                    None => open = false,
                },

                Some(()) = pulse_rx.recv() => {
                    let round = std::mem::take(&mut outstanding);
                    trace!(outstanding = round.len(), "checking outstanding operations");
                    for task in round {
                        let pending = tokio::select! {
                            biased;
                            _ = cancelled(cancel) => return Err(RolloutError::Cancelled),
                            result = check(task) => result?,
                        };
                        outstanding.extend(pending);
                    }
                }
            }
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender
/// is gone without having cancelled.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn periodic(tick: Arc<dyn Backoff>, pulse: mpsc::Sender<()>) {
    let mut attempt: u32 = 0;
    loop {
        if let Err(mpsc::error::TrySendError::Closed(())) = pulse.try_send(()) {
            return;
        }
        tokio::time::sleep(tick.backoff(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn on_events(mut events: EventStream, pulse: mpsc::Sender<()>) {
    while let Some(event) = events.recv().await {
        let wake = match &event {
            ClusterEvent::Deploy(e) => e.stage.is_terminal(),
            ClusterEvent::Left(_) | ClusterEvent::Lagged(_) => true,
            ClusterEvent::Joined(_) | ClusterEvent::Updated(_) => false,
        };
        if !wake {
            continue;
        }
        debug!(?event, "event tickle");
        if let Err(mpsc::error::TrySendError::Closed(())) = pulse.try_send(()) {
            return;
        }
    }
}
