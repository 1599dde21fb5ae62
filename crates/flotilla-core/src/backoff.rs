//! Backoff strategies: pure `attempt → duration` functions.
//!
//! Strategies compose, so a capped exponential with jitter is just
//! `Jitter::new(max_jitter, Maximum::new(cap, Exponential::new(scale)))`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Maps a zero-based attempt number to the delay before the next attempt.
pub trait Backoff: Send + Sync + fmt::Debug {
    fn backoff(&self, attempt: u32) -> Duration;
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn backoff(&self, attempt: u32) -> Duration {
        (**self).backoff(attempt)
    }
}

impl<B: Backoff + ?Sized> Backoff for Arc<B> {
    fn backoff(&self, attempt: u32) -> Duration {
        (**self).backoff(attempt)
    }
}

/// The same delay for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant(pub Duration);

impl Backoff for Constant {
    fn backoff(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `scale · 2^attempt`, saturating at `Duration::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    scale: Duration,
}

impl Exponential {
    /// # Panics
    ///
    /// Panics if `scale` is zero; every attempt would collapse to no delay.
    pub fn new(scale: Duration) -> Self {
        assert!(!scale.is_zero(), "exponential backoff requires a non-zero scale");
        Self { scale }
    }
}

impl Backoff for Exponential {
    fn backoff(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.scale.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// Cycles through a fixed list of delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explicit {
    delays: Vec<Duration>,
}

impl Explicit {
    /// # Panics
    ///
    /// Panics if `delays` is empty.
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        let delays = delays.into();
        assert!(!delays.is_empty(), "explicit backoff requires at least one delay");
        Self { delays }
    }
}

impl Backoff for Explicit {
    fn backoff(&self, attempt: u32) -> Duration {
        self.delays[attempt as usize % self.delays.len()]
    }
}

/// Clamps another strategy to an upper bound.
#[derive(Debug, Clone)]
pub struct Maximum<B> {
    cap: Duration,
    inner: B,
}

impl<B: Backoff> Maximum<B> {
    pub fn new(cap: Duration, inner: B) -> Self {
        Self { cap, inner }
    }
}

impl<B: Backoff> Backoff for Maximum<B> {
    fn backoff(&self, attempt: u32) -> Duration {
        self.inner.backoff(attempt).min(self.cap)
    }
}

/// Adds a uniformly random delay in `[0, max)` on top of another strategy.
#[derive(Debug, Clone)]
pub struct Jitter<B> {
    max: Duration,
    inner: B,
}

impl<B: Backoff> Jitter<B> {
    pub fn new(max: Duration, inner: B) -> Self {
        Self { max, inner }
    }
}

impl<B: Backoff> Backoff for Jitter<B> {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.inner.backoff(attempt);
        let max_nanos = u64::try_from(self.max.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..max_nanos);
        base.saturating_add(Duration::from_nanos(jitter))
    }
}
