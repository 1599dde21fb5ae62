//! Simulated deployer for in-process fleets.
//!
//! Stands in for fetching and activating an archive: sleeps for a random
//! time and fails with a configurable probability.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use flotilla_rollout::{DeployContext, Deployer};

pub struct SimulatedDeployer {
    node: String,
    delay_ms: Range<u64>,
    fail_rate: f64,
}

impl SimulatedDeployer {
    pub fn new(node: impl Into<String>, delay: Range<Duration>, fail_rate: f64) -> Self {
        let start = u64::try_from(delay.start.as_millis())
            .unwrap_or(u64::MAX)
            .min(u64::MAX - 1);
        let end = u64::try_from(delay.end.as_millis())
            .unwrap_or(u64::MAX)
            .max(start + 1);
        Self {
            node: node.into(),
            delay_ms: start..end,
            fail_rate: fail_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Deployer for SimulatedDeployer {
    async fn deploy(&self, ctx: DeployContext) {
        let (delay, fails) = {
            let mut rng = rand::thread_rng();
            (
                Duration::from_millis(rng.gen_range(self.delay_ms.clone())),
                rng.gen_bool(self.fail_rate),
            )
        };
        debug!(node = %self.node, archive = %ctx.archive.id, ?delay, "simulating deploy");
        tokio::time::sleep(delay).await;

        if fails {
            let reason = format!("simulated failure fetching {}", ctx.archive.location);
            ctx.fail(reason);
        } else {
            ctx.complete();
        }
    }
}
