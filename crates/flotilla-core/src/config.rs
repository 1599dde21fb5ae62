//! flotilla.toml configuration parser.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::{Backoff, Constant, Explicit, Exponential, Jitter, Maximum};
use crate::types::{Concurrency, DeployOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlotillaConfig {
    pub node: NodeConfig,
    pub peering: Option<PeeringConfig>,
    pub membership: Option<MembershipConfig>,
    pub rollout: Option<RolloutConfig>,
    pub monitor: Option<MonitorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable identity; also the rendezvous hashing key.
    pub name: String,
    pub bind: SocketAddr,
    /// Keep running when no peer could be joined.
    pub single_node: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    pub seeds: Vec<SocketAddr>,
    pub join_attempts: Option<u32>,
    pub join_backoff: Option<BackoffConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    pub cache_ttl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub concurrency: Option<Concurrency>,
    pub poll_interval: Option<String>,
    pub timeout: Option<String>,
    pub ignore_failures: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Spacing of the periodic health-check tickler.
    pub tick: Option<BackoffConfig>,
}

/// A backoff strategy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Constant {
        delay: String,
    },
    Exponential {
        scale: String,
        max: Option<String>,
        jitter: Option<String>,
    },
    Explicit {
        delays: Vec<String>,
    },
}

impl BackoffConfig {
    pub fn build(&self) -> ConfigResult<Box<dyn Backoff>> {
        match self {
            BackoffConfig::Constant { delay } => {
                let delay = duration_field("backoff.delay", delay)?;
                if delay.is_zero() {
                    return Err(ConfigError::Invalid("backoff.delay must be non-zero".into()));
                }
                Ok(Box::new(Constant(delay)))
            }
            BackoffConfig::Exponential { scale, max, jitter } => {
                let scale = duration_field("backoff.scale", scale)?;
                if scale.is_zero() {
                    return Err(ConfigError::Invalid("backoff.scale must be non-zero".into()));
                }
                let cap = match max {
                    Some(max) => duration_field("backoff.max", max)?,
                    None => Duration::MAX,
                };
                let jitter = match jitter {
                    Some(jitter) => duration_field("backoff.jitter", jitter)?,
                    None => Duration::ZERO,
                };
                Ok(Box::new(Jitter::new(
                    jitter,
                    Maximum::new(cap, Exponential::new(scale)),
                )))
            }
            BackoffConfig::Explicit { delays } => {
                if delays.is_empty() {
                    return Err(ConfigError::Invalid("backoff.delays must not be empty".into()));
                }
                let delays = delays
                    .iter()
                    .map(|d| duration_field("backoff.delays", d))
                    .collect::<ConfigResult<Vec<_>>>()?;
                if delays.iter().any(Duration::is_zero) {
                    return Err(ConfigError::Invalid("backoff.delays must all be non-zero".into()));
                }
                Ok(Box::new(Explicit::new(delays)))
            }
        }
    }
}

impl FlotillaConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: FlotillaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config for a node with no seeds.
    pub fn single_node(name: &str, bind: SocketAddr) -> Self {
        FlotillaConfig {
            node: NodeConfig {
                name: name.to_string(),
                bind,
                single_node: Some(true),
            },
            peering: None,
            membership: None,
            rollout: None,
            monitor: None,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node.name.trim().is_empty() {
            return Err(ConfigError::Invalid("node.name must not be empty".into()));
        }
        if self.cache_ttl()?.is_zero() {
            return Err(ConfigError::Invalid("membership.cache_ttl must be non-zero".into()));
        }
        if self.poll_interval()?.is_zero() {
            return Err(ConfigError::Invalid("rollout.poll_interval must be non-zero".into()));
        }
        let options = self.deploy_options()?;
        if options.timeout.is_zero() {
            return Err(ConfigError::Invalid("rollout.timeout must be non-zero".into()));
        }
        if let Concurrency::Percent(p) = options.concurrency {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "rollout.concurrency percent must be in (0, 1], got {p}"
                )));
            }
        }
        self.join_backoff()?;
        self.tick_backoff()?;
        Ok(())
    }

    pub fn single_node_enabled(&self) -> bool {
        self.node.single_node.unwrap_or(false)
    }

    pub fn seeds(&self) -> &[SocketAddr] {
        self.peering.as_ref().map(|p| p.seeds.as_slice()).unwrap_or_default()
    }

    pub fn join_attempts(&self) -> u32 {
        self.peering
            .as_ref()
            .and_then(|p| p.join_attempts)
            .unwrap_or(3)
            .max(1)
    }

    pub fn join_backoff(&self) -> ConfigResult<Box<dyn Backoff>> {
        match self.peering.as_ref().and_then(|p| p.join_backoff.as_ref()) {
            Some(cfg) => cfg.build(),
            None => Ok(Box::new(Maximum::new(
                Duration::from_secs(10),
                Exponential::new(Duration::from_millis(500)),
            ))),
        }
    }

    pub fn cache_ttl(&self) -> ConfigResult<Duration> {
        match self.membership.as_ref().and_then(|m| m.cache_ttl.as_deref()) {
            Some(ttl) => duration_field("membership.cache_ttl", ttl),
            None => Ok(Duration::from_secs(1)),
        }
    }

    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        match self.rollout.as_ref().and_then(|r| r.poll_interval.as_deref()) {
            Some(interval) => duration_field("rollout.poll_interval", interval),
            None => Ok(Duration::from_secs(1)),
        }
    }

    pub fn deploy_options(&self) -> ConfigResult<DeployOptions> {
        let mut options = DeployOptions::default();
        if let Some(rollout) = &self.rollout {
            if let Some(concurrency) = rollout.concurrency {
                options.concurrency = concurrency;
            }
            if let Some(timeout) = &rollout.timeout {
                options.timeout = duration_field("rollout.timeout", timeout)?;
            }
            if let Some(ignore) = rollout.ignore_failures {
                options.ignore_failures = ignore;
            }
        }
        Ok(options)
    }

    /// Periodic tickler spacing; defaults to the rollout poll interval.
    pub fn tick_backoff(&self) -> ConfigResult<Box<dyn Backoff>> {
        match self.monitor.as_ref().and_then(|m| m.tick.as_ref()) {
            Some(cfg) => cfg.build(),
            None => Ok(Box::new(Constant(self.poll_interval()?))),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
