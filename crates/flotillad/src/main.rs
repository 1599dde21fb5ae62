//! flotillad — the Flotilla daemon.
//!
//! Assembles membership, per-node coordinators and the rollout controller
//! into one binary:
//! - Gossip membership (in-process network) with bootstrap
//! - Cached membership view for targeting
//! - Coordinators announcing deploy stages over gossip
//! - Batch rollout driven by timer and gossip wake-ups
//!
//! # Usage
//!
//! ```text
//! flotillad standalone --location oci://registry.example.com/team/api:v2 --fleet 5
//! flotillad owner tenant-42 --replicas 3 --config flotilla.toml
//! ```

mod owner;
mod simulate;
mod standalone;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use flotilla_core::FlotillaConfig;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla deployment daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Roll an archive out across an in-process fleet and print the summary.
    Standalone {
        /// Config file (TOML). Defaults to a single-node config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Archive location (oci://, https://, s3://, git://, file://).
        #[arg(long)]
        location: String,

        /// Number of nodes in the fleet, this node included.
        #[arg(long, default_value = "1")]
        fleet: u16,

        /// Only target peers whose name matches this pattern.
        #[arg(long)]
        only: Option<String>,

        /// Probability that a simulated deploy fails.
        #[arg(long, default_value = "0.0")]
        fail_rate: f64,
    },

    /// Print the peers responsible for a key.
    Owner {
        key: String,

        /// Config file (TOML); its seeds make up the peer list.
        #[arg(long)]
        config: Option<PathBuf>,

        /// How many owners to list, most responsible first.
        #[arg(long, default_value = "1")]
        replicas: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            location,
            fleet,
            only,
            fail_rate,
        } => {
            let config = load_config(config.as_deref())?;
            let summary =
                standalone::run_standalone(&config, &location, fleet, only.as_deref(), fail_rate)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success() {
                anyhow::bail!("rollout finished with {} failure(s)", summary.failures);
            }
            Ok(())
        }
        Command::Owner {
            key,
            config,
            replicas,
        } => {
            let config = load_config(config.as_deref())?;
            owner::print_owners(&config, &key, replicas);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,flotilla=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FlotillaConfig> {
    match path {
        Some(path) => {
            let config = FlotillaConfig::from_file(path)?;
            info!(path = %path.display(), node = %config.node.name, "config loaded");
            Ok(config)
        }
        None => Ok(FlotillaConfig::single_node(
            "flotilla-1",
            SocketAddr::from(([127, 0, 0, 1], 7946)),
        )),
    }
}
