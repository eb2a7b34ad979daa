//! stratad: Strata planner binary.
//!
//! Runs placement passes for the instance group described in a
//! `strata.toml` and reserves the resulting addresses in the local store.
//!
//! # Usage
//!
//! ```text
//! stratad init --path strata.toml
//! stratad plan --config strata.toml --apply
//! stratad addresses --config strata.toml default
//! stratad release --config strata.toml default 10.0.1.10
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stratad", about = "Strata address and placement planner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a scaffold strata.toml.
    Init {
        #[arg(short, long, default_value = "strata.toml")]
        path: PathBuf,
        /// Instance group name.
        #[arg(long, default_value = "web")]
        group: String,
        #[arg(long, default_value = "4")]
        instances: u32,
    },
    /// Place the instance group and print the plan as JSON.
    Plan {
        #[arg(short, long, default_value = "strata.toml")]
        config: PathBuf,
        /// Data directory for the address store.
        #[arg(long, default_value = "/var/lib/strata")]
        data_dir: PathBuf,
        /// Reserve every planned address and release obsolete ones.
        #[arg(long)]
        apply: bool,
    },
    /// List the reserved addresses of a network.
    Addresses {
        #[arg(short, long, default_value = "strata.toml")]
        config: PathBuf,
        #[arg(long, default_value = "/var/lib/strata")]
        data_dir: PathBuf,
        network: String,
    },
    /// Release one address.
    Release {
        #[arg(short, long, default_value = "strata.toml")]
        config: PathBuf,
        #[arg(long, default_value = "/var/lib/strata")]
        data_dir: PathBuf,
        network: String,
        address: IpAddr,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info,stratad=debug,strata=debug"))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init { path, group, instances } => commands::init::run(&path, &group, instances),
        Command::Plan {
            config,
            data_dir,
            apply,
        } => commands::plan::run(&config, &data_dir, apply),
        Command::Addresses {
            config,
            data_dir,
            network,
        } => commands::addresses::list(&config, &data_dir, &network),
        Command::Release {
            config,
            data_dir,
            network,
            address,
        } => commands::addresses::release(&config, &data_dir, &network, address),
    }
}
