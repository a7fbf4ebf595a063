//! Relay failover testbench CLI
//!
//! Brings up the failover topology (API, directory, publisher, subscriber
//! and relays in network namespaces) with impaired delivery links, and
//! lets an operator poke at it until they exit.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cmd_cleanup, cmd_show, cmd_up, UpOptions};
use config::TopologyArgs;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Realize the topology, start every node and open the console
    Up {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Wait for Ctrl-C instead of reading console commands
        #[arg(long)]
        batch: bool,

        /// Namespace name prefix
        #[arg(long, default_value = "fb-")]
        prefix: String,

        /// Directory receiving per-node stdout/stderr logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Print the topology without touching the system
    Show {
        #[command(flatten)]
        topology: TopologyArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete namespaces left behind by an aborted run
    Cleanup {
        /// Namespace name prefix
        #[arg(long, default_value = "fb-")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Up {
            topology,
            batch,
            prefix,
            log_dir,
        } => {
            cmd_up(
                &topology,
                UpOptions {
                    batch,
                    prefix,
                    log_dir,
                },
            )
            .await?;
        }
        Commands::Show { topology, json } => {
            cmd_show(&topology, json).await?;
        }
        Commands::Cleanup { prefix } => {
            cmd_cleanup(&prefix).await?;
        }
    }

    Ok(())
}
