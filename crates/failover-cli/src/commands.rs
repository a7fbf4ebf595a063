//! CLI command implementations for the failover testbench

use crate::config::{BenchConfig, TopologyArgs};
use anyhow::{bail, Result};
use emulation::{
    Console, EmulationSession, NetnsConfig, NetnsSubstrate, Operator, Substrate, WaitForSignal,
};
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::signal;
use topology::Topology;
use tracing::{error, info, warn};

/// Options of the 'up' command that are not about the topology itself
#[derive(Clone, Debug, Default)]
pub struct UpOptions {
    /// Wait for Ctrl-C instead of reading console commands
    pub batch: bool,
    pub prefix: String,
    pub log_dir: Option<PathBuf>,
}

/// Implementation of the 'up' command - realizes the topology, starts every
/// node and hands control to the operator until exit or Ctrl-C
pub async fn cmd_up(args: &TopologyArgs, options: UpOptions) -> Result<()> {
    let topology = build_topology(args)?;

    if !NetnsSubstrate::has_net_admin() {
        bail!("The 'up' command needs root (CAP_NET_ADMIN) to create network namespaces");
    }
    if let Some(dir) = &options.log_dir {
        std::fs::create_dir_all(dir)?;
    }

    let substrate = NetnsSubstrate::new(NetnsConfig {
        namespace_prefix: options.prefix.clone(),
        log_dir: options.log_dir.clone(),
        ..Default::default()
    });
    let mut session = EmulationSession::new(topology, substrate);

    if options.batch {
        run_session(&mut session, &mut WaitForSignal).await
    } else {
        println!("Type 'help' for commands, 'exit' to stop");
        run_session(&mut session, &mut Console::stdio()).await
    }
}

/// Start the session, hand it to `operator` and always tear it down
async fn run_session<S, O>(session: &mut EmulationSession<S>, operator: &mut O) -> Result<()>
where
    S: Substrate,
    O: Operator,
{
    info!("Starting failover topology");
    session.start().await?;

    match session.connections().await {
        Ok(entries) => {
            for entry in entries {
                info!("{}: {}", entry.host, entry.peers.join(" "));
            }
        }
        Err(e) => warn!("Failed to list connections: {}", e),
    }

    let operated = operate(session, operator).await;

    let stopped = session.stop().await;
    if let Err(e) = &stopped {
        error!("{}", e);
    } else {
        info!("Topology torn down");
    }

    operated?;
    stopped?;
    Ok(())
}

/// Run the operator; Ctrl-C ends it early
async fn operate<S, O>(session: &mut EmulationSession<S>, operator: &mut O) -> Result<()>
where
    S: Substrate,
    O: Operator,
{
    tokio::select! {
        result = session.interact(operator) => result?,
        _ = signal::ctrl_c() => {
            info!("Interrupted by user");
        }
    }
    Ok(())
}

/// Implementation of the 'show' command - prints the topology without
/// touching the system
pub async fn cmd_show(args: &TopologyArgs, json: bool) -> Result<()> {
    let topology = build_topology(args)?;
    if json {
        println!("{}", topology.to_json()?);
    } else {
        print!("{}", render(&topology));
    }
    Ok(())
}

/// Implementation of the 'cleanup' command - removes namespaces left over
/// from an aborted run
pub async fn cmd_cleanup(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("Refusing to clean up with an empty namespace prefix");
    }
    if !NetnsSubstrate::has_net_admin() {
        bail!("The 'cleanup' command needs root (CAP_NET_ADMIN) to delete network namespaces");
    }

    let removed = NetnsSubstrate::cleanup_stale(prefix).await?;
    if removed == 0 {
        warn!("No namespaces matching '{}*' found", prefix);
    }
    println!("Removed {} stale namespace(s)", removed);
    Ok(())
}

fn build_topology(args: &TopologyArgs) -> Result<Topology> {
    let config = BenchConfig::resolve(args)?;
    let topology = config.builder()?.build()?;
    Ok(topology)
}

/// Human-readable topology listing
fn render(topology: &Topology) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Topology {}", topology.block());

    let _ = writeln!(out, "\nNodes:");
    for node in topology.nodes() {
        let _ = writeln!(
            out,
            "  {:<8} {:<10} {:<15} {}",
            node.name(),
            node.role().to_string(),
            node.address().to_string(),
            node.command()
        );
    }

    let _ = writeln!(out, "\nSwitches:");
    for switch in topology.switches() {
        let _ = writeln!(out, "  {}", switch);
    }

    let _ = writeln!(out, "\nLinks:");
    for (index, link) in topology.links().iter().enumerate() {
        let _ = writeln!(out, "  #{} {}", index, link);
    }
    out
}
