//! Operators drive a running session
//!
//! An [`Operator`] receives a [`SessionView`] once every node is up and
//! returns when it is done; the session is torn down afterwards. The
//! console reads commands line by line from any async reader, so the CLI
//! wires it to stdin and tests feed it a byte slice.

use crate::session::Inventory;
use crate::substrate::{ExecOutput, HostHandle, Substrate, SubstrateError};
use crate::{Result, SessionError};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, Stdout,
};
use tokio::sync::mpsc;
use topology::{HostConnections, Topology};
use tracing::{debug, info};

/// Read-only access to a running session
#[derive(Clone, Copy)]
pub struct SessionView<'a> {
    topology: &'a Topology,
    inventory: &'a Inventory,
    substrate: &'a dyn Substrate,
}

impl<'a> SessionView<'a> {
    pub fn new(topology: &'a Topology, inventory: &'a Inventory, substrate: &'a dyn Substrate) -> Self {
        Self {
            topology,
            inventory,
            substrate,
        }
    }

    pub fn topology(&self) -> &'a Topology {
        self.topology
    }

    pub fn inventory(&self) -> &'a Inventory {
        self.inventory
    }

    fn host(&self, name: &str) -> Result<&'a HostHandle> {
        self.inventory.host(name).ok_or_else(|| {
            SessionError::Substrate(SubstrateError::Unknown {
                kind: "host",
                name: name.to_string(),
            })
        })
    }

    /// Interfaces of every realized host, in definition order
    pub async fn connections(&self) -> Result<Vec<HostConnections>> {
        let mut listing = Vec::with_capacity(self.inventory.hosts.len());
        for host in &self.inventory.hosts {
            listing.push(HostConnections {
                host: host.name.clone(),
                peers: self.substrate.connections(host).await?,
            });
        }
        Ok(listing)
    }

    /// Run a short command on a host
    pub async fn exec(&self, host: &str, program: &str, args: &[String]) -> Result<ExecOutput> {
        let handle = self.host(host)?;
        debug!(host, program, "exec");
        Ok(self.substrate.exec(handle, program, args).await?)
    }
}

#[async_trait]
pub trait Operator: Send {
    async fn operate(&mut self, view: SessionView<'_>) -> Result<()>;
}

/// Blocks until Ctrl-C; used for unattended runs
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitForSignal;

#[async_trait]
impl Operator for WaitForSignal {
    async fn operate(&mut self, view: SessionView<'_>) -> Result<()> {
        info!(
            hosts = view.inventory().hosts.len(),
            "topology is up, press Ctrl-C to stop"
        );
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C");
        Ok(())
    }
}

/// Parsed console input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Nodes,
    Links,
    Net,
    Dump,
    Exec {
        host: String,
        program: String,
        args: Vec<String>,
    },
    Exit,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };

        let command = match head {
            "help" | "?" => ConsoleCommand::Help,
            "nodes" => ConsoleCommand::Nodes,
            "links" => ConsoleCommand::Links,
            "net" => ConsoleCommand::Net,
            "dump" => ConsoleCommand::Dump,
            "exit" | "quit" => ConsoleCommand::Exit,
            "exec" => {
                let (Some(host), Some(program)) = (words.next(), words.next()) else {
                    return Err("usage: exec <host> <program> [args..]".to_string());
                };
                ConsoleCommand::Exec {
                    host: host.to_string(),
                    program: program.to_string(),
                    args: words.map(str::to_string).collect(),
                }
            }
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(Some(command))
    }
}

const HELP: &str = "\
commands:
  nodes                        list hosts with role and address
  links                        list links with their impairment
  net                          show the interfaces of every host
  dump                         show hosts with their running process
  exec <host> <program> [args] run a command inside a host
  exit | quit                  stop the topology
";

/// Line-oriented operator console
pub struct Console<R, W> {
    reader: R,
    writer: W,
    prompt: String,
}

impl Console<BufReader<DuplexStream>, Stdout> {
    /// Console on the process's stdin and stdout. Must be called inside a
    /// tokio runtime.
    pub fn stdio() -> Self {
        let stdin = std::io::BufReader::new(std::io::stdin());
        Self::new(line_reader(stdin), tokio::io::stdout())
    }
}

/// Read `input` line by line on a dedicated OS thread.
///
/// A blocking read parked on that thread does not hold up runtime shutdown,
/// so the process can exit while the terminal is still waiting for input.
/// Must be called inside a tokio runtime.
pub fn line_reader<I>(input: I) -> BufReader<DuplexStream>
where
    I: std::io::BufRead + Send + 'static,
{
    let (lines_tx, mut lines_rx) = mpsc::channel::<String>(16);
    let (mut writer, reader) = tokio::io::duplex(4096);

    std::thread::spawn(move || {
        for line in std::io::BufRead::lines(input) {
            let Ok(line) = line else { break };
            if lines_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(mut line) = lines_rx.recv().await {
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        debug!("console input closed");
    });

    BufReader::new(reader)
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            prompt: "failover> ".to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Returns false once the operator asked to leave
    async fn run(&mut self, command: ConsoleCommand, view: &SessionView<'_>) -> Result<bool> {
        match command {
            ConsoleCommand::Help => self.say(HELP).await?,
            ConsoleCommand::Nodes => {
                let mut out = String::new();
                for node in view.topology().nodes() {
                    out.push_str(&format!(
                        "{:<8} {:<10} {}\n",
                        node.name(),
                        node.role().to_string(),
                        node.address()
                    ));
                }
                self.say(&out).await?;
            }
            ConsoleCommand::Links => {
                let mut out = String::new();
                for (index, link) in view.topology().links().iter().enumerate() {
                    out.push_str(&format!("#{} {}\n", index, link));
                }
                self.say(&out).await?;
            }
            ConsoleCommand::Net => {
                let mut out = String::new();
                for entry in view.connections().await? {
                    out.push_str(&format!("{}: {}\n", entry.host, entry.peers.join(" ")));
                }
                self.say(&out).await?;
            }
            ConsoleCommand::Dump => {
                let mut out = String::new();
                for host in &view.inventory().hosts {
                    let pids = view
                        .inventory()
                        .process_of(&host.name)
                        .map(|p| p.pids.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
                        .unwrap_or_else(|| "-".to_string());
                    out.push_str(&format!(
                        "<Host {}: {} ns={} pid={}>\n",
                        host.name, host.address, host.namespace, pids
                    ));
                }
                self.say(&out).await?;
            }
            ConsoleCommand::Exec { host, program, args } => match view.exec(&host, &program, &args).await {
                Ok(output) => {
                    self.say(&output.stdout).await?;
                    self.say(&output.stderr).await?;
                    if !output.success {
                        self.say(&format!("{} exited with failure\n", program)).await?;
                    }
                }
                Err(e) => self.say(&format!("error: {}\n", e)).await?,
            },
            ConsoleCommand::Exit => return Ok(false),
        }
        Ok(true)
    }
}

#[async_trait]
impl<R, W> Operator for Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn operate(&mut self, view: SessionView<'_>) -> Result<()> {
        let mut line = String::new();
        loop {
            let prompt = self.prompt.clone();
            self.say(&prompt).await?;
            self.writer.flush().await?;

            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                // EOF behaves like exit
                self.say("\n").await?;
                break;
            }

            match ConsoleCommand::parse(&line) {
                Ok(None) => continue,
                Ok(Some(command)) => {
                    if !self.run(command, &view).await? {
                        break;
                    }
                }
                Err(message) => self.say(&format!("{}\n", message)).await?,
            }
        }
        self.writer.flush().await?;
        Ok(())
    }
}
