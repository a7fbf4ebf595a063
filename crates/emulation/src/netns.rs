//! Linux substrate built on network namespaces
//!
//! Every host and every switch is a network namespace named
//! `<prefix><name>`. A switch namespace holds a Linux bridge. Links are
//! veth pairs whose ends are moved into the endpoint namespaces:
//!
//! - host to switch: the host end carries the host address with the
//!   block prefix and the switch end is enslaved to the bridge;
//! - host to host: both ends carry a /32 and a /32 route to the peer, so
//!   parallel paths to different relays stay distinct.
//!
//! Impairment is applied with `tc` on both ends. Commands are run through
//! the `ip` and `tc` tools, so the process needs CAP_NET_ADMIN.

use crate::qdisc;
use crate::substrate::{
    EndpointHandle, ExecOutput, HostHandle, LinkHandle, LinkRequest, ProcessHandle, Substrate,
    SubstrateError, SwitchHandle,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::{Child, Command};
use topology::{ImpairmentProfile, LaunchCommand};
use tracing::{debug, info, warn};

/// Linux interface name limit (IFNAMSIZ - 1)
const MAX_IFACE_LEN: usize = 15;
/// Bridge device inside every switch namespace
const BRIDGE: &str = "br0";

#[derive(Clone, Debug)]
pub struct NetnsConfig {
    /// Prepended to host and switch names to form namespace names
    pub namespace_prefix: String,
    /// Prepended to veth names; keep it short
    pub interface_prefix: String,
    /// Prefix length of host addresses on switch-facing interfaces
    pub subnet_prefix: u8,
    /// When set, stdout/stderr of every process stage go to
    /// `<log_dir>/<host>.<stage>.log`; otherwise they are discarded
    pub log_dir: Option<PathBuf>,
}

impl Default for NetnsConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "fb-".to_string(),
            interface_prefix: "fb".to_string(),
            subnet_prefix: 24,
            log_dir: None,
        }
    }
}

pub struct NetnsSubstrate {
    config: NetnsConfig,
    children: HashMap<u64, Vec<Child>>,
    /// Interface name to peer endpoint, for the connection listing
    peers: HashMap<String, String>,
    next_process: u64,
}

impl NetnsSubstrate {
    pub fn new(config: NetnsConfig) -> Self {
        Self {
            config,
            children: HashMap::new(),
            peers: HashMap::new(),
            next_process: 0,
        }
    }

    /// Namespace and link manipulation requires root
    pub fn has_net_admin() -> bool {
        nix::unistd::geteuid().is_root()
    }

    pub fn namespace_for(&self, name: &str) -> String {
        format!("{}{}", self.config.namespace_prefix, name)
    }

    /// Veth names for the link at definition index `index`
    pub fn veth_names(&self, index: usize) -> Result<(String, String), SubstrateError> {
        let a = format!("{}l{}a", self.config.interface_prefix, index);
        let b = format!("{}l{}b", self.config.interface_prefix, index);
        for name in [&a, &b] {
            if name.len() > MAX_IFACE_LEN {
                return Err(SubstrateError::InvalidName(name.clone()));
            }
        }
        Ok((a, b))
    }

    /// Delete every namespace whose name starts with `prefix`, e.g. after
    /// an aborted run. Returns how many were removed.
    pub async fn cleanup_stale(prefix: &str) -> Result<usize, SubstrateError> {
        let output = run_checked("ip", &["netns", "list"]).await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        let mut cleaned = 0;

        for name in listing.lines().filter_map(|l| l.split_whitespace().next()) {
            if !name.starts_with(prefix) {
                continue;
            }
            match run_checked("ip", &["netns", "del", name]).await {
                Ok(_) => {
                    info!("Deleted stale namespace: {}", name);
                    cleaned += 1;
                }
                Err(e) => warn!("Failed to delete stale namespace {}: {}", name, e),
            }
        }

        Ok(cleaned)
    }

    async fn create_namespace(&self, ns: &str) -> Result<(), SubstrateError> {
        // Clean up stale namespace with same name (idempotent)
        let _ = run("ip", &["netns", "del", ns]).await;
        run_checked("ip", &["netns", "add", ns]).await?;
        Ok(())
    }

    async fn configure_link(
        &self,
        request: &LinkRequest<'_>,
        a_iface: &str,
        b_iface: &str,
    ) -> Result<(), SubstrateError> {
        let a_ns = request.a.namespace();
        let b_ns = request.b.namespace();

        run_checked("ip", &["link", "set", "dev", a_iface, "netns", a_ns]).await?;
        run_checked("ip", &["link", "set", "dev", b_iface, "netns", b_ns]).await?;

        self.configure_end(request.a, request.b, a_iface).await?;
        self.configure_end(request.b, request.a, b_iface).await?;

        if let Some(profile) = request.impairment {
            apply_impairment(a_ns, a_iface, profile).await?;
            apply_impairment(b_ns, b_iface, profile).await?;
        }
        Ok(())
    }

    async fn configure_end(
        &self,
        this: EndpointHandle<'_>,
        peer: EndpointHandle<'_>,
        iface: &str,
    ) -> Result<(), SubstrateError> {
        let ns = this.namespace();
        match (this, peer) {
            (EndpointHandle::Switch(_), _) => {
                run_checked("ip", &["-n", ns, "link", "set", "dev", iface, "master", BRIDGE]).await?;
            }
            (EndpointHandle::Host(host), EndpointHandle::Switch(_)) => {
                let cidr = format!("{}/{}", host.address, self.config.subnet_prefix);
                run_checked("ip", &["-n", ns, "addr", "add", &cidr, "dev", iface]).await?;
            }
            (EndpointHandle::Host(host), EndpointHandle::Host(_)) => {
                let cidr = format!("{}/32", host.address);
                run_checked("ip", &["-n", ns, "addr", "add", &cidr, "dev", iface]).await?;
            }
        }

        run_checked("ip", &["-n", ns, "link", "set", "dev", iface, "up"]).await?;

        if let (EndpointHandle::Host(_), EndpointHandle::Host(peer_host)) = (this, peer) {
            let route = format!("{}/32", peer_host.address);
            run_checked("ip", &["-n", ns, "route", "replace", &route, "dev", iface]).await?;
        }
        Ok(())
    }

    fn stage_output(&self, host: &str, stage: usize) -> Result<Stdio, SubstrateError> {
        match &self.config.log_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.{}.log", host, stage));
                let file = File::options().create(true).append(true).open(path)?;
                Ok(Stdio::from(file))
            }
            None => Ok(Stdio::null()),
        }
    }
}

#[async_trait]
impl Substrate for NetnsSubstrate {
    async fn create_host(&mut self, name: &str, address: Ipv4Addr) -> Result<HostHandle, SubstrateError> {
        let ns = self.namespace_for(name);
        self.create_namespace(&ns).await?;

        if let Err(e) = run_checked("ip", &["-n", &ns, "link", "set", "dev", "lo", "up"]).await {
            let _ = run("ip", &["netns", "del", &ns]).await;
            return Err(e);
        }

        info!(host = name, namespace = %ns, %address, "created host");
        Ok(HostHandle {
            name: name.to_string(),
            address,
            namespace: ns,
        })
    }

    async fn create_switch(&mut self, name: &str) -> Result<SwitchHandle, SubstrateError> {
        let ns = self.namespace_for(name);
        self.create_namespace(&ns).await?;

        let bridge = async {
            run_checked("ip", &["-n", &ns, "link", "add", BRIDGE, "type", "bridge"]).await?;
            run_checked("ip", &["-n", &ns, "link", "set", "dev", BRIDGE, "up"]).await
        };
        if let Err(e) = bridge.await {
            let _ = run("ip", &["netns", "del", &ns]).await;
            return Err(e);
        }

        info!(switch = name, namespace = %ns, "created switch");
        Ok(SwitchHandle {
            name: name.to_string(),
            namespace: ns,
        })
    }

    async fn create_link(&mut self, request: LinkRequest<'_>) -> Result<LinkHandle, SubstrateError> {
        let (a_iface, b_iface) = self.veth_names(request.index)?;

        // Clean up stale veth (idempotent)
        let _ = run("ip", &["link", "del", &a_iface]).await;

        run_checked(
            "ip",
            &["link", "add", &a_iface, "type", "veth", "peer", "name", &b_iface],
        )
        .await?;
        debug!(local = %a_iface, peer = %b_iface, "created veth pair");

        if let Err(e) = self.configure_link(&request, &a_iface, &b_iface).await {
            // The pair is either still in the root namespace or already
            // moved; deleting one end removes both
            let _ = run("ip", &["link", "del", &a_iface]).await;
            let _ = run("ip", &["-n", request.a.namespace(), "link", "del", &a_iface]).await;
            return Err(e);
        }

        self.peers.insert(a_iface.clone(), request.b.name().to_string());
        self.peers.insert(b_iface.clone(), request.a.name().to_string());

        info!(
            index = request.index,
            a = request.a.name(),
            b = request.b.name(),
            impairment = %request.impairment.map(|p| p.to_string()).unwrap_or_else(|| "ideal".to_string()),
            "created link"
        );

        Ok(LinkHandle {
            index: request.index,
            a: request.a.name().to_string(),
            b: request.b.name().to_string(),
            a_namespace: request.a.namespace().to_string(),
            a_iface,
            b_namespace: request.b.namespace().to_string(),
            b_iface,
        })
    }

    async fn spawn(&mut self, host: &HostHandle, command: &LaunchCommand) -> Result<ProcessHandle, SubstrateError> {
        let stages = command.stages();
        for stage in stages {
            if !program_exists(stage.program()) {
                return Err(SubstrateError::Unknown {
                    kind: "program",
                    name: stage.program().to_string(),
                });
            }
        }

        let mut children: Vec<Child> = Vec::with_capacity(stages.len());
        let mut upstream: Option<Stdio> = None;

        for (i, stage) in stages.iter().enumerate() {
            let last = i + 1 == stages.len();

            let mut cmd = Command::new("ip");
            cmd.args(["netns", "exec", host.namespace.as_str(), stage.program()])
                .args(stage.get_args())
                .envs(stage.get_env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(upstream.take().unwrap_or_else(Stdio::null))
                .stderr(self.stage_output(&host.name, i)?)
                .kill_on_drop(true);
            if last {
                cmd.stdout(self.stage_output(&host.name, i)?);
            } else {
                cmd.stdout(Stdio::piped());
            }

            // Children already started are killed on drop if this fails
            let mut child = cmd.spawn()?;
            if !last {
                let stdout = child.stdout.take().ok_or_else(|| {
                    SubstrateError::Io(std::io::Error::other("stage stdout was not captured"))
                })?;
                upstream = Some(stdout.try_into()?);
            }
            children.push(child);
        }

        self.next_process += 1;
        let id = self.next_process;
        let pids = children.iter().filter_map(Child::id).collect::<Vec<_>>();
        self.children.insert(id, children);

        info!(host = %host.name, ?pids, command = %command, "started process");
        Ok(ProcessHandle {
            id,
            node: host.name.clone(),
            pids,
        })
    }

    async fn kill(&mut self, process: &ProcessHandle) -> Result<(), SubstrateError> {
        let children = self
            .children
            .remove(&process.id)
            .ok_or_else(|| SubstrateError::Unknown {
                kind: "process",
                name: process.node.clone(),
            })?;

        let mut first_error = None;
        for mut child in children {
            if let Err(e) = child.kill().await {
                warn!(node = %process.node, "Failed to kill stage: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                debug!(node = %process.node, "stopped process");
                Ok(())
            }
        }
    }

    async fn delete_link(&mut self, link: &LinkHandle) -> Result<(), SubstrateError> {
        run_checked("ip", &["-n", &link.a_namespace, "link", "del", "dev", &link.a_iface]).await?;
        self.peers.remove(&link.a_iface);
        self.peers.remove(&link.b_iface);
        debug!("Deleted {}", link.label());
        Ok(())
    }

    async fn delete_switch(&mut self, switch: &SwitchHandle) -> Result<(), SubstrateError> {
        run_checked("ip", &["netns", "del", &switch.namespace]).await?;
        debug!(switch = %switch.name, "deleted switch");
        Ok(())
    }

    async fn delete_host(&mut self, host: &HostHandle) -> Result<(), SubstrateError> {
        run_checked("ip", &["netns", "del", &host.namespace]).await?;
        debug!(host = %host.name, "deleted host");
        Ok(())
    }

    async fn connections(&self, host: &HostHandle) -> Result<Vec<String>, SubstrateError> {
        let output = run_checked("ip", &["-n", &host.namespace, "-o", "link", "show"]).await?;
        let listing = String::from_utf8_lossy(&output.stdout);

        Ok(parse_link_names(&listing)
            .into_iter()
            .filter(|name| name != "lo")
            .map(|name| match self.peers.get(&name) {
                Some(peer) => format!("{}:{}", name, peer),
                None => name,
            })
            .collect())
    }

    async fn exec(&self, host: &HostHandle, program: &str, args: &[String]) -> Result<ExecOutput, SubstrateError> {
        let output = Command::new("ip")
            .args(["netns", "exec", host.namespace.as_str(), program])
            .args(args)
            .output()
            .await?;
        Ok(ExecOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

async fn apply_impairment(ns: &str, iface: &str, profile: &ImpairmentProfile) -> Result<(), SubstrateError> {
    for tc_args in qdisc::impairment_commands(iface, profile) {
        let mut args = vec!["netns", "exec", ns, "tc"];
        args.extend(tc_args.iter().map(String::as_str));
        run_checked("ip", &args).await?;
    }
    debug!(ns, iface, %profile, "applied impairment");
    Ok(())
}

/// Run `<program> <args>`, returning raw output
async fn run(program: &str, args: &[&str]) -> Result<Output, SubstrateError> {
    debug!("Running: {} {}", program, args.join(" "));
    Ok(Command::new(program).args(args).output().await?)
}

/// Run `<program> <args>`, failing with stderr if it exits non-zero
async fn run_checked(program: &str, args: &[&str]) -> Result<Output, SubstrateError> {
    let output = run(program, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("Operation not permitted") {
            return Err(SubstrateError::Permission);
        }
        return Err(SubstrateError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr,
        });
    }
    Ok(output)
}

/// Interface names from `ip -o link show` output
fn parse_link_names(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split(": ").nth(1))
        .map(|field| field.split('@').next().unwrap_or(field).trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Whether `program` names an existing file or is found on `PATH`
fn program_exists(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
