//! Capability interface of the network emulation substrate
//!
//! The session never touches namespaces, veths or qdiscs directly. It asks a
//! [`Substrate`] to create and destroy hosts, switches and links and to run
//! processes on hosts, and keeps the returned handles for teardown.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use thiserror::Error;
use topology::{ImpairmentProfile, LaunchCommand};

#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    #[error("{kind} '{name}' is still in use: {reason}")]
    InUse {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Invalid interface name: {0}")]
    InvalidName(String),

    #[error("Insufficient permissions (CAP_NET_ADMIN required)")]
    Permission,

    #[error("Injected fault on {0}")]
    Injected(String),
}

/// A realized host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostHandle {
    pub name: String,
    pub address: Ipv4Addr,
    /// Substrate-level identity, e.g. the network namespace name
    pub namespace: String,
}

/// A realized switch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchHandle {
    pub name: String,
    pub namespace: String,
}

/// A realized link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkHandle {
    /// Position of the link in the topology definition
    pub index: usize,
    pub a: String,
    pub b: String,
    pub a_namespace: String,
    pub a_iface: String,
    pub b_namespace: String,
    pub b_iface: String,
}

impl LinkHandle {
    pub fn label(&self) -> String {
        format!("link #{} ({} <-> {})", self.index, self.a, self.b)
    }
}

/// A process started on a host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: u64,
    pub node: String,
    /// OS pids of the pipeline stages, when known
    pub pids: Vec<u32>,
}

/// Endpoint of a link request
#[derive(Clone, Copy, Debug)]
pub enum EndpointHandle<'a> {
    Host(&'a HostHandle),
    Switch(&'a SwitchHandle),
}

impl<'a> EndpointHandle<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            EndpointHandle::Host(h) => &h.name,
            EndpointHandle::Switch(s) => &s.name,
        }
    }

    pub fn namespace(&self) -> &'a str {
        match self {
            EndpointHandle::Host(h) => &h.namespace,
            EndpointHandle::Switch(s) => &s.namespace,
        }
    }
}

/// Everything needed to realize one link
#[derive(Clone, Copy, Debug)]
pub struct LinkRequest<'a> {
    pub index: usize,
    pub a: EndpointHandle<'a>,
    pub b: EndpointHandle<'a>,
    pub impairment: Option<&'a ImpairmentProfile>,
}

/// Output of a command run on a host on behalf of the operator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Operations the session needs from an emulation backend
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn create_host(&mut self, name: &str, address: Ipv4Addr) -> Result<HostHandle, SubstrateError>;

    async fn create_switch(&mut self, name: &str) -> Result<SwitchHandle, SubstrateError>;

    /// Connect two existing endpoints, applying `impairment` to both directions
    async fn create_link(&mut self, request: LinkRequest<'_>) -> Result<LinkHandle, SubstrateError>;

    /// Start `command` in the background on `host`; must not wait for exit
    async fn spawn(&mut self, host: &HostHandle, command: &LaunchCommand) -> Result<ProcessHandle, SubstrateError>;

    async fn kill(&mut self, process: &ProcessHandle) -> Result<(), SubstrateError>;

    async fn delete_link(&mut self, link: &LinkHandle) -> Result<(), SubstrateError>;

    async fn delete_switch(&mut self, switch: &SwitchHandle) -> Result<(), SubstrateError>;

    async fn delete_host(&mut self, host: &HostHandle) -> Result<(), SubstrateError>;

    /// Interfaces of `host` and what they connect to
    async fn connections(&self, host: &HostHandle) -> Result<Vec<String>, SubstrateError>;

    /// Run a short-lived command on `host` and collect its output
    async fn exec(&self, host: &HostHandle, program: &str, args: &[String]) -> Result<ExecOutput, SubstrateError>;
}
