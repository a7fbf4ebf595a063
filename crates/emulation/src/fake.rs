//! In-memory substrate for tests
//!
//! Tracks live hosts, switches, links and processes without touching the
//! system, records every operation as an [`Event`], and can fail the n-th
//! call of any operation. It also enforces the ordering rules a real
//! backend relies on: links need existing endpoints, and a host cannot be
//! deleted while a link or a process still references it.

use crate::substrate::{
    EndpointHandle, ExecOutput, HostHandle, LinkHandle, LinkRequest, ProcessHandle, Substrate,
    SubstrateError, SwitchHandle,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use topology::{ImpairmentProfile, LaunchCommand};
use tracing::debug;

/// Substrate operation, used for fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateHost,
    CreateSwitch,
    CreateLink,
    Spawn,
    Kill,
    DeleteLink,
    DeleteSwitch,
    DeleteHost,
    /// Read-only; once armed, every call fails
    Connections,
}

/// Successful operation, in call order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    HostCreated(String),
    SwitchCreated(String),
    LinkCreated(usize),
    ProcessSpawned(String),
    ProcessKilled(String),
    LinkDeleted(usize),
    SwitchDeleted(String),
    HostDeleted(String),
}

#[derive(Clone, Debug)]
struct FakeLink {
    a: String,
    b: String,
    impairment: Option<ImpairmentProfile>,
}

#[derive(Default)]
pub struct InMemorySubstrate {
    hosts: BTreeMap<String, Ipv4Addr>,
    switches: BTreeSet<String>,
    links: BTreeMap<usize, FakeLink>,
    processes: BTreeMap<u64, (String, LaunchCommand)>,
    next_process: u64,
    calls: HashMap<Operation, usize>,
    faults: HashMap<Operation, usize>,
    events: Vec<Event>,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` (1-based) call of `op`
    pub fn fail_on(mut self, op: Operation, nth: usize) -> Self {
        self.inject_fault(op, nth);
        self
    }

    pub fn inject_fault(&mut self, op: Operation, nth: usize) {
        self.faults.insert(op, nth);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn live_hosts(&self) -> Vec<&str> {
        self.hosts.keys().map(String::as_str).collect()
    }

    pub fn live_switches(&self) -> Vec<&str> {
        self.switches.iter().map(String::as_str).collect()
    }

    pub fn live_links(&self) -> Vec<usize> {
        self.links.keys().copied().collect()
    }

    /// Node names with a live process
    pub fn live_processes(&self) -> Vec<&str> {
        self.processes.values().map(|(node, _)| node.as_str()).collect()
    }

    /// Impairment applied to the live link at definition index `index`
    pub fn link_impairment(&self, index: usize) -> Option<&ImpairmentProfile> {
        self.links.get(&index).and_then(|l| l.impairment.as_ref())
    }

    /// Command launched for `node`, if it is running
    pub fn command_of(&self, node: &str) -> Option<&LaunchCommand> {
        self.processes
            .values()
            .find(|(n, _)| n == node)
            .map(|(_, cmd)| cmd)
    }

    /// Nothing is left alive
    pub fn is_clean(&self) -> bool {
        self.hosts.is_empty()
            && self.switches.is_empty()
            && self.links.is_empty()
            && self.processes.is_empty()
    }

    fn check(&mut self, op: Operation, target: &str) -> Result<(), SubstrateError> {
        let count = {
            let calls = self.calls.entry(op).or_insert(0);
            *calls += 1;
            *calls
        };
        if self.faults.get(&op) == Some(&count) {
            debug!(?op, target, "injecting fault");
            return Err(SubstrateError::Injected(format!("{:?} {}", op, target)));
        }
        Ok(())
    }

    fn endpoint_exists(&self, endpoint: &EndpointHandle<'_>) -> bool {
        match endpoint {
            EndpointHandle::Host(h) => self.hosts.contains_key(&h.name),
            EndpointHandle::Switch(s) => self.switches.contains(&s.name),
        }
    }
}

#[async_trait]
impl Substrate for InMemorySubstrate {
    async fn create_host(&mut self, name: &str, address: Ipv4Addr) -> Result<HostHandle, SubstrateError> {
        self.check(Operation::CreateHost, name)?;
        self.hosts.insert(name.to_string(), address);
        self.events.push(Event::HostCreated(name.to_string()));
        Ok(HostHandle {
            name: name.to_string(),
            address,
            namespace: name.to_string(),
        })
    }

    async fn create_switch(&mut self, name: &str) -> Result<SwitchHandle, SubstrateError> {
        self.check(Operation::CreateSwitch, name)?;
        self.switches.insert(name.to_string());
        self.events.push(Event::SwitchCreated(name.to_string()));
        Ok(SwitchHandle {
            name: name.to_string(),
            namespace: name.to_string(),
        })
    }

    async fn create_link(&mut self, request: LinkRequest<'_>) -> Result<LinkHandle, SubstrateError> {
        self.check(Operation::CreateLink, &request.index.to_string())?;
        for endpoint in [&request.a, &request.b] {
            if !self.endpoint_exists(endpoint) {
                return Err(SubstrateError::Unknown {
                    kind: "endpoint",
                    name: endpoint.name().to_string(),
                });
            }
        }

        self.links.insert(
            request.index,
            FakeLink {
                a: request.a.name().to_string(),
                b: request.b.name().to_string(),
                impairment: request.impairment.cloned(),
            },
        );
        self.events.push(Event::LinkCreated(request.index));
        Ok(LinkHandle {
            index: request.index,
            a: request.a.name().to_string(),
            b: request.b.name().to_string(),
            a_namespace: request.a.namespace().to_string(),
            a_iface: format!("{}-eth{}", request.a.name(), request.index),
            b_namespace: request.b.namespace().to_string(),
            b_iface: format!("{}-eth{}", request.b.name(), request.index),
        })
    }

    async fn spawn(&mut self, host: &HostHandle, command: &LaunchCommand) -> Result<ProcessHandle, SubstrateError> {
        self.check(Operation::Spawn, &host.name)?;
        if !self.hosts.contains_key(&host.name) {
            return Err(SubstrateError::Unknown {
                kind: "host",
                name: host.name.clone(),
            });
        }

        self.next_process += 1;
        let id = self.next_process;
        self.processes.insert(id, (host.name.clone(), command.clone()));
        self.events.push(Event::ProcessSpawned(host.name.clone()));
        Ok(ProcessHandle {
            id,
            node: host.name.clone(),
            pids: Vec::new(),
        })
    }

    async fn kill(&mut self, process: &ProcessHandle) -> Result<(), SubstrateError> {
        self.check(Operation::Kill, &process.node)?;
        if self.processes.remove(&process.id).is_none() {
            return Err(SubstrateError::Unknown {
                kind: "process",
                name: process.node.clone(),
            });
        }
        self.events.push(Event::ProcessKilled(process.node.clone()));
        Ok(())
    }

    async fn delete_link(&mut self, link: &LinkHandle) -> Result<(), SubstrateError> {
        self.check(Operation::DeleteLink, &link.index.to_string())?;
        if self.links.remove(&link.index).is_none() {
            return Err(SubstrateError::Unknown {
                kind: "link",
                name: link.label(),
            });
        }
        self.events.push(Event::LinkDeleted(link.index));
        Ok(())
    }

    async fn delete_switch(&mut self, switch: &SwitchHandle) -> Result<(), SubstrateError> {
        self.check(Operation::DeleteSwitch, &switch.name)?;
        if let Some(link) = self
            .links
            .values()
            .find(|l| l.a == switch.name || l.b == switch.name)
        {
            return Err(SubstrateError::InUse {
                kind: "switch",
                name: switch.name.clone(),
                reason: format!("linked to {}", if link.a == switch.name { &link.b } else { &link.a }),
            });
        }
        if !self.switches.remove(&switch.name) {
            return Err(SubstrateError::Unknown {
                kind: "switch",
                name: switch.name.clone(),
            });
        }
        self.events.push(Event::SwitchDeleted(switch.name.clone()));
        Ok(())
    }

    async fn delete_host(&mut self, host: &HostHandle) -> Result<(), SubstrateError> {
        self.check(Operation::DeleteHost, &host.name)?;
        if self.processes.values().any(|(node, _)| node == &host.name) {
            return Err(SubstrateError::InUse {
                kind: "host",
                name: host.name.clone(),
                reason: "process still running".to_string(),
            });
        }
        if self.links.values().any(|l| l.a == host.name || l.b == host.name) {
            return Err(SubstrateError::InUse {
                kind: "host",
                name: host.name.clone(),
                reason: "link still attached".to_string(),
            });
        }
        if self.hosts.remove(&host.name).is_none() {
            return Err(SubstrateError::Unknown {
                kind: "host",
                name: host.name.clone(),
            });
        }
        self.events.push(Event::HostDeleted(host.name.clone()));
        Ok(())
    }

    async fn connections(&self, host: &HostHandle) -> Result<Vec<String>, SubstrateError> {
        if self.faults.contains_key(&Operation::Connections) {
            return Err(SubstrateError::Injected(format!("Connections {}", host.name)));
        }
        if !self.hosts.contains_key(&host.name) {
            return Err(SubstrateError::Unknown {
                kind: "host",
                name: host.name.clone(),
            });
        }
        Ok(self
            .links
            .iter()
            .filter_map(|(index, l)| {
                if l.a == host.name {
                    Some(format!("{}-eth{}:{}", host.name, index, l.b))
                } else if l.b == host.name {
                    Some(format!("{}-eth{}:{}", host.name, index, l.a))
                } else {
                    None
                }
            })
            .collect())
    }

    async fn exec(&self, host: &HostHandle, program: &str, args: &[String]) -> Result<ExecOutput, SubstrateError> {
        if !self.hosts.contains_key(&host.name) {
            return Err(SubstrateError::Unknown {
                kind: "host",
                name: host.name.clone(),
            });
        }
        let mut line = vec![program.to_string()];
        line.extend(args.iter().cloned());
        Ok(ExecOutput {
            success: true,
            stdout: format!("{}: {}\n", host.name, line.join(" ")),
            stderr: String::new(),
        })
    }
}
