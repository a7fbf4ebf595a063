//! Lifecycle of one emulated topology
//!
//! ```text
//!   Built --realize--> Running --attach_processes--> Interactive
//!     |                   |                              |
//!     |                   +------------ stop ------------+--> Stopped
//!     +-- stop (no-op)
//! ```
//!
//! Any failure while realizing or attaching tears down what was already
//! created and leaves the session `Stopped`; the caller sees the original
//! error. Teardown order is processes, links (reverse), switches, hosts
//! (reverse), and every resource is attempted even when an earlier one
//! fails. A host or switch that still holds a live process or link is kept
//! and reported instead of deleted.

use crate::launcher::ProcessLauncher;
use crate::operator::{Operator, SessionView};
use crate::substrate::{
    EndpointHandle, HostHandle, LinkHandle, LinkRequest, ProcessHandle, Substrate, SubstrateError,
    SwitchHandle,
};
use crate::{Result, SessionError, TeardownError};
use std::collections::BTreeMap;
use std::fmt;
use topology::{Endpoint, HostConnections, Topology};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Built,
    Running,
    Interactive,
    Stopped,
}

impl SessionState {
    /// Whether substrate resources may be alive
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Interactive)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Built => "built",
            SessionState::Running => "running",
            SessionState::Interactive => "interactive",
            SessionState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Everything realized so far, in creation order
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    pub hosts: Vec<HostHandle>,
    pub switches: Vec<SwitchHandle>,
    pub links: Vec<LinkHandle>,
    pub processes: Vec<ProcessHandle>,
}

impl Inventory {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.switches.is_empty()
            && self.links.is_empty()
            && self.processes.is_empty()
    }

    pub fn host(&self, name: &str) -> Option<&HostHandle> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn process_of(&self, node: &str) -> Option<&ProcessHandle> {
        self.processes.iter().find(|p| p.node == node)
    }

    fn endpoint(&self, endpoint: &Endpoint) -> Option<EndpointHandle<'_>> {
        match endpoint {
            Endpoint::Node(name) => self.host(name).map(EndpointHandle::Host),
            Endpoint::Switch(id) => self
                .switches
                .iter()
                .find(|s| &s.name == id)
                .map(EndpointHandle::Switch),
        }
    }
}

pub struct EmulationSession<S: Substrate> {
    topology: Topology,
    substrate: S,
    launcher: ProcessLauncher,
    inventory: Inventory,
    state: SessionState,
}

impl<S: Substrate> EmulationSession<S> {
    pub fn new(topology: Topology, substrate: S) -> Self {
        Self {
            topology,
            substrate,
            launcher: ProcessLauncher::new(),
            inventory: Inventory::default(),
            state: SessionState::Built,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView::new(&self.topology, &self.inventory, &self.substrate)
    }

    /// Realize the network and start every node's process
    pub async fn start(&mut self) -> Result<()> {
        self.realize().await?;
        self.attach_processes().await
    }

    /// Create hosts, switches and links
    pub async fn realize(&mut self) -> Result<()> {
        self.expect_state("realize", SessionState::Built)?;
        info!(
            hosts = self.topology.nodes().len(),
            switches = self.topology.switches().len(),
            links = self.topology.links().len(),
            "realizing topology"
        );

        if let Err(e) = self.realize_all().await {
            return Err(self.abort(e).await);
        }

        self.state = SessionState::Running;
        Ok(())
    }

    /// Start one process per host
    pub async fn attach_processes(&mut self) -> Result<()> {
        self.expect_state("attach processes to", SessionState::Running)?;

        if let Err(e) = self.attach_all().await {
            return Err(self.abort(e).await);
        }

        self.state = SessionState::Interactive;
        info!(processes = self.inventory.processes.len(), "all nodes started");
        Ok(())
    }

    /// Hand the running network to `operator` until it returns
    pub async fn interact<O: Operator + ?Sized>(&mut self, operator: &mut O) -> Result<()> {
        self.expect_state("interact with", SessionState::Interactive)?;
        operator.operate(self.view()).await
    }

    /// Release everything realized so far. Safe to call in any state.
    pub async fn stop(&mut self) -> std::result::Result<(), TeardownError> {
        match self.state {
            SessionState::Built => {
                debug!("stop on a session that was never started");
                Ok(())
            }
            SessionState::Stopped => Ok(()),
            SessionState::Running | SessionState::Interactive => {
                info!("stopping session");
                let result = self.teardown().await;
                self.state = SessionState::Stopped;
                result
            }
        }
    }

    /// Interfaces of every realized host as reported by the substrate
    pub async fn connections(&self) -> Result<Vec<HostConnections>> {
        self.view().connections().await
    }

    fn expect_state(&self, op: &'static str, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(SessionError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    async fn realize_all(&mut self) -> Result<()> {
        for node in self.topology.nodes() {
            let host = self
                .substrate
                .create_host(node.name(), node.address())
                .await
                .map_err(|source| SessionError::Realization {
                    entity: format!("host '{}'", node.name()),
                    source,
                })?;
            self.inventory.hosts.push(host);
        }

        for id in self.topology.switches() {
            let switch = self
                .substrate
                .create_switch(id)
                .await
                .map_err(|source| SessionError::Realization {
                    entity: format!("switch '{}'", id),
                    source,
                })?;
            self.inventory.switches.push(switch);
        }

        for (index, link) in self.topology.links().iter().enumerate() {
            let entity = || format!("link #{} ({} <-> {})", index, link.a(), link.b());
            let unresolved = |endpoint: &Endpoint| SessionError::Realization {
                entity: entity(),
                source: SubstrateError::Unknown {
                    kind: "endpoint",
                    name: endpoint.name().to_string(),
                },
            };

            let a = self.inventory.endpoint(link.a()).ok_or_else(|| unresolved(link.a()))?;
            let b = self.inventory.endpoint(link.b()).ok_or_else(|| unresolved(link.b()))?;
            let request = LinkRequest {
                index,
                a,
                b,
                impairment: link.impairment().map(|p| p.as_ref()),
            };

            let handle = self
                .substrate
                .create_link(request)
                .await
                .map_err(|source| SessionError::Realization {
                    entity: entity(),
                    source,
                })?;
            self.inventory.links.push(handle);
        }

        Ok(())
    }

    async fn attach_all(&mut self) -> Result<()> {
        for node in self.topology.nodes() {
            let host = self
                .inventory
                .hosts
                .iter()
                .find(|h| h.name == node.name())
                .ok_or_else(|| SessionError::Realization {
                    entity: format!("process of '{}'", node.name()),
                    source: SubstrateError::Unknown {
                        kind: "host",
                        name: node.name().to_string(),
                    },
                })?;

            let process = self.launcher.attach(&mut self.substrate, node, host).await?;
            self.inventory.processes.push(process);
        }
        Ok(())
    }

    /// Tear down after a failed transition and hand back the cause
    async fn abort(&mut self, error: SessionError) -> SessionError {
        warn!("Session failed, tearing down: {}", error);
        if let Err(teardown) = self.teardown().await {
            warn!("{}", teardown);
        }
        self.state = SessionState::Stopped;
        error
    }

    async fn teardown(&mut self) -> std::result::Result<(), TeardownError> {
        let mut errors = TeardownError::default();
        // Hosts and switches that must outlive this teardown, with the reason
        let mut held: BTreeMap<String, &'static str> = BTreeMap::new();

        for process in std::mem::take(&mut self.inventory.processes).iter().rev() {
            if let Err(e) = self.launcher.detach(&mut self.substrate, process).await {
                warn!(node = %process.node, "Failed to stop process: {}", e);
                errors.record(format!("process of '{}'", process.node), e);
                held.insert(process.node.clone(), "process still live");
            }
        }

        for link in std::mem::take(&mut self.inventory.links).iter().rev() {
            if let Err(e) = self.substrate.delete_link(link).await {
                warn!("Failed to delete {}: {}", link.label(), e);
                errors.record(link.label(), e);
                for endpoint in [&link.a, &link.b] {
                    held.entry(endpoint.clone()).or_insert("link still attached");
                }
            }
        }

        for switch in std::mem::take(&mut self.inventory.switches) {
            if let Some(reason) = held.get(&switch.name) {
                warn!(switch = %switch.name, "Keeping switch: {}", reason);
                errors.record(format!("switch '{}'", switch.name), format!("skipped, {}", reason));
                continue;
            }
            if let Err(e) = self.substrate.delete_switch(&switch).await {
                warn!(switch = %switch.name, "Failed to delete switch: {}", e);
                errors.record(format!("switch '{}'", switch.name), e);
            }
        }

        for host in std::mem::take(&mut self.inventory.hosts).iter().rev() {
            if let Some(reason) = held.get(&host.name) {
                warn!(host = %host.name, "Keeping host: {}", reason);
                errors.record(format!("host '{}'", host.name), format!("skipped, {}", reason));
                continue;
            }
            if let Err(e) = self.substrate.delete_host(host).await {
                warn!(host = %host.name, "Failed to delete host: {}", e);
                errors.record(format!("host '{}'", host.name), e);
            }
        }

        if errors.is_empty() {
            debug!("teardown complete");
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl<S: Substrate> Drop for EmulationSession<S> {
    fn drop(&mut self) {
        if self.state.is_live() && !self.inventory.is_empty() {
            warn!(
                state = %self.state,
                hosts = self.inventory.hosts.len(),
                links = self.inventory.links.len(),
                "session dropped without stop(); resources may be left behind"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, InMemorySubstrate, Operation};
    use topology::TopologyBuilder;

    fn session(substrate: InMemorySubstrate) -> EmulationSession<InMemorySubstrate> {
        EmulationSession::new(TopologyBuilder::default().build().unwrap(), substrate)
    }

    #[tokio::test]
    async fn test_realize_order() {
        let mut session = session(InMemorySubstrate::new());
        session.realize().await.unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let events = session.substrate().events();
        assert_eq!(events[0], Event::HostCreated("api".to_string()));
        assert_eq!(events[6], Event::SwitchCreated("api_sw".to_string()));
        assert_eq!(events[7], Event::LinkCreated(0));
        assert_eq!(events.last(), Some(&Event::LinkCreated(6)));
        assert!(session.substrate().live_processes().is_empty());
    }

    #[tokio::test]
    async fn test_attach_requires_running() {
        let mut session = session(InMemorySubstrate::new());
        let err = session.attach_processes().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Built,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_teardown_order() {
        let mut session = session(InMemorySubstrate::new());
        session.start().await.unwrap();
        session.stop().await.unwrap();

        let events = session.substrate().events();
        let first_teardown = events
            .iter()
            .position(|e| matches!(e, Event::ProcessKilled(_)))
            .unwrap();
        let teardown = &events[first_teardown..];

        assert_eq!(teardown[0], Event::ProcessKilled("sub1".to_string()));
        assert_eq!(teardown[6], Event::LinkDeleted(6));
        assert_eq!(teardown[12], Event::LinkDeleted(0));
        assert_eq!(teardown[13], Event::SwitchDeleted("api_sw".to_string()));
        assert_eq!(teardown[14], Event::HostDeleted("sub1".to_string()));
        assert_eq!(teardown.last(), Some(&Event::HostDeleted("api".to_string())));
        assert!(session.inventory().is_empty());
    }

    #[tokio::test]
    async fn test_kill_failure_does_not_block_teardown() {
        let mut session = session(InMemorySubstrate::new().fail_on(Operation::Kill, 1));
        session.start().await.unwrap();

        let err = session.stop().await.unwrap_err();
        let entities: Vec<&str> = err.entities().collect();
        assert_eq!(entities[0], "process of 'sub1'");
        // The host whose process survived is kept
        assert!(entities.contains(&"host 'sub1'"));
        assert!(err.to_string().contains("host 'sub1': skipped, process still live"));
        assert_eq!(session.substrate().live_hosts(), vec!["sub1"]);
        assert!(session.substrate().live_links().is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
