//! Emulation session for the relay failover testbench
//!
//! Takes a validated [`topology::Topology`] and brings it to life on a
//! [`Substrate`]: hosts, the control switch and links first, then one
//! process pipeline per host. While the network is up an [`Operator`]
//! drives it; afterwards everything is torn down in reverse order.
//!
//! Two substrates are provided: [`NetnsSubstrate`] for Linux network
//! namespaces and [`InMemorySubstrate`] for tests.

pub mod fake;
pub mod launcher;
pub mod netns;
pub mod operator;
pub mod qdisc;
pub mod session;
pub mod substrate;

pub use fake::{Event, InMemorySubstrate, Operation};
pub use launcher::ProcessLauncher;
pub use netns::{NetnsConfig, NetnsSubstrate};
pub use operator::{line_reader, Console, Operator, SessionView, WaitForSignal};
pub use session::{EmulationSession, Inventory, SessionState};
pub use substrate::{
    EndpointHandle, ExecOutput, HostHandle, LinkHandle, LinkRequest, ProcessHandle, Substrate,
    SubstrateError, SwitchHandle,
};

use std::fmt;
use thiserror::Error;
use topology::ValidationError;

/// A process could not be attached to its host
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid command for node '{node}': {source}")]
    InvalidCommand {
        node: String,
        #[source]
        source: ValidationError,
    },

    #[error("Node '{node}' cannot run on host '{host}'")]
    HostMismatch { node: String, host: String },

    #[error("Failed to start '{program}' on node '{node}': {source}")]
    Spawn {
        node: String,
        program: String,
        #[source]
        source: SubstrateError,
    },
}

impl LaunchError {
    /// Node the failure belongs to
    pub fn node(&self) -> &str {
        match self {
            LaunchError::InvalidCommand { node, .. }
            | LaunchError::HostMismatch { node, .. }
            | LaunchError::Spawn { node, .. } => node,
        }
    }
}

/// Resources that could not be released during teardown
#[derive(Error, Debug, Default)]
#[error("Teardown left {} resource(s) behind{}", .failures.len(), summarize(.failures))]
pub struct TeardownError {
    /// (entity, failure message), in teardown order
    pub failures: Vec<(String, String)>,
}

impl TeardownError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, entity: impl Into<String>, error: impl fmt::Display) {
        self.failures.push((entity.into(), error.to_string()));
    }

    /// Entities that failed to release
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(entity, _)| entity.as_str())
    }
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(entity, message)| format!("; {}: {}", entity, message))
        .collect()
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to realize {entity}: {source}")]
    Realization {
        entity: String,
        #[source]
        source: SubstrateError,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Cannot {op} a session in state {state}")]
    InvalidState { op: &'static str, state: SessionState },

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("Invalid topology: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operator failed: {0}")]
    Operator(#[from] std::io::Error),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_error_lists_every_failure() {
        let mut err = TeardownError::default();
        assert!(err.is_empty());
        err.record("switch 'api_sw'", "busy");
        err.record("host 'api'", "gone");

        let text = err.to_string();
        assert!(text.starts_with("Teardown left 2 resource(s) behind"));
        assert!(text.contains("switch 'api_sw': busy"));
        assert_eq!(err.entities().collect::<Vec<_>>(), vec!["switch 'api_sw'", "host 'api'"]);
    }

    #[test]
    fn test_launch_error_names_node() {
        let err = LaunchError::HostMismatch {
            node: "relay1".to_string(),
            host: "relay2".to_string(),
        };
        assert_eq!(err.node(), "relay1");
        assert!(SessionError::from(err).to_string().contains("relay1"));
    }
}
