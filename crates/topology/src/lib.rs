//! Failover topology definitions for the emulation testbench
//!
//! This crate provides the data model for an emulated delivery network:
//! hosts with fixed addresses, a control switch, and links carrying an
//! optional impairment profile. It also contains the builder for the
//! two-relay failover topology and the argv builders for every role.
//!
//! Nothing here touches the system; a [`Topology`] is a validated,
//! immutable description that the `emulation` crate realizes.

pub mod addr;
pub mod builder;
pub mod command;
pub mod graph;
pub mod impairment;
pub mod link;
pub mod node;

pub use addr::{AddressPlan, Slot};
pub use builder::TopologyBuilder;
pub use command::{CommandStage, HarnessPaths, LaunchCommand, RelayAdvertise, RoleCommands};
pub use graph::{HostConnections, Topology};
pub use impairment::{ImpairmentBuilder, ImpairmentConfig, ImpairmentProfile};
pub use link::{Endpoint, LinkKind, LinkSpec};
pub use node::{NodeSpec, Role};

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors raised while defining a topology.
///
/// These are never retried: they describe a malformed definition and are
/// propagated to whoever called `build()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    #[error("Address {address} assigned to both '{first}' and '{second}'")]
    DuplicateAddress {
        address: Ipv4Addr,
        first: String,
        second: String,
    },

    #[error("Address {address} of '{node}' is outside the block {block}")]
    AddressOutsideBlock {
        node: String,
        address: Ipv4Addr,
        block: String,
    },

    #[error("Loss percentage {0} is outside [0, 100]")]
    LossOutOfRange(f64),

    #[error("Delay cannot be negative: {0}ms")]
    NegativeDelay(i64),

    #[error("Bandwidth must be a positive number of Mbit/s, got {0}")]
    InvalidBandwidth(f64),

    #[error("Duplicate switch id: {0}")]
    DuplicateSwitch(String),

    #[error("Link #{link} references unknown endpoint '{endpoint}'")]
    UnknownEndpoint { link: usize, endpoint: String },

    #[error("Link #{link} connects '{endpoint}' to itself")]
    SelfLoop { link: usize, endpoint: String },

    #[error("Duplicate link between '{a}' and '{b}'")]
    DuplicateLink { a: String, b: String },

    #[error("Invalid command for node '{node}' (stage {stage}): {reason}")]
    InvalidCommand {
        node: String,
        stage: usize,
        reason: String,
    },

    #[error("Invalid node name: {0:?}")]
    InvalidName(String),

    #[error("Invalid address plan: {0}")]
    InvalidPlan(String),

    #[error("At least one relay is required, got {0}")]
    InvalidRelayCount(usize),
}
