//! Emulated host definitions

use crate::command::LaunchCommand;
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// What the process on a host does in the delivery pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Api,
    Directory,
    Relay,
    Publisher,
    Subscriber,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Api => "api",
            Role::Directory => "directory",
            Role::Relay => "relay",
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
        };
        f.write_str(name)
    }
}

/// One emulated host and the process it runs
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeSpec {
    name: String,
    address: Ipv4Addr,
    role: Role,
    command: LaunchCommand,
}

impl NodeSpec {
    /// Names become namespace and interface name fragments, so they are
    /// restricted to ASCII alphanumerics, `-` and `_`.
    pub fn new(
        name: impl Into<String>,
        address: Ipv4Addr,
        role: Role,
        command: LaunchCommand,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(ValidationError::InvalidName(name));
        }
        command.validate(&name)?;

        Ok(Self {
            name,
            address,
            role,
            command,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
