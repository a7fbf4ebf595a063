//! Starts node commands on realized hosts

use crate::substrate::{HostHandle, ProcessHandle, Substrate};
use crate::LaunchError;
use topology::NodeSpec;
use tracing::{debug, info};

/// Attaches each node's launch command to its host
///
/// The launcher never waits for a process to exit; it only reports
/// whether the pipeline could be started.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    pub async fn attach<S: Substrate + ?Sized>(
        &self,
        substrate: &mut S,
        node: &NodeSpec,
        host: &HostHandle,
    ) -> Result<ProcessHandle, LaunchError> {
        if host.name != node.name() {
            return Err(LaunchError::HostMismatch {
                node: node.name().to_string(),
                host: host.name.clone(),
            });
        }

        let command = node.command();
        command
            .validate(node.name())
            .map_err(|source| LaunchError::InvalidCommand {
                node: node.name().to_string(),
                source,
            })?;

        debug!(node = node.name(), role = %node.role(), "attaching: {}", command);

        let handle = substrate
            .spawn(host, command)
            .await
            .map_err(|source| LaunchError::Spawn {
                node: node.name().to_string(),
                program: command
                    .stages()
                    .first()
                    .map(|s| s.program().to_string())
                    .unwrap_or_default(),
                source,
            })?;

        info!(node = node.name(), process = handle.id, "attached");
        Ok(handle)
    }

    /// Stop a process started by [`attach`](Self::attach)
    pub async fn detach<S: Substrate + ?Sized>(
        &self,
        substrate: &mut S,
        process: &ProcessHandle,
    ) -> Result<(), crate::SubstrateError> {
        substrate.kill(process).await?;
        debug!(node = %process.node, process = process.id, "detached");
        Ok(())
    }
}
