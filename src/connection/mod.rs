//! Device command execution.
//!
//! This is the boundary to device communication: the core never talks to a
//! device directly, it asks its [`DeviceConnection`] to run a command and
//! hand back the captured output. Local and SSH-backed implementations are
//! provided; anything else arrives through the same trait.

use anyhow::Result;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Captured output of one executed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One live channel to a device.
#[cfg_attr(test, automock)]
pub trait DeviceConnection: Send {
    /// Executes a command and returns its captured output.
    fn execute_command(&mut self, command: &str, timeout: Option<Duration>)
    -> Result<CommandOutput>;

    /// Releases the channel. The default implementation does nothing so
    /// connection types without teardown needs can skip it.
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

mod local;
pub use local::LocalConnection;

mod ssh;
pub use ssh::SshConnection;
