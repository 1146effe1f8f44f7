//! Execution targets.
//!
//! A [`Device`] is an opaque worker identity: a stable serial, some display
//! metadata, and the ability to open a [`DeviceConnection`]. The pool that
//! discovered a device owns it; workers only hold references.

use anyhow::Result;
use std::sync::Arc;

use crate::config::pool_config::{DeviceConfig, DeviceKind, SshConfig};
use crate::connection::{DeviceConnection, LocalConnection, SshConnection};

pub trait Device: Send + Sync {
    /// Stable unique identifier within a run.
    fn serial(&self) -> &str;

    /// Display metadata.
    fn model(&self) -> &str;

    /// Opens a fresh connection for command execution.
    fn connect(&self) -> Result<Box<dyn DeviceConnection>>;
}

/// A device backed by the local machine.
pub struct LocalDevice {
    serial: String,
    model: String,
}

impl LocalDevice {
    pub fn new(serial: impl Into<String>, model: impl Into<String>) -> Self {
        LocalDevice {
            serial: serial.into(),
            model: model.into(),
        }
    }
}

impl Device for LocalDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn connect(&self) -> Result<Box<dyn DeviceConnection>> {
        Ok(Box::new(LocalConnection::new()))
    }
}

/// A device living on another machine, reached over SSH. The core treats it
/// exactly like a local one.
pub struct SshDevice {
    serial: String,
    model: String,
    config: SshConfig,
}

impl SshDevice {
    pub fn new(serial: impl Into<String>, model: impl Into<String>, config: SshConfig) -> Self {
        SshDevice {
            serial: serial.into(),
            model: model.into(),
            config,
        }
    }
}

impl Device for SshDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn connect(&self) -> Result<Box<dyn DeviceConnection>> {
        Ok(Box::new(SshConnection::connect(&self.config)?))
    }
}

/// Builds the device matching a configuration entry.
pub fn from_config(config: &DeviceConfig) -> Result<Arc<dyn Device>> {
    match config.kind {
        DeviceKind::Local => Ok(Arc::new(LocalDevice::new(&config.serial, &config.model))),
        DeviceKind::Ssh => {
            let ssh = config.ssh.clone().ok_or_else(|| {
                anyhow::anyhow!("device {} is kind = \"ssh\" but has no [ssh] table", config.serial)
            })?;
            Ok(Arc::new(SshDevice::new(&config.serial, &config.model, ssh)))
        }
    }
}
