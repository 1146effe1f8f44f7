//! Device pools.

use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::config::pool_config::PoolConfig;
use crate::device::{self, Device};

/// A named, fixed set of devices scheduled together for one run. The set is
/// decided before scheduling begins and stays immutable for the run.
pub struct DevicePool {
    name: String,
    devices: Vec<Arc<dyn Device>>,
    setup_commands: Vec<String>,
    teardown_commands: Vec<String>,
}

impl DevicePool {
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        let mut devices: Vec<Arc<dyn Device>> = Vec::with_capacity(config.devices.len());
        for device_config in &config.devices {
            devices.push(device::from_config(device_config)?);
        }
        info!(
            "Loaded pool {} with {} device(s)",
            config.name,
            devices.len()
        );
        Ok(DevicePool {
            name: config.name.clone(),
            devices,
            setup_commands: config.setup_commands.clone(),
            teardown_commands: config.teardown_commands.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.devices
    }

    pub fn setup_commands(&self) -> &[String] {
        &self.setup_commands
    }

    pub fn teardown_commands(&self) -> &[String] {
        &self.teardown_commands
    }
}
