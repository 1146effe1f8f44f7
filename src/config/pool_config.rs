//! Pool and device configuration.
//!
//! Deserialized from the `[[pools]]` tables of the run configuration file:
//!
//! ```toml
//! [[pools]]
//! name = "default"
//! setup_commands = ["./prepare-device.sh {serial}"]
//!
//! [[pools.devices]]
//! serial = "local-1"
//!
//! [[pools.devices]]
//! serial = "lab-42"
//! model = "rack node"
//! kind = "ssh"
//! ssh = { host = "lab-42.example.com", username = "ci" }
//! ```

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Shell commands each device worker runs before polling for work.
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Shell commands each device worker runs after its queue drains.
    #[serde(default)]
    pub teardown_commands: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub serial: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub kind: DeviceKind,
    /// Required when `kind = "ssh"`.
    pub ssh: Option<SshConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Local,
    Ssh,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
}

fn default_model() -> String {
    "unknown".to_string()
}

fn default_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_local_device() {
        let pool: PoolConfig = toml::from_str(
            r#"
            name = "default"

            [[devices]]
            serial = "local-1"
            "#,
        )
        .unwrap();
        assert_eq!(pool.name, "default");
        assert_eq!(pool.devices.len(), 1);
        assert_eq!(pool.devices[0].kind, DeviceKind::Local);
        assert_eq!(pool.devices[0].model, "unknown");
    }

    #[test]
    fn ssh_device_with_defaults() {
        let device: DeviceConfig = toml::from_str(
            r#"
            serial = "lab-42"
            kind = "ssh"
            ssh = { host = "lab-42.example.com", username = "ci" }
            "#,
        )
        .unwrap();
        assert_eq!(device.kind, DeviceKind::Ssh);
        let ssh = device.ssh.unwrap();
        assert_eq!(ssh.port, 22);
        assert!(ssh.password.is_none());
    }
}
