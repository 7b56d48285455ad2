//! Configuration loading and validation

use anyhow::Result;
use lightbridge_core::descriptor::{descriptor, ProductKind};
use lightbridge_core::protocol::{CLIENT_PORT, SERVICE_PORT};
use lightbridge_device::watch::HardwareInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub unlock: UnlockConfig,
    /// Statically declared hardware. The OS watcher is platform glue that
    /// feeds the same presence channel; until one is wired in, devices are
    /// declared here.
    #[serde(default, rename = "device")]
    pub devices: Vec<StaticDeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address the UDP socket binds to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port for inbound client broadcasts
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Port the client listens on for our responses
    #[serde(default = "default_reply_port")]
    pub reply_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            listen_port: default_listen_port(),
            reply_port: default_reply_port(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    SERVICE_PORT
}

fn default_reply_port() -> u16 {
    CLIENT_PORT
}

/// Vendor unlock utility locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlockConfig {
    /// Path to Creative's firmware utility; required before a Katana V2
    /// accepts LED commands
    pub katana_utility: Option<PathBuf>,
}

/// One statically declared hardware instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticDeviceConfig {
    pub kind: ProductKind,
    /// Device node or serial port path to open
    pub instance_path: String,
    /// Display name override
    pub name: Option<String>,
    /// Hardware serial; preferred identity source
    pub serial: Option<String>,
    /// Parent instance id, used for identity when no serial is given
    pub parent_instance_id: Option<String>,
}

impl StaticDeviceConfig {
    /// Convert to the presence event payload a hardware watcher would emit
    pub fn to_hardware_info(&self) -> HardwareInfo {
        let name = self.name.clone().unwrap_or_else(|| {
            match self.kind {
                ProductKind::Ae5 => "Sound BlasterX AE-5",
                ProductKind::KatanaV2 => "Katana V2",
            }
            .to_string()
        });
        HardwareInfo {
            instance_path: self.instance_path.clone(),
            display_name: name,
            serial: self.serial.clone(),
            parent_instance_id: self.parent_instance_id.clone(),
        }
    }
}

impl Config {
    /// Sanity-check the configuration against the descriptor table
    pub fn validate(&self) -> Result<()> {
        lightbridge_core::descriptor::validate()?;
        for dev in &self.devices {
            // Forces a table lookup so a kind without a descriptor fails
            // here rather than at dispatch time.
            let _ = descriptor(dev.kind);
            if dev.instance_path.is_empty() {
                anyhow::bail!("device entry for {} has an empty instance_path", dev.kind);
            }
        }
        if self.bridge.listen_port == self.bridge.reply_port {
            anyhow::bail!(
                "listen_port and reply_port are both {}; the client cannot share our port",
                self.bridge.listen_port
            );
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
