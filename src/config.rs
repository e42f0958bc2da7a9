//! Plugin configuration file
//!
//! `HIDConfig.toml` lives next to the plugin and remembers the last device
//! identity that connected, plus a few interface settings:
//!
//! ```toml
//! [HIDHardwareInfo]
//! DeviceName = "bigKNOBv2"
//! VendorID = "0xCEEB"
//! ProductID = "0x0007"
//! UsagePage = "0xFF60"
//! Usage = "0x0061"
//!
//! [Interface]
//! read_timeout_ms = 1000
//! report_length = 33
//! hotplug_poll_ms = 500
//! listen_on_connect = true
//! ```

use std::path::{Path, PathBuf};

use hidlink_transport::{HidBackendConfig, DEFAULT_REPORT_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{format_hex_u16, DeviceIdentity, IdentityError};

/// File name of the plugin configuration
pub const CONFIG_FILE_NAME: &str = "HIDConfig.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid hardware info: {0}")]
    Identity(#[from] IdentityError),
}

/// Stored device identity, hex fields kept as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    #[serde(rename = "VendorID")]
    pub vendor_id: String,
    #[serde(rename = "ProductID")]
    pub product_id: String,
    #[serde(rename = "UsagePage", default, skip_serializing_if = "Option::is_none")]
    pub usage_page: Option<String>,
    #[serde(rename = "Usage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl HardwareInfo {
    pub fn from_identity(identity: &DeviceIdentity) -> Self {
        Self {
            device_name: identity.display_name().to_string(),
            vendor_id: format_hex_u16(identity.vendor_id()),
            product_id: format_hex_u16(identity.product_id()),
            usage_page: identity.usage_page().map(format_hex_u16),
            usage: identity.usage().map(format_hex_u16),
        }
    }

    pub fn to_identity(&self) -> Result<DeviceIdentity, IdentityError> {
        DeviceIdentity::parse(
            &self.device_name,
            &self.vendor_id,
            &self.product_id,
            self.usage_page.as_deref(),
            self.usage.as_deref(),
        )
    }
}

/// Interface timing and report settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceSettings {
    /// Timeout of a manual `receive`
    pub read_timeout_ms: i32,
    /// Output/input report length of the device, report-id byte included
    pub report_length: usize,
    /// Presence polling interval for attach/remove detection
    pub hotplug_poll_ms: u64,
    /// Arm the report listener when connecting
    pub listen_on_connect: bool,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            report_length: DEFAULT_REPORT_LEN,
            hotplug_poll_ms: 500,
            listen_on_connect: true,
        }
    }
}

impl InterfaceSettings {
    /// Settings for the hidapi backend
    pub fn backend_config(&self) -> HidBackendConfig {
        HidBackendConfig {
            report_len: self.report_length,
            hotplug_poll_ms: self.hotplug_poll_ms,
            ..HidBackendConfig::default()
        }
    }
}

/// Contents of `HIDConfig.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidConfig {
    #[serde(
        rename = "HIDHardwareInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hardware: Option<HardwareInfo>,
    #[serde(rename = "Interface", default)]
    pub interface: InterfaceSettings,
}

impl HidConfig {
    /// Config file inside a plugin directory
    pub fn path_in(plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(CONFIG_FILE_NAME)
    }

    /// Default plugin directory for the CLI host
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hidlink")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)?;
        Ok(())
    }

    /// Stored identity, if the file has one
    pub fn identity(&self) -> Result<Option<DeviceIdentity>, ConfigError> {
        match &self.hardware {
            Some(info) => Ok(Some(info.to_identity()?)),
            None => Ok(None),
        }
    }
}

/// Remember `identity` in the file at `path`, keeping its other sections
pub fn store_identity(path: &Path, identity: &DeviceIdentity) -> Result<(), ConfigError> {
    let mut config = HidConfig::load(path)?;
    config.hardware = Some(HardwareInfo::from_identity(identity));
    config.save(path)
}
