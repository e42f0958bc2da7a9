//! Host plugin dispatcher
//!
//! The host loads the plugin once ([`HidPlugin::init`]), forwards each
//! command string to [`HidPlugin::invoke`] and calls [`HidPlugin::exit`] on
//! shutdown. Everything the plugin reports goes to the host's log sink.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use hidlink_transport::DeviceBackend;
use tracing::debug;

use crate::codec::DecodedReport;
use crate::command::{Command, PluginAction};
use crate::config::{HidConfig, InterfaceSettings};
use crate::identity::DeviceIdentity;
use crate::log_sink::{LogSink, Severity};
use crate::manager::{ConnectionManager, ManagerOptions, ReportSink};

/// Display name used in host-facing messages
pub const PLUGIN_NAME: &str = concat!("hidlink ", env!("CARGO_PKG_VERSION"));

/// Oldest host the plugin runs under
pub const REQUIRED_HOST_VERSION: HostVersion = HostVersion::new(1, 8, 7);

/// Host application version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl HostVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for HostVersion {
    type Err = String;

    /// `major[.minor[.patch]]`, missing parts are zero
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 3];
        for (i, part) in s.trim().split('.').enumerate() {
            if i >= parts.len() {
                return Err(format!("invalid version '{s}'"));
            }
            parts[i] = part
                .parse()
                .map_err(|_| format!("invalid version '{s}'"))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

/// What the host hands the plugin at load time
#[derive(Clone)]
pub struct HostContext {
    pub version: HostVersion,
    /// Directory the plugin was loaded from; the config file lives here
    pub plugin_path: PathBuf,
    pub log: Arc<dyn LogSink>,
}

/// Plugin state between host calls
pub struct HidPlugin {
    ctx: HostContext,
    backend: Arc<dyn DeviceBackend>,
    compatible: bool,
    config_path: PathBuf,
    settings: InterfaceSettings,
    manager: Option<ConnectionManager>,
}

impl HidPlugin {
    /// Check the host version, then reconnect to the stored device if any
    pub fn init(ctx: HostContext, backend: Arc<dyn DeviceBackend>) -> Self {
        let config_path = HidConfig::path_in(&ctx.plugin_path);
        let mut plugin = Self {
            ctx,
            backend,
            compatible: false,
            config_path,
            settings: InterfaceSettings::default(),
            manager: None,
        };

        if plugin.ctx.version < REQUIRED_HOST_VERSION {
            plugin.log_incompatible();
            return plugin;
        }
        plugin.compatible = true;

        let stored = HidConfig::load(&plugin.config_path).and_then(|config| {
            plugin.settings = config.interface.clone();
            config.identity()
        });
        match stored {
            Ok(Some(identity)) => {
                let manager = plugin.build_manager(identity);
                manager.connect(plugin.settings.listen_on_connect, None);
                plugin.manager = Some(manager);
            }
            Ok(None) => debug!("No stored HID hardware in {}", plugin.config_path.display()),
            Err(e) => plugin.log(
                &format!("Error initializing stored HID hardware configuration. {}", e),
                Severity::Error,
            ),
        }
        plugin
    }

    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &InterfaceSettings {
        &self.settings
    }

    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    /// Run one command string from the host
    pub fn invoke(&mut self, input: &str) {
        if !self.compatible {
            self.log_incompatible();
            return;
        }

        let first = input.split(':').next().unwrap_or_default();
        let action = match first.parse::<PluginAction>() {
            Ok(action) => action,
            Err(e) => {
                self.log(&e.to_string(), Severity::Error);
                return;
            }
        };

        if action == PluginAction::Initialize {
            if let Some(old) = self.manager.take() {
                old.close();
            }
        } else if self.manager.is_none() {
            if action == PluginAction::Check {
                self.log("HID hardware is not initialized", Severity::Info);
            } else {
                self.log(
                    &format!(
                        "HID hardware is not initialized. Cannot perform '{}' action.",
                        action
                    ),
                    Severity::Error,
                );
            }
            return;
        }

        let command = match Command::parse(input) {
            Ok(command) => command,
            Err(e) => {
                self.log(&e.to_string(), Severity::Error);
                return;
            }
        };

        if let Command::Initialize(identity) = command {
            let manager = self.build_manager(identity);
            manager.connect(self.settings.listen_on_connect, Some(&self.config_path));
            self.manager = Some(manager);
            return;
        }

        let Some(manager) = self.manager.as_ref() else {
            return;
        };
        let name = manager.identity().display_name();
        match command {
            Command::Initialize(_) => {}
            Command::Connect => {
                if !manager.is_active() {
                    manager.connect(self.settings.listen_on_connect, Some(&self.config_path));
                } else if !manager.is_connected() {
                    self.log(
                        &format!("Interface with {} is already active", name),
                        Severity::Warning,
                    );
                } else {
                    self.log(
                        &format!("Already connected with {}", name),
                        Severity::Warning,
                    );
                }
            }
            Command::Disconnect => {
                if manager.is_active() {
                    manager.close();
                } else {
                    self.log(
                        &format!("Interface with {} is not currently active", name),
                        Severity::Warning,
                    );
                }
            }
            Command::Check => {
                let connected = if manager.is_connected() {
                    "Connected"
                } else {
                    "Not connected"
                };
                let active = if manager.is_active() {
                    "active"
                } else {
                    "inactive"
                };
                self.log(
                    &format!("{} with {}, and interface is {}", connected, name, active),
                    Severity::Info,
                );
            }
            Command::Send { action, context } => {
                if !manager.send(action.code(), context, false) {
                    self.log(
                        &format!("Could not perform '{}' action", PluginAction::Send),
                        Severity::Error,
                    );
                }
            }
            Command::Receive => {
                if !manager.receive(false) {
                    self.log(
                        &format!("Could not perform '{}' action", PluginAction::Receive),
                        Severity::Error,
                    );
                }
            }
        }
    }

    /// Close the interface on host shutdown
    pub fn exit(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.close();
        }
    }

    fn build_manager(&self, identity: DeviceIdentity) -> ConnectionManager {
        let options = ManagerOptions {
            read_timeout_ms: self.settings.read_timeout_ms,
            report_sink: Some(report_logger(
                self.ctx.log.clone(),
                identity.display_name().to_string(),
            )),
        };
        ConnectionManager::new(identity, self.backend.clone(), self.ctx.log.clone(), options)
    }

    fn log(&self, message: &str, severity: Severity) {
        self.ctx.log.log(message, severity);
    }

    fn log_incompatible(&self) {
        self.log(
            &format!(
                "{} requires host v{} or later, but v{} is currently installed",
                PLUGIN_NAME, REQUIRED_HOST_VERSION, self.ctx.version
            ),
            Severity::Error,
        );
    }
}

/// Default report sink: one debug line per decoded report
fn report_logger(log: Arc<dyn LogSink>, name: String) -> ReportSink {
    Arc::new(move |report: DecodedReport| {
        let action = match (report.action_name(), report.action) {
            (Some(known), _) => known.to_string(),
            (None, Some(code)) => format!("0x{:02X}", code),
            (None, None) => "none".to_string(),
        };
        log.log(
            &format!(
                "Report from {}: action {} [{}]",
                name,
                action,
                report.payload_hex()
            ),
            Severity::Debug,
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_version_parse_and_order() {
        let v: HostVersion = "1.8.7".parse().unwrap();
        assert_eq!(v, REQUIRED_HOST_VERSION);
        assert!("1.10".parse::<HostVersion>().unwrap() > v);
        assert!("1.8.6".parse::<HostVersion>().unwrap() < v);
        assert_eq!("2".parse::<HostVersion>().unwrap().to_string(), "2.0.0");
        assert!("1.x".parse::<HostVersion>().is_err());
        assert!("1.2.3.4".parse::<HostVersion>().is_err());
    }
}
