// hidlink - managed link between a host plugin and one HID device
// Device identity, report framing, connection lifecycle and the plugin dispatcher

pub mod codec;
pub mod command;
pub mod config;
pub mod identity;
pub mod log_sink;
pub mod manager;
pub mod plugin;

pub use codec::{decode_report, encode_report, CodecError, DecodedReport, HidAction, OutboundCommand};
pub use command::{Command, CommandError, PluginAction};
pub use config::{ConfigError, HidConfig, InterfaceSettings};
pub use identity::{DeviceIdentity, IdentityError};
pub use log_sink::{LogSink, Severity, TracingSink};
pub use manager::{ConnectionManager, ManagerOptions, ReportSink};
pub use plugin::{HidPlugin, HostContext, HostVersion};

pub use hidlink_transport as transport;
