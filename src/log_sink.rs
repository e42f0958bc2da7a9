//! Host-facing log sink
//!
//! The host shows plugin messages in its own event log, colored by a small
//! fixed set of tags. Everything user-visible goes through a [`LogSink`];
//! internal diagnostics use `tracing` directly.

use std::fmt;

use tracing::{debug, error, info, warn};

/// Severity of a host log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Color tag understood by the host event log
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Debug => "purple",
            Severity::Info => "blue",
            Severity::Warning => "yellow",
            Severity::Error => "red",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Receiver of host-visible messages
///
/// Implementations must not panic; logging is advisory.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, severity: Severity);
}

/// Sink that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str, severity: Severity) {
        let tag = severity.tag();
        match severity {
            Severity::Debug => debug!(tag, "{}", message),
            Severity::Info => info!(tag, "{}", message),
            Severity::Warning => warn!(tag, "{}", message),
            Severity::Error => error!(tag, "{}", message),
        }
    }
}
