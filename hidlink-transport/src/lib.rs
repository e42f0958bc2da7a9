//! Transport abstraction layer for single-device HID links
//!
//! This crate provides a unified interface for talking to one HID interface
//! of an external device:
//!
//! - Enumeration filtered by vendor/product/usage page ([`DeviceBackend`])
//! - Report I/O, hot-plug notifications and a single-outstanding report
//!   listener on an open handle ([`DeviceLink`])
//! - A hidapi implementation ([`HidBackend`]) and an in-memory one
//!   ([`SimBackend`]) for tests and dry runs

pub mod error;
pub mod hotplug;
pub mod reader;
pub mod sim;
pub mod types;

mod discovery;
mod hid_link;

pub use discovery::{HidBackend, HidBackendConfig};
pub use error::TransportError;
pub use hid_link::HidLink;
pub use hotplug::{HandleAction, LinkPresence, PresenceTracker};
pub use sim::{SimBackend, SimHub};
pub use types::{
    DeviceCandidate, DeviceFilter, EventHandler, LinkEvent, ReportCallback, SubscriptionId,
    DEFAULT_REPORT_LEN,
};

use std::sync::Arc;

/// Device discovery abstraction
pub trait DeviceBackend: Send + Sync {
    /// List interfaces matching `filter`, in platform enumeration order
    fn enumerate(&self, filter: &DeviceFilter) -> Result<Vec<DeviceCandidate>, TransportError>;

    /// Open a specific interface
    fn open(&self, candidate: &DeviceCandidate) -> Result<Arc<dyn DeviceLink>, TransportError>;
}

/// An open handle to one physical device
///
/// All methods take `&self`; implementations serialize access to the
/// underlying handle internally so a link can be shared between the caller's
/// thread and the thread delivering reports and hot-plug events.
pub trait DeviceLink: Send + Sync {
    /// Capabilities of the opened interface
    fn info(&self) -> &DeviceCandidate;

    /// Negotiated output report length (report-id byte included)
    fn output_report_len(&self) -> usize {
        self.info().output_report_len
    }

    /// Whether the device is present and the handle still works
    ///
    /// A handle goes stale when the device is unplugged or an I/O call on it
    /// fails. Only a monitoring link recovers it on re-attach.
    fn is_connected(&self) -> bool;

    /// Write one output report
    ///
    /// `report[0]` is the report id. Shorter reports are zero-padded to the
    /// negotiated output length.
    ///
    /// # Returns
    /// Number of bytes handed to the platform
    fn write(&self, report: &[u8]) -> Result<usize, TransportError>;

    /// Blocking read of one input report
    ///
    /// # Returns
    /// `None` on timeout, `Some(report)` with the report id at byte 0
    fn read(&self, timeout_ms: i32) -> Result<Option<Vec<u8>>, TransportError>;

    /// Enable or disable attach/remove detection
    ///
    /// The first presence check after enabling emits [`LinkEvent::Attached`]
    /// if the link is connected. Re-attach only reopens a monitoring link.
    fn set_monitoring(&self, enabled: bool);

    /// Arm a one-shot read: `callback` fires once, with the next input report
    ///
    /// Arming again while a callback is pending replaces it, so at most one
    /// read is ever outstanding. The callback never runs on the arming thread.
    fn read_report(&self, callback: ReportCallback) -> Result<(), TransportError>;

    /// Subscribe to attach/remove notifications
    fn subscribe(&self, handler: EventHandler) -> SubscriptionId;

    /// Drop a subscription
    fn unsubscribe(&self, id: SubscriptionId);

    /// Release the handle, pending callback and subscribers
    fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for a shared link
pub type SharedLink = Arc<dyn DeviceLink>;
