//! Common types for the transport layer

use std::fmt;
use std::sync::Arc;

/// Default output/input report length for vendor raw-HID interfaces
/// (32-byte payload plus the report-id byte).
pub const DEFAULT_REPORT_LEN: usize = 33;

/// Enumeration filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Restrict to one HID usage page (vendor interfaces usually live on 0xFFxx)
    pub usage_page: Option<u16>,
}

impl DeviceFilter {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            usage_page: None,
        }
    }

    pub fn with_usage_page(mut self, usage_page: u16) -> Self {
        self.usage_page = Some(usage_page);
        self
    }

    /// Check whether an interface matches this filter
    pub fn matches(&self, vendor_id: u16, product_id: u16, usage_page: u16) -> bool {
        vendor_id == self.vendor_id
            && product_id == self.product_id
            && self.usage_page.map_or(true, |page| page == usage_page)
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)?;
        if let Some(page) = self.usage_page {
            write!(f, " page={:04X}", page)?;
        }
        Ok(())
    }
}

/// One enumerated HID interface and its queryable capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Platform device path (hidraw node, IOKit path, ...)
    pub path: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// HID usage page of this interface
    pub usage_page: u16,
    /// HID usage of this interface
    pub usage: u16,
    /// Output report length in bytes, report-id byte included
    pub output_report_len: usize,
    /// Input report length in bytes, report-id byte included
    pub input_report_len: usize,
    /// Product name if available
    pub product_name: Option<String>,
    /// Serial number if available
    pub serial: Option<String>,
}

/// Hot-plug notifications delivered to link subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    /// The device is (again) present
    Attached,
    /// The device went away
    Removed,
}

/// Handle returned by [`crate::DeviceLink::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// One-shot callback for the next inbound report
pub type ReportCallback = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;

/// Attach/remove handler
pub type EventHandler = Arc<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Subscriber list shared by link implementations
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    handlers: Vec<(SubscriptionId, EventHandler)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) {
        self.handlers.retain(|(sid, _)| *sid != id);
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Snapshot of the handlers, so they can be called without holding a lock
    pub(crate) fn snapshot(&self) -> Vec<EventHandler> {
        self.handlers.iter().map(|(_, h)| h.clone()).collect()
    }
}
