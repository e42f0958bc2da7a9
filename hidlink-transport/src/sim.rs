//! In-memory device backend
//!
//! [`SimHub`] plays the role of the platform: it owns the simulated devices,
//! decides which are plugged in, records every report written to them and
//! delivers inbound reports. [`SimBackend`] is the [`DeviceBackend`] view of
//! a hub. Links share [`LinkPresence`] with [`crate::HidLink`]: unplugging a
//! device or a failed write invalidates the link, and only links with
//! monitoring enabled pick the device up again when it comes back.
//!
//! Hot-plug events and report deliveries run synchronously on the thread that
//! drives the hub, which keeps tests deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::hotplug::LinkPresence;
use crate::types::{
    DeviceCandidate, DeviceFilter, EventHandler, LinkEvent, ReportCallback, SubscriptionId,
    Subscribers,
};
use crate::{DeviceBackend, DeviceLink};

/// Handle for driving simulated devices
#[derive(Clone, Default)]
pub struct SimHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    devices: Vec<SimDevice>,
    links: Vec<Weak<SimLinkShared>>,
    writes: Vec<Vec<u8>>,
    enumerations: usize,
    opens: usize,
    fail_open: bool,
    fail_write: bool,
}

struct SimDevice {
    candidate: DeviceCandidate,
    present: bool,
}

impl SimHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a candidate with a generated path
    pub fn candidate(
        vendor_id: u16,
        product_id: u16,
        usage_page: u16,
        usage: u16,
        report_len: usize,
    ) -> DeviceCandidate {
        DeviceCandidate {
            path: format!(
                "sim:{:04x}:{:04x}:{:04x}:{:04x}",
                vendor_id, product_id, usage_page, usage
            ),
            vendor_id,
            product_id,
            usage_page,
            usage,
            output_report_len: report_len,
            input_report_len: report_len,
            product_name: Some("Simulated HID".into()),
            serial: None,
        }
    }

    /// Add a plugged-in device
    pub fn add_device(&self, candidate: DeviceCandidate) -> &Self {
        self.inner.lock().devices.push(SimDevice {
            candidate,
            present: true,
        });
        self
    }

    pub fn backend(&self) -> SimBackend {
        SimBackend { hub: self.clone() }
    }

    /// Unplug a device: open links on it go stale and monitoring links see `Removed`
    pub fn unplug(&self, path: &str) {
        self.set_present(path, false);
    }

    /// Plug a device back in
    ///
    /// Monitoring links reopen their handle and see `Attached`; the others
    /// stay stale.
    pub fn plug(&self, path: &str) {
        self.set_present(path, true);
    }

    fn set_present(&self, path: &str, present: bool) {
        let links = {
            let mut state = self.inner.lock();
            if let Some(dev) = state.devices.iter_mut().find(|d| d.candidate.path == path) {
                dev.present = present;
            }
            state.live_links(path)
        };
        for link in links {
            link.sample_presence(present);
        }
    }

    /// Deliver an inbound report to every live link opened on `path`
    ///
    /// Reports queue per link; a link hands them out one per armed callback,
    /// or to `read`.
    pub fn push_report(&self, path: &str, report: &[u8]) {
        let links = self.inner.lock().live_links(path);
        for link in links {
            if !link.is_connected() {
                continue;
            }
            link.inbound.lock().push_back(report.to_vec());
            link.pump();
        }
    }

    /// Every report written so far, padded as the platform would see it
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().writes.clone()
    }

    pub fn enumerations(&self) -> usize {
        self.inner.lock().enumerations
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.inner.lock().fail_write = fail;
    }

    /// Number of links that are open and not yet closed
    pub fn open_links(&self) -> usize {
        self.inner
            .lock()
            .links
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|l| !l.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Whether any open link currently has a report callback armed
    pub fn has_pending_read(&self, path: &str) -> bool {
        self.inner
            .lock()
            .live_links(path)
            .iter()
            .any(|l| l.pending.lock().is_some())
    }

    fn is_present(&self, path: &str) -> bool {
        self.inner
            .lock()
            .devices
            .iter()
            .any(|d| d.candidate.path == path && d.present)
    }
}

impl HubState {
    fn live_links(&mut self, path: &str) -> Vec<Arc<SimLinkShared>> {
        self.links.retain(|l| l.strong_count() > 0);
        self.links
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|l| l.info.path == path && !l.closed.load(Ordering::SeqCst))
            .collect()
    }
}

/// [`DeviceBackend`] over a [`SimHub`]
#[derive(Clone)]
pub struct SimBackend {
    hub: SimHub,
}

impl SimBackend {
    pub fn hub(&self) -> &SimHub {
        &self.hub
    }
}

impl DeviceBackend for SimBackend {
    fn enumerate(&self, filter: &DeviceFilter) -> Result<Vec<DeviceCandidate>, TransportError> {
        let mut state = self.hub.inner.lock();
        state.enumerations += 1;
        Ok(state
            .devices
            .iter()
            .filter(|d| d.present)
            .filter(|d| {
                filter.matches(
                    d.candidate.vendor_id,
                    d.candidate.product_id,
                    d.candidate.usage_page,
                )
            })
            .map(|d| d.candidate.clone())
            .collect())
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Arc<dyn DeviceLink>, TransportError> {
        let mut state = self.hub.inner.lock();
        state.opens += 1;
        if state.fail_open {
            return Err(TransportError::HidError("simulated open failure".into()));
        }
        if !state
            .devices
            .iter()
            .any(|d| d.candidate.path == candidate.path && d.present)
        {
            return Err(TransportError::DeviceNotFound(candidate.path.clone()));
        }

        let shared = Arc::new(SimLinkShared {
            hub: self.hub.clone(),
            info: candidate.clone(),
            closed: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
            presence: Mutex::new(LinkPresence::new()),
            pending: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Subscribers::default()),
        });
        state.links.push(Arc::downgrade(&shared));
        debug!("Opened simulated link {}", candidate.path);
        Ok(Arc::new(SimLink { shared }))
    }
}

struct SimLink {
    shared: Arc<SimLinkShared>,
}

struct SimLinkShared {
    hub: SimHub,
    info: DeviceCandidate,
    closed: AtomicBool,
    monitoring: AtomicBool,
    presence: Mutex<LinkPresence>,
    pending: Mutex<Option<ReportCallback>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    subscribers: Mutex<Subscribers>,
}

impl SimLinkShared {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.presence.lock().is_connected()
    }

    fn sample_presence(&self, present: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let monitoring = self.monitoring.load(Ordering::SeqCst);
        let event = {
            let mut presence = self.presence.lock();
            if let Some(action) = presence.sample(present, monitoring) {
                debug!("Simulated link {}: {:?}", self.info.path, action);
            }
            presence.event(monitoring)
        };
        if let Some(event) = event {
            self.notify(event);
        }
    }

    fn notify(&self, event: LinkEvent) {
        let handlers = self.subscribers.lock().snapshot();
        for handler in handlers {
            handler(event);
        }
    }

    /// Hand queued reports to armed callbacks until one side runs dry
    fn pump(&self) {
        loop {
            let delivery = {
                let mut pending = self.pending.lock();
                let mut inbound = self.inbound.lock();
                if pending.is_some() && !inbound.is_empty() {
                    pending.take().zip(inbound.pop_front())
                } else {
                    None
                }
            };
            match delivery {
                Some((callback, report)) => callback(report),
                None => break,
            }
        }
    }
}

impl DeviceLink for SimLink {
    fn info(&self) -> &DeviceCandidate {
        &self.shared.info
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn write(&self, report: &[u8]) -> Result<usize, TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let mut state = self.shared.hub.inner.lock();
        if state.fail_write {
            // Same as a failed hidapi write: the handle is not trusted again
            self.shared.presence.lock().mark_stale();
            return Err(TransportError::HidError("simulated write failure".into()));
        }
        let mut buf = report.to_vec();
        if buf.len() < self.shared.info.output_report_len {
            buf.resize(self.shared.info.output_report_len, 0);
        }
        let len = buf.len();
        state.writes.push(buf);
        Ok(len)
    }

    fn read(&self, _timeout_ms: i32) -> Result<Option<Vec<u8>>, TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(self.shared.inbound.lock().pop_front())
    }

    fn set_monitoring(&self, enabled: bool) {
        self.shared.monitoring.store(enabled, Ordering::SeqCst);
        if enabled {
            let present = self.shared.hub.is_present(&self.shared.info.path);
            self.shared.sample_presence(present);
        }
    }

    fn read_report(&self, callback: ReportCallback) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        // Queued reports wait for the next push; delivery never happens here
        *self.shared.pending.lock() = Some(callback);
        Ok(())
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.shared.subscribers.lock().add(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscribers.lock().remove(id);
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.monitoring.store(false, Ordering::SeqCst);
        self.shared.pending.lock().take();
        self.shared.inbound.lock().clear();
        self.shared.subscribers.lock().clear();
        debug!("Closed simulated link {}", self.shared.info.path);
        Ok(())
    }
}
