//! hidapi-backed device link

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::hotplug::{run_presence_monitor, HandleAction, LinkPresence};
use crate::reader::{run_report_reader_loop, ReaderConfig, ReportSlot};
use crate::types::{DeviceCandidate, EventHandler, ReportCallback, SubscriptionId, Subscribers};
use crate::DeviceLink;

/// Timing knobs for one link
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkTiming {
    /// Per-read timeout used by the listener thread
    pub reader_timeout_ms: i32,
    /// Presence polling interval
    pub hotplug_poll_ms: u64,
}

/// HID link for one opened interface
///
/// The hidapi handle sits behind a mutex shared by the caller's writes and
/// reads, the listener thread and the presence monitor. The monitor polls
/// the device list for the whole life of the link: removal or a failed I/O
/// call leaves the handle stale, and only a monitoring link reopens the same
/// path when the device returns.
pub struct HidLink {
    shared: Arc<LinkShared>,
}

struct LinkShared {
    api: Arc<Mutex<HidApi>>,
    info: DeviceCandidate,
    path: CString,
    device: Mutex<Option<HidDevice>>,
    presence: Mutex<LinkPresence>,
    slot: Arc<ReportSlot>,
    subscribers: Mutex<Subscribers>,
    monitoring: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl HidLink {
    /// Open `info.path` and start the listener and presence threads
    pub(crate) fn open(
        api: Arc<Mutex<HidApi>>,
        info: DeviceCandidate,
        timing: LinkTiming,
    ) -> Result<Self, TransportError> {
        let path = CString::new(info.path.as_str())
            .map_err(|e| TransportError::Internal(format!("Invalid device path: {e}")))?;
        let device = api.lock().open_path(&path)?;

        let shared = Arc::new(LinkShared {
            api,
            info,
            path,
            device: Mutex::new(Some(device)),
            presence: Mutex::new(LinkPresence::new()),
            slot: Arc::new(ReportSlot::new()),
            subscribers: Mutex::new(Subscribers::default()),
            monitoring: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        spawn_report_reader(&shared, timing.reader_timeout_ms)?;
        if let Err(e) = spawn_presence_monitor(&shared, timing.hotplug_poll_ms) {
            shared.shutdown.store(true, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            "Opened HID link {:04X}:{:04X} page={:04X} usage={:04X}",
            shared.info.vendor_id, shared.info.product_id, shared.info.usage_page, shared.info.usage
        );

        Ok(Self { shared })
    }
}

impl LinkShared {
    /// Check whether our path is still in the platform device list
    fn present(&self) -> bool {
        let mut api = self.api.lock();
        if let Err(e) = api.refresh_devices() {
            debug!("Failed to refresh device list: {}", e);
            return false;
        }
        let found = api.device_list().any(|d| d.path() == self.path.as_c_str());
        found
    }

    fn is_connected(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst) && self.presence.lock().is_connected()
    }

    /// Drop the handle after a failed I/O call
    fn mark_stale(&self, e: &hidapi::HidError) {
        if self.presence.lock().mark_stale() {
            warn!("HID I/O failed, handle marked stale: {}", e);
        }
        self.device.lock().take();
    }

    fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let result = {
            let device = self.device.lock();
            let device = device.as_ref().ok_or(TransportError::Disconnected)?;
            debug!("Writing report: {:02X?}", &buf[..buf.len().min(16)]);
            device.write(buf)
        };
        result.map_err(|e| {
            self.mark_stale(&e);
            e.into()
        })
    }

    fn read(&self, timeout_ms: i32) -> Result<Option<Vec<u8>>, TransportError> {
        // hidapi strips the report id of unnumbered reports; put it back so
        // inbound reports share the outbound framing
        let mut buf = vec![0u8; self.info.input_report_len.max(2)];
        let result = {
            let device = self.device.lock();
            let device = device.as_ref().ok_or(TransportError::Disconnected)?;
            device.read_timeout(&mut buf[1..], timeout_ms)
        };
        let len = result.map_err(|e| {
            self.mark_stale(&e);
            TransportError::from(e)
        })?;
        if len == 0 {
            return Ok(None);
        }
        buf.truncate(len + 1);
        Ok(Some(buf))
    }

    fn on_presence_sample(&self, present: bool) {
        let monitoring = self.monitoring.load(Ordering::SeqCst);
        let action = self.presence.lock().sample(present, monitoring);
        match action {
            Some(HandleAction::Release) => {
                if self.device.lock().take().is_some() {
                    info!("HID device removed, handle released");
                }
            }
            Some(HandleAction::Reopen) => self.reopen(),
            None => {}
        }

        let event = self.presence.lock().event(monitoring);
        if let Some(event) = event {
            debug!("Presence changed: {:?}", event);
            let handlers = self.subscribers.lock().snapshot();
            for handler in handlers {
                handler(event);
            }
        }
    }

    fn reopen(&self) {
        let reopened = self.api.lock().open_path(&self.path);
        match reopened {
            Ok(dev) => {
                info!("HID device re-attached, handle reopened");
                *self.device.lock() = Some(dev);
            }
            Err(e) => {
                warn!("HID device re-attached but reopen failed: {}", e);
                self.presence.lock().mark_stale();
            }
        }
    }
}

fn spawn_report_reader(shared: &Arc<LinkShared>, read_timeout_ms: i32) -> Result<(), TransportError> {
    let reader_shared = shared.clone();
    let slot = shared.slot.clone();
    let shutdown = shared.shutdown.clone();
    let config = ReaderConfig {
        read_timeout_ms,
        ..ReaderConfig::default()
    };
    std::thread::Builder::new()
        .name("hid-report-reader".into())
        .spawn(move || {
            run_report_reader_loop(
                move |timeout_ms| reader_shared.read(timeout_ms),
                slot,
                shutdown,
                config,
            );
        })
        .map(|_| ())
        .map_err(|e| TransportError::Internal(format!("Failed to spawn reader thread: {e}")))
}

fn spawn_presence_monitor(shared: &Arc<LinkShared>, poll_ms: u64) -> Result<(), TransportError> {
    let sampler = shared.clone();
    let notify = shared.clone();
    let shutdown = shared.shutdown.clone();
    let poll = Duration::from_millis(poll_ms);
    std::thread::Builder::new()
        .name("hid-presence-monitor".into())
        .spawn(move || {
            run_presence_monitor(
                move || sampler.present(),
                move |present| notify.on_presence_sample(present),
                shutdown,
                poll,
            );
        })
        .map(|_| ())
        .map_err(|e| TransportError::Internal(format!("Failed to spawn presence monitor: {e}")))
}

impl DeviceLink for HidLink {
    fn info(&self) -> &DeviceCandidate {
        &self.shared.info
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn write(&self, report: &[u8]) -> Result<usize, TransportError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let mut buf = report.to_vec();
        if buf.len() < self.shared.info.output_report_len {
            buf.resize(self.shared.info.output_report_len, 0);
        }

        let written = self.shared.write(&buf)?;
        if written < buf.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(written)
    }

    fn read(&self, timeout_ms: i32) -> Result<Option<Vec<u8>>, TransportError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared.read(timeout_ms)
    }

    #[cfg(feature = "hotplug")]
    fn set_monitoring(&self, enabled: bool) {
        self.shared.monitoring.store(enabled, Ordering::SeqCst);
    }

    #[cfg(not(feature = "hotplug"))]
    fn set_monitoring(&self, enabled: bool) {
        if enabled {
            debug!("Built without hotplug support, attach/remove events disabled");
        }
    }

    fn read_report(&self, callback: ReportCallback) -> Result<(), TransportError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.shared.slot.arm(callback) {
            debug!("Replaced pending report callback");
        }
        Ok(())
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.shared.subscribers.lock().add(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscribers.lock().remove(id);
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.monitoring.store(false, Ordering::SeqCst);
        self.shared.slot.clear();
        self.shared.subscribers.lock().clear();
        // HidDevice closes on drop
        self.shared.device.lock().take();
        debug!("HID link closed");
        Ok(())
    }
}

impl Drop for HidLink {
    fn drop(&mut self) {
        // Signal shutdown to the reader and monitor threads
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.slot.clear();
        debug!("HidLink dropped, signaling background threads");
    }
}
