//! Single-outstanding report reader
//!
//! A link keeps at most one armed [`ReportCallback`] in a [`ReportSlot`].
//! The reader loop sleeps until a callback is armed, reads until a report
//! arrives, hands the report to that callback and goes back to sleep. The
//! callback re-arms the slot itself if it wants the next report, so delivery
//! never outruns the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::types::ReportCallback;

/// Holder for the one armed callback
#[derive(Default)]
pub struct ReportSlot {
    pending: Mutex<Option<ReportCallback>>,
    armed: Condvar,
}

impl ReportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot, replacing any callback that is still waiting
    ///
    /// # Returns
    /// `true` if a pending callback was replaced
    pub fn arm(&self, callback: ReportCallback) -> bool {
        let replaced = self.pending.lock().replace(callback).is_some();
        self.armed.notify_all();
        replaced
    }

    /// Take the armed callback, disarming the slot
    pub fn take(&self) -> Option<ReportCallback> {
        self.pending.lock().take()
    }

    /// Drop any armed callback and wake waiters
    pub fn clear(&self) {
        self.pending.lock().take();
        self.armed.notify_all();
    }

    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Wait up to `timeout` for the slot to be armed
    pub fn wait_armed(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            self.armed.wait_for(&mut pending, timeout);
        }
        pending.is_some()
    }
}

/// Configuration for the reader loop
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Name for logging
    pub name: &'static str,
    /// Per-read timeout; bounds how long the handle stays locked per attempt
    pub read_timeout_ms: i32,
    /// How long to wait for the slot to be armed before re-checking shutdown
    pub idle_wait_ms: u64,
    /// Back-off after a read error
    pub error_sleep_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            name: "HID",
            read_timeout_ms: 50,
            idle_wait_ms: 100,
            error_sleep_ms: 100,
        }
    }
}

/// Run the reader loop until `shutdown` is set
///
/// `read` performs one timed read and returns `None` on timeout.
pub fn run_report_reader_loop<F>(
    mut read: F,
    slot: Arc<ReportSlot>,
    shutdown: Arc<AtomicBool>,
    config: ReaderConfig,
) where
    F: FnMut(i32) -> Result<Option<Vec<u8>>, TransportError>,
{
    debug!("{} report reader thread started", config.name);
    let idle_wait = Duration::from_millis(config.idle_wait_ms);
    // Only the first error of a run is worth a warning
    let mut failing = false;

    while !shutdown.load(Ordering::Relaxed) {
        if !slot.wait_armed(idle_wait) {
            continue;
        }

        match read(config.read_timeout_ms) {
            Ok(Some(report)) => {
                failing = false;
                debug!(
                    "{} report reader got {} bytes: {:02X?}",
                    config.name,
                    report.len(),
                    &report[..report.len().min(16)]
                );
                // Disarmed between wait and read: the listener was turned off
                match slot.take() {
                    Some(callback) => callback(report),
                    None => debug!("{} report dropped, no listener armed", config.name),
                }
            }
            Ok(None) => {
                // Timeout, loop to re-check shutdown
                failing = false;
            }
            Err(TransportError::Disconnected) => {
                // No handle while the device is unplugged or stale
                std::thread::sleep(Duration::from_millis(config.error_sleep_ms));
            }
            Err(e) => {
                if failing {
                    debug!("{} report reader error: {}", config.name, e);
                } else {
                    warn!("{} report reader error: {}", config.name, e);
                    failing = true;
                }
                std::thread::sleep(Duration::from_millis(config.error_sleep_ms));
            }
        }
    }

    debug!("{} report reader thread exiting", config.name);
}
