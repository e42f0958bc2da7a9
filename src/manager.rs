//! Device-interface lifecycle manager
//!
//! [`ConnectionManager`] owns at most one open [`DeviceLink`] for a fixed
//! [`DeviceIdentity`]. It selects and opens the device, keeps the
//! single-outstanding report listener armed while listening, surfaces
//! attach/remove events and quietly reconnects before I/O when asked to.
//!
//! Every transport fault stops at this boundary: operations report through
//! the [`LogSink`] and return `bool` or nothing.
//!
//! # Locking
//!
//! One mutex guards the link slot and the Active/Listening flags. Link I/O
//! (write, blocking read, close) runs on a cloned handle outside that lock,
//! and the report sink is always called without it held. Report callbacks
//! carry the generation of the link they were armed on, so a callback that
//! races a close or a reconnect finds a newer generation and drops out.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use hidlink_transport::{
    DeviceBackend, DeviceCandidate, EventHandler, LinkEvent, SharedLink, SubscriptionId,
    TransportError,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::codec::{decode_report, encode_report, DecodedReport, OutboundCommand};
use crate::config::store_identity;
use crate::identity::DeviceIdentity;
use crate::log_sink::{LogSink, Severity};

/// Receiver of decoded inbound reports
pub type ReportSink = Arc<dyn Fn(DecodedReport) + Send + Sync>;

/// Default timeout of [`ConnectionManager::receive`]
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 1000;

/// Construction options for [`ConnectionManager`]
#[derive(Clone)]
pub struct ManagerOptions {
    /// Timeout of a manual `receive`
    pub read_timeout_ms: i32,
    /// Where decoded reports go, from both the listener and `receive`
    pub report_sink: Option<ReportSink>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            report_sink: None,
        }
    }
}

/// Lifecycle manager for one device identity
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    identity: DeviceIdentity,
    backend: Arc<dyn DeviceBackend>,
    log: Arc<dyn LogSink>,
    options: ManagerOptions,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    link: Option<SharedLink>,
    subscription: Option<SubscriptionId>,
    /// Bumped on every open and close; tags armed report callbacks
    generation: u64,
    active: bool,
    listening: bool,
    /// Attach events seen on the current link
    attach_count: Arc<AtomicU32>,
}

/// Link opened by `connect` but not yet swapped in
struct StagedLink {
    link: SharedLink,
    subscription: SubscriptionId,
    attach_count: Arc<AtomicU32>,
}

impl StagedLink {
    fn discard(self) {
        self.link.unsubscribe(self.subscription);
        self.link.set_monitoring(false);
        if let Err(e) = self.link.close() {
            debug!("Failed to close discarded link: {}", e);
        }
    }
}

impl ConnectionManager {
    pub fn new(
        identity: DeviceIdentity,
        backend: Arc<dyn DeviceBackend>,
        log: Arc<dyn LogSink>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                backend,
                log,
                options,
                state: Mutex::new(LinkState::default()),
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    /// The interface has been opened and not explicitly closed
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// The report listener is armed
    pub fn is_listening(&self) -> bool {
        self.shared.state.lock().listening
    }

    /// The platform reports a live device handle
    pub fn is_connected(&self) -> bool {
        self.shared.current_link().is_some_and(|l| l.is_connected())
    }

    /// Attach events seen since the current link was opened
    pub fn attach_count(&self) -> u32 {
        self.shared.state.lock().attach_count.load(Ordering::SeqCst)
    }

    /// Find, open and take over the device
    ///
    /// Any link already held is replaced only once the new one is fully set
    /// up; on failure the previous state is left untouched. When a device was
    /// connected and `persist_path` is given, the identity is stored there
    /// afterwards; a failed store is logged and does not undo the connection.
    pub fn connect(&self, enable_listening: bool, persist_path: Option<&Path>) {
        if !self.shared.connect(enable_listening) {
            return;
        }
        if let Some(path) = persist_path {
            if let Err(e) = store_identity(path, &self.shared.identity) {
                self.shared.log(
                    &format!(
                        "Error writing {} configuration to file. {}",
                        self.shared.name(),
                        e
                    ),
                    Severity::Error,
                );
            }
        }
    }

    /// Gate for I/O: `true` iff the device is connected
    ///
    /// With `retry`, a disconnected manager makes exactly one connect
    /// attempt, keeping its current listening flag.
    pub fn check_connection(&self, retry: bool) -> bool {
        if self.is_connected() {
            return true;
        }
        if retry {
            debug!("Not connected with {}, reconnecting", self.shared.name());
            self.shared.connect(self.is_listening());
            if self.is_connected() {
                return true;
            }
        }
        self.shared.log(
            &format!("Not connected with {}", self.shared.name()),
            Severity::Error,
        );
        false
    }

    /// Arm or disarm the report listener
    ///
    /// Only edges do anything. Arming enables attach/remove monitoring and
    /// submits one read; disarming turns monitoring off and lets the pending
    /// read drop its report.
    pub fn set_listening(&self, enabled: bool) {
        let mut state = self.shared.state.lock();
        if state.listening == enabled {
            return;
        }
        let Some(link) = state.link.clone() else {
            debug!("Listening unchanged, interface is not active");
            return;
        };

        state.listening = enabled;
        link.set_monitoring(enabled);
        if enabled {
            if let Err(e) = Shared::arm(&self.shared, &link, state.generation) {
                state.listening = false;
                link.set_monitoring(false);
                self.shared.log(
                    &format!(
                        "Error listening for {} reports. {}",
                        self.shared.name(),
                        e
                    ),
                    Severity::Error,
                );
            }
        }
        debug!("Listening {}", if state.listening { "on" } else { "off" });
    }

    /// Encode and write one action
    ///
    /// # Returns
    /// `true` iff the transport accepted the report
    pub fn send(&self, action: u8, context: Option<u8>, retry: bool) -> bool {
        if !self.check_connection(retry) {
            return false;
        }
        let Some(link) = self.shared.current_link() else {
            return false;
        };

        let len = link.output_report_len().saturating_sub(1);
        let report = match encode_report(len, &OutboundCommand::new(action, context)) {
            Ok(report) => report,
            Err(e) => {
                self.shared.log(
                    &format!("Could not send data to {}. {}", self.shared.name(), e),
                    Severity::Error,
                );
                return false;
            }
        };

        match link.write(&report) {
            Ok(written) => {
                debug!("Sent {} bytes to {}", written, self.shared.name());
                true
            }
            Err(e) => {
                self.shared.log(
                    &format!("Error sending data to {}. {}", self.shared.name(), e),
                    Severity::Error,
                );
                false
            }
        }
    }

    /// Blocking read of one report, handed to the report sink
    ///
    /// # Returns
    /// `true` iff a report arrived within the configured timeout
    pub fn receive(&self, retry: bool) -> bool {
        if !self.check_connection(retry) {
            return false;
        }
        let Some(link) = self.shared.current_link() else {
            return false;
        };

        match link.read(self.shared.options.read_timeout_ms) {
            Ok(Some(report)) => {
                self.shared.deliver(&report);
                true
            }
            Ok(None) => {
                self.shared.log(
                    &format!("Could not read data from {}", self.shared.name()),
                    Severity::Error,
                );
                false
            }
            Err(e) => {
                self.shared.log(
                    &format!("Error receiving data from {}. {}", self.shared.name(), e),
                    Severity::Error,
                );
                false
            }
        }
    }

    /// Release the link; a no-op when none is held
    pub fn close(&self) {
        let (link, subscription) = {
            let mut state = self.shared.state.lock();
            let Some(link) = state.link.take() else {
                return;
            };
            state.active = false;
            state.listening = false;
            state.generation += 1;
            state.attach_count.store(0, Ordering::SeqCst);
            (link, state.subscription.take())
        };

        if let Some(id) = subscription {
            link.unsubscribe(id);
        }
        link.set_monitoring(false);
        if let Err(e) = link.close() {
            self.shared.log(
                &format!(
                    "Error closing interface with {}. {}",
                    self.shared.name(),
                    e
                ),
                Severity::Error,
            );
            return;
        }
        self.shared.log(
            &format!("Closing interface with {}", self.shared.name()),
            Severity::Info,
        );
    }
}

impl Shared {
    fn name(&self) -> &str {
        self.identity.display_name()
    }

    fn log(&self, message: &str, severity: Severity) {
        self.log.log(message, severity);
    }

    fn current_link(&self) -> Option<SharedLink> {
        self.state.lock().link.clone()
    }

    /// Connect without persistence; `true` if a link was swapped in
    fn connect(self: &Arc<Self>, enable_listening: bool) -> bool {
        let mut state = self.state.lock();

        let staged = match self.stage_link() {
            Ok(Some(staged)) => staged,
            Ok(None) => {
                self.log(
                    &format!("Could not find '{}' HID hardware", self.name()),
                    Severity::Error,
                );
                return false;
            }
            Err(e) => {
                self.log(
                    &format!("Error connecting to {}. {}", self.name(), e),
                    Severity::Error,
                );
                return false;
            }
        };

        let generation = state.generation + 1;
        if enable_listening {
            staged.link.set_monitoring(true);
            if let Err(e) = Self::arm(self, &staged.link, generation) {
                staged.discard();
                self.log(
                    &format!("Error connecting to {}. {}", self.name(), e),
                    Severity::Error,
                );
                return false;
            }
        }

        let old_link = state.link.replace(staged.link);
        let old_subscription = state.subscription.replace(staged.subscription);
        state.generation = generation;
        state.active = true;
        state.listening = enable_listening;
        state.attach_count = staged.attach_count;
        drop(state);

        if let Some(old) = old_link {
            if let Some(id) = old_subscription {
                old.unsubscribe(id);
            }
            old.set_monitoring(false);
            if let Err(e) = old.close() {
                debug!("Failed to close replaced link: {}", e);
            }
        }

        self.log(
            &format!("Connected with {}", self.name()),
            Severity::Info,
        );
        true
    }

    /// Enumerate, select and open; subscribes to attach/remove events
    fn stage_link(&self) -> Result<Option<StagedLink>, TransportError> {
        let candidates = self.backend.enumerate(&self.identity.filter())?;
        let Some(candidate) = select_candidate(&self.identity, &candidates) else {
            return Ok(None);
        };
        debug!(
            "Selected {} at {} (page={:04X} usage={:04X})",
            self.name(),
            candidate.path,
            candidate.usage_page,
            candidate.usage
        );

        let link = self.backend.open(candidate)?;
        let attach_count = Arc::new(AtomicU32::new(0));
        let subscription = link.subscribe(self.event_handler(attach_count.clone()));
        Ok(Some(StagedLink {
            link,
            subscription,
            attach_count,
        }))
    }

    /// Attach/remove handler; runs on the link's event thread without locking
    fn event_handler(&self, attach_count: Arc<AtomicU32>) -> EventHandler {
        let log = self.log.clone();
        let name = self.name().to_string();
        Arc::new(move |event| match event {
            LinkEvent::Attached => {
                let count = attach_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count > 1 {
                    log.log(&format!("{} attached", name), Severity::Info);
                } else {
                    debug!("Initial attach of {} suppressed", name);
                }
            }
            LinkEvent::Removed => log.log(&format!("{} removed", name), Severity::Info),
        })
    }

    /// Submit one read whose report comes back through `on_report`
    fn arm(
        self: &Arc<Self>,
        link: &SharedLink,
        generation: u64,
    ) -> Result<(), TransportError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        link.read_report(Box::new(move |report| {
            if let Some(shared) = weak.upgrade() {
                shared.on_report(generation, report);
            }
        }))
    }

    fn on_report(self: &Arc<Self>, generation: u64, report: Vec<u8>) {
        let link = {
            let state = self.state.lock();
            if state.generation != generation || !state.listening {
                debug!("Dropping report, listener is off");
                return;
            }
            match &state.link {
                Some(link) => link.clone(),
                None => return,
            }
        };
        if !link.is_connected() {
            debug!("Dropping report, device is not connected");
            return;
        }

        self.deliver(&report);

        let state = self.state.lock();
        if state.generation != generation || !state.listening {
            return;
        }
        if let Err(e) = Self::arm(self, &link, generation) {
            warn!("Failed to re-arm report listener: {}", e);
        }
    }

    fn deliver(&self, report: &[u8]) {
        let decoded = decode_report(report);
        debug!(
            "Report from {}: action={:?} context={:?}",
            self.name(),
            decoded.action,
            decoded.context
        );
        if let Some(sink) = &self.options.report_sink {
            sink(decoded);
        }
    }
}

/// First candidate whose usage matches when the identity filters on usage,
/// otherwise the first candidate
fn select_candidate<'a>(
    identity: &DeviceIdentity,
    candidates: &'a [DeviceCandidate],
) -> Option<&'a DeviceCandidate> {
    match identity.usage_filter() {
        Some((_, usage)) => candidates.iter().find(|c| c.usage == usage),
        None => candidates.first(),
    }
}
