//! Polling hot-plug detection
//!
//! hidapi has no portable arrival/removal notification, so presence is
//! sampled on a timer and edges are turned into [`LinkEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::types::LinkEvent;

/// Edge detector for device presence
///
/// Starts out "absent", so the first sample of a present device reports
/// [`LinkEvent::Attached`]. Consumers that open a device and then enable
/// monitoring always see that initial attach.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    was_present: bool,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one presence sample, returning the edge if the state changed
    pub fn update(&mut self, present: bool) -> Option<LinkEvent> {
        if present == self.was_present {
            return None;
        }
        self.was_present = present;
        Some(if present {
            LinkEvent::Attached
        } else {
            LinkEvent::Removed
        })
    }

    pub fn was_present(&self) -> bool {
        self.was_present
    }
}

/// What a link must do with its OS handle after a presence sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleAction {
    /// Device went away: drop the handle
    Release,
    /// Device is back and the link is monitoring: open the path again
    Reopen,
}

/// Presence bookkeeping for one opened link
///
/// Removal always makes the handle stale, monitoring or not. Only a
/// monitoring link reopens its handle when the device returns; any other
/// link stays stale until it is replaced. Attach/remove events follow the
/// effective connection state and are only produced while monitoring.
#[derive(Debug, Clone)]
pub struct LinkPresence {
    device_present: bool,
    handle_live: bool,
    reported: PresenceTracker,
}

impl Default for LinkPresence {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPresence {
    /// State of a link whose handle was just opened
    pub fn new() -> Self {
        Self {
            device_present: true,
            handle_live: true,
            reported: PresenceTracker::new(),
        }
    }

    /// Feed one presence sample of the device path
    pub fn sample(&mut self, present: bool, monitoring: bool) -> Option<HandleAction> {
        if present == self.device_present {
            return None;
        }
        self.device_present = present;
        if !present && self.handle_live {
            self.handle_live = false;
            Some(HandleAction::Release)
        } else if present && monitoring && !self.handle_live {
            self.handle_live = true;
            Some(HandleAction::Reopen)
        } else {
            None
        }
    }

    /// Mark the handle unusable after an I/O error or a failed reopen
    ///
    /// # Returns
    /// `true` if the handle was live until now
    pub fn mark_stale(&mut self) -> bool {
        std::mem::replace(&mut self.handle_live, false)
    }

    /// Device is plugged in and the handle still works
    pub fn is_connected(&self) -> bool {
        self.device_present && self.handle_live
    }

    /// Attach/remove edge of the connection state, while monitoring
    pub fn event(&mut self, monitoring: bool) -> Option<LinkEvent> {
        if !monitoring {
            return None;
        }
        let connected = self.is_connected();
        self.reported.update(connected)
    }
}

/// Sample `is_present` every `poll` until `shutdown`, handing each sample to
/// `on_sample`
pub fn run_presence_monitor<P, H>(
    mut is_present: P,
    mut on_sample: H,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
) where
    P: FnMut() -> bool,
    H: FnMut(bool),
{
    debug!("Presence monitor thread started");

    while !shutdown.load(Ordering::Relaxed) {
        on_sample(is_present());
        std::thread::sleep(poll);
    }

    debug!("Presence monitor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_first_present_sample_is_an_attach() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.update(true), Some(LinkEvent::Attached));
        assert_eq!(tracker.update(true), None);
        assert_eq!(tracker.update(false), Some(LinkEvent::Removed));
        assert_eq!(tracker.update(false), None);
        assert_eq!(tracker.update(true), Some(LinkEvent::Attached));
    }

    #[test]
    fn test_absent_device_reports_nothing_initially() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.update(false), None);
        assert!(!tracker.was_present());
    }

    #[test]
    fn test_unplug_without_monitoring_leaves_handle_stale() {
        let mut presence = LinkPresence::new();
        assert!(presence.is_connected());

        assert_eq!(presence.sample(false, false), Some(HandleAction::Release));
        assert!(!presence.is_connected());

        // Same path comes back, but nobody was watching
        assert_eq!(presence.sample(true, false), None);
        assert!(!presence.is_connected());
        assert_eq!(presence.event(false), None);

        // Turning monitoring on later does not revive the old handle
        assert_eq!(presence.sample(true, true), None);
        assert!(!presence.is_connected());
        assert_eq!(presence.event(true), None);
    }

    #[test]
    fn test_monitoring_link_reopens_and_reports_edges() {
        let mut presence = LinkPresence::new();
        assert_eq!(presence.sample(true, true), None);
        assert_eq!(presence.event(true), Some(LinkEvent::Attached));

        assert_eq!(presence.sample(false, true), Some(HandleAction::Release));
        assert_eq!(presence.event(true), Some(LinkEvent::Removed));

        assert_eq!(presence.sample(true, true), Some(HandleAction::Reopen));
        assert!(presence.is_connected());
        assert_eq!(presence.event(true), Some(LinkEvent::Attached));
    }

    #[test]
    fn test_io_error_marks_handle_stale() {
        let mut presence = LinkPresence::new();
        assert!(presence.mark_stale());
        assert!(!presence.mark_stale());
        assert!(!presence.is_connected());

        // Device never left, so there is no edge to reopen on
        assert_eq!(presence.sample(true, true), None);
        assert!(!presence.is_connected());
    }

    #[test]
    fn test_monitor_samples_until_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let shutdown = shutdown.clone();
            let samples = samples.clone();
            std::thread::spawn(move || {
                run_presence_monitor(
                    || true,
                    move |present| samples.lock().push(present),
                    shutdown,
                    Duration::from_millis(2),
                )
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        let samples = samples.lock();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|p| *p));
    }
}
