//! Integration tests for the connection lifecycle.
//!
//! These drive `ConnectionManager` against the simulated HID bus: device
//! selection, the reconnect gate, the single-outstanding report listener,
//! attach/remove reporting and close.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use common::{pad_candidate, pad_identity, Fixture};
use hidlink::config::HidConfig;
use hidlink::log_sink::Severity;
use hidlink::manager::ReportSink;
use hidlink::DeviceIdentity;
use hidlink_transport::SimHub;
use parking_lot::Mutex;

// ── Connect ──

#[test]
fn connect_listen_and_send_pad_scenario() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);

    assert!(fx.manager.is_active());
    assert!(fx.manager.is_connected());
    assert!(fx.manager.is_listening());
    assert!(fx.log.contains("Connected with Pad"));

    assert!(fx.manager.send(1, Some(5), false));
    let writes = fx.hub.writes();
    assert_eq!(writes.len(), 1);
    // 3-byte report, padded by the link to the 4-byte output length
    assert_eq!(&writes[0][..3], &[0, 1, 5]);
    assert_eq!(writes[0].len(), 4);
}

#[test]
fn connect_without_match_stays_inactive() {
    let fx = Fixture::new(pad_identity(), vec![]);
    fx.manager.connect(true, None);

    assert!(!fx.manager.is_active());
    assert!(!fx.manager.is_listening());
    assert!(!fx.manager.is_connected());
    assert_eq!(fx.hub.opens(), 0);
    assert_eq!(
        fx.log.last(),
        Some(("Could not find 'Pad' HID hardware".to_string(), Severity::Error))
    );
}

#[test]
fn connect_selects_candidate_by_usage() {
    let devices: Vec<_> = [0x60, 0x61, 0x62]
        .into_iter()
        .map(|usage| SimHub::candidate(0xCEEB, 0x0007, 0xFF60, usage, 33))
        .collect();
    let identity = DeviceIdentity::new("bigKNOBv2", 0xCEEB, 0x0007).with_usage(0xFF60, 0x61);
    let fx = Fixture::new(identity, devices.clone());

    fx.manager.connect(false, None);
    assert!(fx.manager.is_connected());

    // Only losing the second interface takes the link down
    fx.hub.unplug(&devices[0].path);
    fx.hub.unplug(&devices[2].path);
    assert!(fx.manager.is_connected());
    fx.hub.unplug(&devices[1].path);
    assert!(!fx.manager.is_connected());
}

#[test]
fn connect_without_usage_takes_first_candidate() {
    let first = SimHub::candidate(0x1234, 0x5678, 0x0001, 0x06, 9);
    let second = pad_candidate();
    let fx = Fixture::new(
        DeviceIdentity::new("Pad", 0x1234, 0x5678),
        vec![first, second],
    );

    fx.manager.connect(false, None);
    assert!(fx.manager.send(1, None, false));
    // First candidate has an 8-byte report budget
    assert_eq!(fx.hub.writes()[0].len(), 9);
}

#[test]
fn failed_connect_leaves_previous_link_in_place() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);

    fx.hub.set_fail_open(true);
    fx.manager.connect(true, None);
    assert!(fx.log.contains("Error connecting to Pad"));

    assert!(fx.manager.is_active());
    assert!(fx.manager.is_listening());
    assert!(fx.manager.send(1, None, false));
    assert_eq!(fx.hub.open_links(), 1);
}

#[test]
fn reconnect_replaces_and_closes_old_link() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);
    fx.manager.connect(true, None);

    assert_eq!(fx.hub.opens(), 2);
    assert_eq!(fx.hub.open_links(), 1);
    assert!(fx.manager.is_listening());
}

// ── Persistence ──

#[test]
fn connect_persists_identity_only_when_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = HidConfig::path_in(dir.path());

    let missing = Fixture::new(pad_identity(), vec![]);
    missing.manager.connect(true, Some(&path));
    assert!(!path.exists());

    let fx = Fixture::pad();
    fx.manager.connect(true, Some(&path));
    let stored = HidConfig::load(&path).unwrap();
    assert_eq!(stored.identity().unwrap(), Some(pad_identity()));
}

#[test]
fn persist_failure_does_not_undo_connection() {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::pad();

    // A directory cannot be read or written as the config file
    fx.manager.connect(true, Some(dir.path()));
    assert!(fx.log.contains("Error writing Pad configuration to file"));
    assert!(fx.manager.is_active());
    assert!(fx.manager.is_connected());
}

// ── Send / Receive gate ──

#[test]
fn send_before_connect_fails_without_io() {
    let fx = Fixture::pad();

    assert!(!fx.manager.send(1, Some(5), false));
    assert!(fx.hub.writes().is_empty());
    assert_eq!(fx.hub.enumerations(), 0);
    assert!(fx.log.contains("Not connected with Pad"));
}

#[test]
fn send_with_retry_reconnects_exactly_once_when_device_is_gone() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);
    fx.hub.unplug(&pad_candidate().path);
    assert!(!fx.manager.is_connected());
    // Still waiting to reconnect
    assert!(fx.manager.is_active());

    assert!(!fx.manager.send(1, None, true));
    assert_eq!(fx.hub.enumerations(), 2);
    assert!(fx.hub.writes().is_empty());
}

#[test]
fn send_with_retry_recovers_stale_link() {
    let fx = Fixture::pad();
    fx.manager.connect(false, None);
    let path = pad_candidate().path;
    fx.hub.unplug(&path);
    fx.hub.plug(&path);
    // Not monitoring, so the old handle never came back
    assert!(!fx.manager.is_connected());

    assert!(fx.manager.send(1, Some(2), true));
    assert_eq!(fx.hub.enumerations(), 2);
    assert_eq!(fx.hub.opens(), 2);
    assert_eq!(&fx.hub.writes()[0][..3], &[0, 1, 2]);
    // Listening flag carried over from before the drop
    assert!(!fx.manager.is_listening());
}

#[test]
fn send_with_retry_reopens_after_failed_write() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);

    fx.hub.set_fail_write(true);
    assert!(!fx.manager.send(1, None, false));
    fx.hub.set_fail_write(false);
    // The device never left, but the failed handle is not trusted again
    assert!(!fx.manager.is_connected());

    assert!(fx.manager.send(1, Some(4), true));
    assert_eq!(fx.hub.opens(), 2);
    assert_eq!(fx.hub.open_links(), 1);
    assert_eq!(&fx.hub.writes()[0][..3], &[0, 1, 4]);
    assert!(fx.manager.is_listening());
}

#[test]
fn check_connection_without_retry_only_logs() {
    let fx = Fixture::pad();
    assert!(!fx.manager.check_connection(false));
    assert_eq!(fx.hub.enumerations(), 0);

    fx.manager.connect(false, None);
    fx.log.clear();
    assert!(fx.manager.check_connection(false));
    assert!(fx.log.entries().is_empty());
}

#[test]
fn send_context_that_does_not_fit_is_rejected() {
    // 2-byte report: room for the action but not the context
    let fx = Fixture::new(
        pad_identity(),
        vec![SimHub::candidate(0x1234, 0x5678, 0xFF00, 0x01, 3)],
    );
    fx.manager.connect(false, None);

    assert!(!fx.manager.send(1, Some(5), false));
    assert!(fx.hub.writes().is_empty());
    assert!(fx.log.contains("Could not send data to Pad"));

    assert!(fx.manager.send(1, None, false));
    assert_eq!(&fx.hub.writes()[0][..2], &[0, 1]);
}

#[test]
fn write_failure_is_logged() {
    let fx = Fixture::pad();
    fx.manager.connect(false, None);
    fx.hub.set_fail_write(true);

    assert!(!fx.manager.send(1, None, false));
    assert!(fx.log.contains("Error sending data to Pad"));
}

#[test]
fn receive_reads_one_report() {
    let fx = Fixture::pad();
    fx.manager.connect(false, None);
    fx.hub.push_report(&pad_candidate().path, &[0, 1, 9]);

    assert!(fx.manager.receive(false));
    let reports = fx.reports.all();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].action, Some(1));
    assert_eq!(reports[0].context, Some(9));

    assert!(!fx.manager.receive(false));
    assert!(fx.log.contains("Could not read data from Pad"));
}

#[test]
fn receive_before_connect_fails() {
    let fx = Fixture::pad();
    assert!(!fx.manager.receive(false));
    assert_eq!(fx.reports.len(), 0);
}

// ── Listening ──

#[test]
fn listener_delivers_each_report_and_rearms() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);
    let path = pad_candidate().path;
    assert!(fx.hub.has_pending_read(&path));

    fx.hub.push_report(&path, &[0, 1, 2]);
    fx.hub.push_report(&path, &[0, 1, 3]);

    let contexts: Vec<_> = fx.reports.all().iter().map(|r| r.context).collect();
    assert_eq!(contexts, vec![Some(2), Some(3)]);
    assert!(fx.hub.has_pending_read(&path));
}

#[test]
fn listening_toggle_leaves_connection_alone() {
    let fx = Fixture::pad();
    fx.manager.connect(false, None);
    assert!(!fx.manager.is_listening());

    fx.manager.set_listening(true);
    assert!(fx.manager.is_listening());
    fx.manager.set_listening(false);
    assert!(!fx.manager.is_listening());

    assert!(fx.manager.is_connected());
    assert!(fx.manager.is_active());
    assert_eq!(fx.reports.len(), 0);

    // The read still pending from the armed period drops its report
    let path = pad_candidate().path;
    fx.hub.push_report(&path, &[0, 1, 4]);
    assert_eq!(fx.reports.len(), 0);
    assert!(!fx.hub.has_pending_read(&path));
}

#[test]
fn set_listening_on_inactive_manager_is_a_noop() {
    let fx = Fixture::pad();
    fx.manager.set_listening(true);
    assert!(!fx.manager.is_listening());
    assert!(!fx.manager.is_active());
}

// ── Attach / remove ──

#[test]
fn first_attach_is_suppressed_second_is_surfaced() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);

    assert_eq!(fx.manager.attach_count(), 1);
    assert!(!fx.log.contains("Pad attached"));

    let path = pad_candidate().path;
    fx.hub.unplug(&path);
    assert!(fx.log.contains("Pad removed"));
    assert!(fx.manager.is_active());
    assert!(fx.manager.is_listening());

    fx.hub.plug(&path);
    assert_eq!(fx.manager.attach_count(), 2);
    assert_eq!(fx.log.count("Pad attached"), 1);
    assert!(fx.manager.is_connected());

    // Listener keeps working on the recovered handle
    fx.hub.push_report(&path, &[0, 1, 7]);
    assert_eq!(fx.reports.len(), 1);
}

// ── Close ──

#[test]
fn close_is_idempotent() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);

    fx.manager.close();
    fx.manager.close();

    assert!(!fx.manager.is_active());
    assert!(!fx.manager.is_listening());
    assert!(!fx.manager.is_connected());
    assert_eq!(fx.log.count("Closing interface with Pad"), 1);
    assert_eq!(fx.hub.open_links(), 0);
}

#[test]
fn close_preempts_report_callback_in_flight() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let seen = Arc::new(AtomicUsize::new(0));
    let sink: ReportSink = {
        let seen = seen.clone();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(2));
        })
    };
    let fx = Fixture::pad_with_sink(sink);
    fx.manager.connect(true, None);
    let path = pad_candidate().path;

    // Delivery blocks inside the sink on another thread
    let pusher = {
        let hub = fx.hub.clone();
        let path = path.clone();
        std::thread::spawn(move || hub.push_report(&path, &[0, 1, 2]))
    };
    entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    fx.manager.close();
    assert!(!fx.manager.is_active());
    assert_eq!(fx.hub.open_links(), 0);

    release_tx.send(()).unwrap();
    pusher.join().unwrap();

    // The returning callback saw the close and did not re-arm
    assert!(!fx.hub.has_pending_read(&path));
    assert!(!fx.manager.is_listening());
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    fx.hub.push_report(&path, &[0, 1, 3]);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn close_without_connect_does_nothing() {
    let fx = Fixture::pad();
    fx.manager.close();
    assert!(fx.log.entries().is_empty());
}

#[test]
fn close_resets_attach_counter_and_stops_delivery() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);
    let path = pad_candidate().path;
    fx.hub.unplug(&path);
    fx.hub.plug(&path);
    assert_eq!(fx.manager.attach_count(), 2);

    fx.manager.close();
    assert_eq!(fx.manager.attach_count(), 0);

    fx.hub.push_report(&path, &[0, 1, 1]);
    assert_eq!(fx.reports.len(), 0);
    assert!(!fx.manager.send(1, None, false));
}

#[test]
fn connect_after_close_starts_fresh() {
    let fx = Fixture::pad();
    fx.manager.connect(true, None);
    fx.manager.close();
    fx.manager.connect(true, None);

    assert!(fx.manager.is_active());
    assert!(fx.manager.is_listening());
    assert_eq!(fx.manager.attach_count(), 1);
    assert!(fx.manager.send(1, None, false));
}
