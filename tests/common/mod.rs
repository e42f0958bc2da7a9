//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use hidlink::log_sink::{LogSink, Severity};
use hidlink::manager::{ConnectionManager, ManagerOptions, ReportSink};
use hidlink::{DecodedReport, DeviceIdentity};
use hidlink_transport::{DeviceCandidate, SimHub};

/// Log sink that keeps every message
#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(String, Severity)>>,
}

impl RecordingSink {
    pub fn entries(&self) -> Vec<(String, Severity)> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|(m, _)| m.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(m, _)| m.contains(needle))
            .count()
    }

    pub fn last(&self) -> Option<(String, Severity)> {
        self.entries.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl LogSink for RecordingSink {
    fn log(&self, message: &str, severity: Severity) {
        self.entries.lock().push((message.to_string(), severity));
    }
}

/// Report sink that keeps every decoded report
#[derive(Default, Clone)]
pub struct Reports(Arc<Mutex<Vec<DecodedReport>>>);

impl Reports {
    pub fn sink(&self) -> ReportSink {
        let reports = self.0.clone();
        Arc::new(move |r| reports.lock().push(r))
    }

    pub fn all(&self) -> Vec<DecodedReport> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// The "Pad" device: 0x1234:0x5678 on vendor page 0xFF00, usage 0x01
pub fn pad_identity() -> DeviceIdentity {
    DeviceIdentity::new("Pad", 0x1234, 0x5678).with_usage(0xFF00, 0x01)
}

/// A candidate for the pad with a 3-byte report budget
pub fn pad_candidate() -> DeviceCandidate {
    SimHub::candidate(0x1234, 0x5678, 0xFF00, 0x01, 4)
}

pub struct Fixture {
    pub hub: SimHub,
    pub log: Arc<RecordingSink>,
    pub reports: Reports,
    pub manager: ConnectionManager,
}

impl Fixture {
    /// Manager for `identity` over `devices`
    pub fn new(identity: DeviceIdentity, devices: Vec<DeviceCandidate>) -> Self {
        let reports = Reports::default();
        let sink = reports.sink();
        Self::build(identity, devices, reports, sink)
    }

    /// Pad manager whose reports go to `sink` instead of `reports`
    pub fn pad_with_sink(sink: ReportSink) -> Self {
        Self::build(pad_identity(), vec![pad_candidate()], Reports::default(), sink)
    }

    fn build(
        identity: DeviceIdentity,
        devices: Vec<DeviceCandidate>,
        reports: Reports,
        sink: ReportSink,
    ) -> Self {
        let hub = SimHub::new();
        for device in devices {
            hub.add_device(device);
        }
        let log = Arc::new(RecordingSink::default());
        let options = ManagerOptions {
            read_timeout_ms: 10,
            report_sink: Some(sink),
        };
        let manager = ConnectionManager::new(
            identity,
            Arc::new(hub.backend()),
            log.clone(),
            options,
        );
        Self {
            hub,
            log,
            reports,
            manager,
        }
    }

    /// One pad device, pad identity
    pub fn pad() -> Self {
        Self::new(pad_identity(), vec![pad_candidate()])
    }
}
