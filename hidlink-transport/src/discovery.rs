//! Device discovery through hidapi

use std::sync::Arc;

use hidapi::HidApi;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::hid_link::{HidLink, LinkTiming};
use crate::types::{DeviceCandidate, DeviceFilter, DEFAULT_REPORT_LEN};
use crate::{DeviceBackend, DeviceLink};

/// Settings for [`HidBackend`]
///
/// hidapi does not expose report capabilities, so report lengths are
/// configured rather than parsed out of the report descriptor.
#[derive(Debug, Clone, Copy)]
pub struct HidBackendConfig {
    /// Output and input report length, report-id byte included
    pub report_len: usize,
    /// Presence polling interval while a link is monitoring
    pub hotplug_poll_ms: u64,
    /// Per-read timeout of the listener thread
    pub reader_timeout_ms: i32,
}

impl Default for HidBackendConfig {
    fn default() -> Self {
        Self {
            report_len: DEFAULT_REPORT_LEN,
            hotplug_poll_ms: 500,
            reader_timeout_ms: 50,
        }
    }
}

/// HID device discovery backed by a shared `HidApi`
pub struct HidBackend {
    api: Arc<Mutex<HidApi>>,
    config: HidBackendConfig,
}

impl HidBackend {
    /// Create a backend with default settings
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(HidBackendConfig::default())
    }

    pub fn with_config(config: HidBackendConfig) -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
            config,
        })
    }

    /// List every HID interface the platform reports (used by `list`)
    pub fn list_all(&self) -> Result<Vec<DeviceCandidate>, TransportError> {
        let mut api = self.api.lock();
        api.refresh_devices()?;
        Ok(api
            .device_list()
            .map(|d| candidate_from_info(d, self.config.report_len))
            .collect())
    }
}

fn candidate_from_info(info: &hidapi::DeviceInfo, report_len: usize) -> DeviceCandidate {
    DeviceCandidate {
        path: info.path().to_string_lossy().to_string(),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        usage_page: info.usage_page(),
        usage: info.usage(),
        output_report_len: report_len,
        input_report_len: report_len,
        product_name: info.product_string().map(|s| s.to_string()),
        serial: info.serial_number().map(|s| s.to_string()),
    }
}

impl DeviceBackend for HidBackend {
    fn enumerate(&self, filter: &DeviceFilter) -> Result<Vec<DeviceCandidate>, TransportError> {
        let mut api = self.api.lock();
        api.refresh_devices()?;

        let devices: Vec<DeviceCandidate> = api
            .device_list()
            .filter(|d| filter.matches(d.vendor_id(), d.product_id(), d.usage_page()))
            .map(|d| {
                let candidate = candidate_from_info(d, self.config.report_len);
                debug!(
                    "Found interface: VID={:04X} PID={:04X} page={:04X} usage={:04X} path={}",
                    candidate.vendor_id,
                    candidate.product_id,
                    candidate.usage_page,
                    candidate.usage,
                    candidate.path
                );
                candidate
            })
            .collect();

        info!("Found {} interfaces matching {}", devices.len(), filter);
        Ok(devices)
    }

    fn open(&self, candidate: &DeviceCandidate) -> Result<Arc<dyn DeviceLink>, TransportError> {
        let timing = LinkTiming {
            reader_timeout_ms: self.config.reader_timeout_ms,
            hotplug_poll_ms: self.config.hotplug_poll_ms,
        };
        let link = HidLink::open(self.api.clone(), candidate.clone(), timing)?;
        Ok(Arc::new(link))
    }
}
