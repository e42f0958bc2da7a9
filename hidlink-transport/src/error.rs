//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    // Common errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Link is closed")]
    Closed,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") || msg.contains("EACCES") {
            TransportError::HidPermissionDenied(msg)
        } else {
            TransportError::HidError(msg)
        }
    }
}
