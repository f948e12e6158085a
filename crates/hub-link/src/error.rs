//! Error types for the transport boundary

use hub_protocol::DeviceIdentity;
use thiserror::Error;

/// Errors reported by a transport or an open link
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to enumerate USB devices
    #[error("failed to enumerate devices: {0}")]
    EnumerationFailed(String),

    /// The device is no longer present
    #[error("device {0} not found")]
    DeviceNotFound(DeviceIdentity),

    /// The OS or the user refused access
    #[error("permission denied for device {0}")]
    PermissionDenied(DeviceIdentity),

    /// Failed to open or claim the device
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Link parameters were rejected
    #[error("link configuration rejected: {0}")]
    Configuration(String),

    /// A write did not complete in time
    #[error("write timed out after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    /// The link has already been closed
    #[error("link is closed")]
    Closed,

    /// I/O error on an open link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}
