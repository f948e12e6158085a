//! Error types for the session manager

use hub_protocol::{DeviceIdentity, FramerError};
use thiserror::Error;

/// Errors surfaced to the presentation layer
///
/// Cloneable so they can ride on [`crate::SessionEvent::Error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No supported device is attached
    #[error("no recognized device attached")]
    NoDeviceAttached,

    /// The OS or the user declined access
    #[error("permission denied for device {0}")]
    PermissionDenied(DeviceIdentity),

    /// The driver could not open or claim the device
    #[error("failed to open device {device}: {reason}")]
    TransportOpenFailure {
        device: DeviceIdentity,
        reason: String,
    },

    /// Link parameters rejected, or framing attempted without a delimiter
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A write did not complete within the bound
    #[error("write timed out after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    /// An encoded payload did not decode
    #[error("invalid encoded payload: {0}")]
    InvalidEncoding(String),

    /// The operation needs an open link
    #[error("not connected")]
    NotConnected,

    /// Lower-level I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The session actor has stopped
    #[error("session has shut down")]
    SessionClosed,
}

impl SessionError {
    /// Whether the user can reasonably retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_)
                | SessionError::TransportOpenFailure { .. }
                | SessionError::WriteTimeout { .. }
                | SessionError::NoDeviceAttached
                | SessionError::Transport(_)
        )
    }
}

impl From<FramerError> for SessionError {
    fn from(e: FramerError) -> Self {
        SessionError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::DeviceType;

    #[test]
    fn test_framer_error_is_configuration() {
        let err: SessionError = FramerError::Configuration {
            device_type: DeviceType::Unknown,
        }
        .into();

        assert!(matches!(err, SessionError::Configuration(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(SessionError::WriteTimeout { timeout_ms: 1000 }.is_recoverable());
        assert!(SessionError::PermissionDenied(DeviceIdentity::new(13420, 7936)).is_recoverable());
        assert!(!SessionError::NotConnected.is_recoverable());
        assert!(!SessionError::InvalidEncoding("bad".to_string()).is_recoverable());
    }
}
