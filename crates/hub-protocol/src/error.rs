//! Error types for framing

use thiserror::Error;

use crate::DeviceType;

/// Errors raised by the framer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramerError {
    /// The framer has no delimiter for its device type
    #[error("configuration error: no frame delimiter for {device_type} device")]
    Configuration { device_type: DeviceType },
}
