//! FixHub Protocol Library
//!
//! This crate provides the device-side vocabulary shared by the rest of the
//! workspace:
//!
//! - **Device identities**: USB vendor/product pairs of the supported peripherals
//! - **Device types**: the closed set of peripheral variants (Hub, Iron)
//! - **Framing**: a streaming framer that splits the console byte stream on the
//!   device's ANSI-colored prompt
//!
//! # Architecture
//!
//! The wire protocol has no length prefix. Every response from a device ends
//! with the device's shell prompt, so the prompt doubles as the frame
//! delimiter. Because the prompt differs between device types, the delimiter
//! is only known once the attached device has been classified.
//!
//! # Example
//!
//! ```rust
//! use hub_protocol::{registry, DeviceType, Framer};
//!
//! let device_type = registry::classify(13420, 7936);
//! assert_eq!(device_type, DeviceType::Hub);
//!
//! let mut framer = Framer::new(device_type);
//! let mut input = b"fixhub 2.4.1".to_vec();
//! input.extend_from_slice(registry::hub::PROMPT);
//!
//! let frames: Vec<_> = framer.feed(&input).unwrap().collect();
//! assert_eq!(frames[0].text(), "fixhub 2.4.1");
//! ```

use std::fmt;

pub mod error;
pub mod framer;
pub mod registry;

pub use error::FramerError;
pub use framer::{Frame, Framer, Frames};

/// USB vendor/product pair identifying an attached peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Classify this identity against the registry
    pub fn device_type(&self) -> DeviceType {
        registry::classify(self.vendor_id, self.product_id)
    }

    /// Returns true if this identity belongs to a supported peripheral
    pub fn is_supported(&self) -> bool {
        registry::is_supported(*self)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Peripheral variant, derived from the product ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceType {
    /// FixHub base station
    Hub,
    /// FixHub soldering iron
    Iron,
    /// Anything not in the registry
    Unknown,
}

impl DeviceType {
    /// Returns the lowercase name used by the presentation layer
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Hub => "hub",
            DeviceType::Iron => "iron",
            DeviceType::Unknown => "unknown",
        }
    }

    /// Returns the prompt that terminates every frame from this device type
    ///
    /// `Unknown` has no delimiter.
    pub fn delimiter(&self) -> Option<&'static [u8]> {
        registry::frame_delimiter(*self)
    }

    /// Returns true for every variant except `Unknown`
    pub fn is_known(&self) -> bool {
        !matches!(self, DeviceType::Unknown)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
