//! USB Vendor/Product ID registry for supported peripherals
//!
//! This table is the only place that decides whether a peripheral is
//! supported. Discovery filtering and delimiter selection both go through it.

use crate::{DeviceIdentity, DeviceType};

/// FixHub USB Vendor ID (0x346C)
pub const VENDOR_ID: u16 = 13420;

/// FixHub base station
pub mod hub {
    use crate::DeviceIdentity;

    pub const PID: u16 = 7936;

    pub const ID: DeviceIdentity = DeviceIdentity::new(super::VENDOR_ID, PID);

    /// Shell prompt, `fixhub:~$ ` in bold green
    pub const PROMPT: &[u8] = b"\x1b[1;32mfixhub\x1b[0m:~$ ";
}

/// FixHub soldering iron
pub mod iron {
    use crate::DeviceIdentity;

    pub const PID: u16 = 7937;

    pub const ID: DeviceIdentity = DeviceIdentity::new(super::VENDOR_ID, PID);

    /// Shell prompt, `fix-iron:~$ ` in bold yellow
    pub const PROMPT: &[u8] = b"\x1b[1;33mfix-iron\x1b[0m:~$ ";
}

/// Every supported identity and its device type
pub const KNOWN_DEVICES: &[(DeviceIdentity, DeviceType)] =
    &[(hub::ID, DeviceType::Hub), (iron::ID, DeviceType::Iron)];

/// Classify a vendor/product pair
///
/// Total and deterministic: pairs outside [`KNOWN_DEVICES`] are `Unknown`.
pub fn classify(vendor_id: u16, product_id: u16) -> DeviceType {
    KNOWN_DEVICES
        .iter()
        .find(|(id, _)| id.vendor_id == vendor_id && id.product_id == product_id)
        .map(|(_, device_type)| *device_type)
        .unwrap_or(DeviceType::Unknown)
}

/// Check if an identity belongs to a supported peripheral
pub fn is_supported(identity: DeviceIdentity) -> bool {
    classify(identity.vendor_id, identity.product_id).is_known()
}

/// Get the frame delimiter (shell prompt) for a device type
pub fn frame_delimiter(device_type: DeviceType) -> Option<&'static [u8]> {
    match device_type {
        DeviceType::Hub => Some(hub::PROMPT),
        DeviceType::Iron => Some(iron::PROMPT),
        DeviceType::Unknown => None,
    }
}

/// Human-readable product name for a device type
pub fn product_name(device_type: DeviceType) -> Option<&'static str> {
    match device_type {
        DeviceType::Hub => Some("FixHub"),
        DeviceType::Iron => Some("FixHub Iron"),
        DeviceType::Unknown => None,
    }
}
