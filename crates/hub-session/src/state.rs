//! Session state types

use hub_protocol::{DeviceIdentity, DeviceType};
use serde::{Deserialize, Serialize};

/// Lifecycle of the session's link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No device in use
    #[default]
    Disconnected,
    /// A supported device is plugged in but not open
    Attached(DeviceType),
    /// Waiting for the host platform to grant access
    AwaitingPermission(DeviceType),
    /// Link open, configured and reading
    Connected(DeviceType),
}

impl ConnectionState {
    /// Device type of the device in use (`Unknown` when disconnected)
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Disconnected => DeviceType::Unknown,
            Self::Attached(t) | Self::AwaitingPermission(t) | Self::Connected(t) => *t,
        }
    }

    pub fn is_attached(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Attached(_) => "Attached",
            Self::AwaitingPermission(_) => "Awaiting permission",
            Self::Connected(_) => "Connected",
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            attached: self.is_attached(),
            connected: self.is_connected(),
            device_type: self.device_type(),
        }
    }
}

/// What the presentation layer needs to render connection affordances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub attached: bool,
    pub connected: bool,
    pub device_type: DeviceType,
}

/// Identity of the device in use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub usb_vendor_id: u16,
    pub usb_product_id: u16,
    pub device_type: DeviceType,
    /// Driver port, once the link is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    /// USB product string, once the link is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl DeviceInfo {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.usb_vendor_id, self.usb_product_id)
    }
}
