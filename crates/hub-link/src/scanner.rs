//! Serial port scanner
//!
//! Enumerates USB serial ports and tags each with its registry classification.

use hub_protocol::{DeviceIdentity, DeviceType};
use serialport::{available_ports, SerialPortType};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::ProbedDevice;

/// Information about a serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                serial_number: None,
                product: None,
            },
        }
    }

    /// USB identity, for USB ports only
    pub fn identity(&self) -> Option<DeviceIdentity> {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => Some(DeviceIdentity::new(vid, pid)),
            _ => None,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.identity()
            .map(|id| id.device_type())
            .unwrap_or(DeviceType::Unknown)
    }

    /// Convert into a probed device; `None` for non-USB ports
    pub fn into_probed(self) -> Option<ProbedDevice> {
        let identity = self.identity()?;
        Some(ProbedDevice {
            identity,
            port_name: self.port,
            product: self.product,
            serial_number: self.serial_number,
        })
    }
}

/// Serial port scanner
#[derive(Debug, Clone)]
pub struct PortScanner {
    /// Skip ports whose name contains any of these
    skip_patterns: Vec<String>,
}

impl PortScanner {
    pub fn new() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
            ],
        }
    }

    /// Enumerate all USB serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, TransportError> {
        debug!("Enumerating serial ports...");
        let ports =
            available_ports().map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| p.identity().is_some() && !self.should_skip_port(p))
            .collect();

        debug!("Found {} USB serial port(s)", result.len());
        Ok(result)
    }

    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}
