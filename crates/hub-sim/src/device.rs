//! Virtual device simulation
//!
//! A line-oriented shell that answers a handful of commands and ends every
//! response with the device prompt, like the real firmware does.

use hub_protocol::{registry, DeviceType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for creating a virtual device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    /// Which peripheral to impersonate
    pub device_type: DeviceType,
    /// Reported firmware version
    pub firmware: String,
    /// Iron tip temperature in °C (ignored for the hub)
    pub tip_temperature_c: u16,
    /// Number of hub ports (ignored for the iron)
    pub port_count: u8,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Hub,
            firmware: "2.4.1".to_string(),
            tip_temperature_c: 320,
            port_count: 4,
        }
    }
}

impl VirtualDeviceConfig {
    pub fn for_type(device_type: DeviceType) -> Self {
        Self {
            device_type,
            ..Default::default()
        }
    }
}

/// A simulated peripheral shell
#[derive(Debug)]
pub struct VirtualDevice {
    config: VirtualDeviceConfig,
    /// Input received since the last line ending
    pending_line: Vec<u8>,
}

impl VirtualDevice {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        Self {
            config,
            pending_line: Vec::new(),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.config.device_type
    }

    /// The prompt this device prints after every response
    pub fn prompt(&self) -> &'static [u8] {
        registry::frame_delimiter(self.config.device_type).unwrap_or(b"> ")
    }

    /// Feed host-to-device bytes; returns whatever the device prints back
    pub fn receive(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();

        for &byte in data {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.pending_line)
                        .trim()
                        .to_string();
                    self.pending_line.clear();
                    output.extend_from_slice(&self.execute(&line));
                }
                b'\r' => {}
                _ => self.pending_line.push(byte),
            }
        }

        output
    }

    fn execute(&self, line: &str) -> Vec<u8> {
        debug!("Virtual {} executing {:?}", self.config.device_type, line);

        let mut output = match self.respond(line) {
            Some(text) => format!("{}\r\n", text).into_bytes(),
            None => Vec::new(),
        };
        output.extend_from_slice(self.prompt());
        output
    }

    fn respond(&self, line: &str) -> Option<String> {
        let name = registry::product_name(self.config.device_type).unwrap_or("Unknown");
        let command = line.split_whitespace().next()?;

        let text = match command {
            "version" => format!("{} firmware {}", name, self.config.firmware),
            "help" => "commands: help, status, version".to_string(),
            "status" => match self.config.device_type {
                DeviceType::Iron => format!("tip {}C, idle", self.config.tip_temperature_c),
                _ => format!("{} ports, all idle", self.config.port_count),
            },
            other => format!("unknown command: {}", other),
        };
        Some(text)
    }
}
