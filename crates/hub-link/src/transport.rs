//! Transport boundary
//!
//! The session manager never talks to a USB driver directly. It goes through
//! [`Transport`] to find and open devices and through [`SerialLink`] to drive
//! an open one. Every call here may block (USB control transfers, timed
//! writes), so callers run them off the async executor.

use std::time::Duration;

use hub_protocol::DeviceIdentity;
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::error::TransportError;

/// Serial line configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Data Terminal Ready asserted
    pub dtr: bool,
    /// Request To Send asserted
    pub rts: bool,
}

/// The only configuration the peripherals speak: 115200-8-N-1, DTR/RTS high
pub const LINK_PARAMS: LinkParams = LinkParams {
    baud_rate: 115_200,
    data_bits: DataBits::Eight,
    stop_bits: StopBits::One,
    parity: Parity::None,
    flow_control: FlowControl::None,
    dtr: true,
    rts: true,
};

impl Default for LinkParams {
    fn default() -> Self {
        LINK_PARAMS
    }
}

/// A device resolved to a concrete driver port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedDevice {
    pub identity: DeviceIdentity,
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port_name: String,
    /// USB product string
    pub product: Option<String>,
    /// USB serial number
    pub serial_number: Option<String>,
}

/// Delivered by a read loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A chunk of bytes off the wire
    Data(Vec<u8>),
    /// The read loop hit an error and stopped
    Failed(String),
}

/// Callback target for a read loop
///
/// Invoked from the read loop's own thread, one event at a time.
pub type ByteSink = Box<dyn FnMut(ReadEvent) + Send + 'static>;

/// Discovery and access to USB serial devices
pub trait Transport: Send + Sync + 'static {
    /// List the identities of all currently attached USB serial devices
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, TransportError>;

    /// Whether access to the device has already been granted
    fn has_permission(&self, identity: DeviceIdentity) -> bool;

    /// Ask the host platform for access
    ///
    /// Returns once the request is issued. The outcome arrives later through
    /// the host's own callback path.
    fn request_permission(&self, identity: DeviceIdentity) -> Result<(), TransportError>;

    /// Resolve an identity to a driver port
    fn probe(&self, identity: DeviceIdentity) -> Result<ProbedDevice, TransportError>;

    /// Open a probed device
    fn open(&self, device: &ProbedDevice) -> Result<Box<dyn SerialLink>, TransportError>;
}

/// An open serial link
pub trait SerialLink: Send {
    /// Apply line settings
    fn configure(&mut self, params: &LinkParams) -> Result<(), TransportError>;

    /// Drive the DTR and RTS lines
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError>;

    /// Start delivering inbound bytes to `sink`
    fn start_async_read(&mut self, sink: ByteSink) -> Result<Box<dyn ReadLoop>, TransportError>;

    /// Write all of `data`, failing with `WriteTimeout` after `timeout`
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Release the underlying handle. Further calls fail with `Closed`.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Handle to a running read loop
pub trait ReadLoop: Send + Sync {
    /// Stop the loop and wait until the sink will no longer be called
    fn stop(self: Box<Self>);
}
