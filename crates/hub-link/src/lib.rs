//! FixHub Serial Link Library
//!
//! This crate defines the boundary between the session manager and the USB
//! serial driver, and provides a desktop implementation of it on top of the
//! `serialport` crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use hub_link::{SerialPortTransport, Transport};
//!
//! let transport = SerialPortTransport::new();
//! for identity in transport.enumerate().unwrap() {
//!     println!("{} ({})", identity, identity.device_type());
//! }
//! ```

pub mod error;
pub mod scanner;
pub mod serial;
pub mod transport;

pub use error::TransportError;
pub use scanner::{PortScanner, SerialPortInfo};
pub use serial::SerialPortTransport;
pub use transport::{
    ByteSink, LinkParams, ProbedDevice, ReadEvent, ReadLoop, SerialLink, Transport, LINK_PARAMS,
};
