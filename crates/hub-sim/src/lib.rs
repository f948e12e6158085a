//! FixHub Simulation Library
//!
//! This crate provides a simulation layer for exercising the session manager
//! without physical hardware. It includes:
//!
//! - **VirtualDevice**: answers console commands the way a Hub or Iron does,
//!   terminating every response with the device prompt
//! - **SimTransport**: an in-memory [`hub_link::Transport`] with hotplug,
//!   permission grants, fault injection and call counters
//!
//! # Example
//!
//! ```rust
//! use hub_link::Transport;
//! use hub_protocol::registry;
//! use hub_sim::SimTransport;
//!
//! let transport = SimTransport::new();
//! transport.attach(registry::iron::ID);
//! transport.grant(registry::iron::ID);
//!
//! assert_eq!(transport.enumerate().unwrap(), vec![registry::iron::ID]);
//! assert!(transport.has_permission(registry::iron::ID));
//! ```

pub mod device;
pub mod transport;

pub use device::{VirtualDevice, VirtualDeviceConfig};
pub use transport::{SimFaults, SimStats, SimTransport};
