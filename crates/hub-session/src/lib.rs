//! FixHub Session Manager
//!
//! This crate owns the lifecycle of one serial link to a FixHub peripheral:
//! which device is attached, whether the host may use it, whether the link is
//! open, and how the raw byte stream becomes messages.
//!
//! # Architecture
//!
//! A single actor task owns all session state. Everything that can change
//! that state (presentation commands, hotplug notifications, permission
//! callbacks, link completions, inbound bytes) arrives as a message, so
//! transitions are serialized without locks scattered across callbacks:
//!
//! - [`Session`] is the cloneable façade the presentation layer calls
//! - [`ConnectionMachine`] is the pure transition table the actor drives
//! - [`SessionEvent`] is the single stream of frames, state changes and errors
//! - [`HotplugWatcher`] turns device enumeration into attach/detach notifications
//!
//! Blocking transport work (open, configure, timed writes, teardown) runs on
//! the tokio blocking pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hub_link::SerialPortTransport;
//! use hub_session::{Session, SessionConfig, SessionEvent};
//!
//! # async fn run() -> Result<(), hub_session::SessionError> {
//! let (session, mut events) = Session::spawn(
//!     Arc::new(SerialPortTransport::new()),
//!     SessionConfig::default(),
//! );
//!
//! session.request_connect().await?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::StateChanged(snapshot) = event {
//!         if snapshot.connected {
//!             session.send("version\r\n").await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod events;
pub mod hotplug;
pub mod machine;
pub mod session;
pub mod state;

pub use actor::{run_session_actor, SessionCommand};
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::SessionEvent;
pub use hotplug::{spawn_hotplug_watcher, HotplugCommand, HotplugWatcher};
pub use machine::{AttemptId, Completion, ConnectStep, ConnectionMachine, OpenRequest, PermissionStep};
pub use session::Session;
pub use state::{ConnectionState, DeviceInfo, StateSnapshot};
