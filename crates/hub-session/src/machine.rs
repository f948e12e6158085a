//! Connection state machine
//!
//! Pure transition logic, with no I/O. The actor asks the machine what to do
//! for each stimulus and performs the returned step against the transport.
//!
//! Every open is tagged with an [`AttemptId`]. A detach or disconnect clears
//! the pending attempt, so a completion that arrives afterwards no longer
//! matches and is discarded instead of resurrecting the session.

use hub_protocol::{DeviceIdentity, DeviceType};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::state::ConnectionState;

/// Identifies one open attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// An open the actor should start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub identity: DeviceIdentity,
    pub device_type: DeviceType,
    pub attempt: AttemptId,
}

/// Outcome of a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Already connected, or a connect is in flight
    Ignored,
    /// Ask the host platform for access to this device
    RequestPermission(DeviceIdentity),
    /// Permission is already held; open now
    Open(OpenRequest),
}

/// Outcome of a permission callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStep {
    Open(OpenRequest),
    Denied,
    /// No longer relevant (detached, disconnected or answered twice)
    Stale,
}

/// Outcome of an open attempt finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The link becomes the session's link
    Installed,
    /// The attempt failed and the session is back to Attached
    RolledBack,
    /// The attempt was cancelled; close whatever it produced
    Discarded,
}

/// Session connection state machine
#[derive(Debug, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    device: Option<DeviceIdentity>,
    pending: Option<AttemptId>,
    next_attempt: u64,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The device the session is bound to, if any
    pub fn device(&self) -> Option<DeviceIdentity> {
        self.device
    }

    pub fn pending_attempt(&self) -> Option<AttemptId> {
        self.pending
    }

    /// A device was plugged in; returns true if the state changed
    pub fn attach(&mut self, identity: DeviceIdentity) -> bool {
        let device_type = identity.device_type();
        if !device_type.is_known() {
            info!("Ignoring unrecognized device {}", identity);
            return false;
        }

        match self.state {
            ConnectionState::Disconnected => {
                info!("{} attached ({})", device_type, identity);
                self.state = ConnectionState::Attached(device_type);
                self.device = Some(identity);
                true
            }
            _ if self.device == Some(identity) => {
                debug!("{} already attached", identity);
                false
            }
            _ => {
                warn!(
                    "Ignoring {} while {} is in use",
                    identity,
                    self.device.map(|d| d.to_string()).unwrap_or_default()
                );
                false
            }
        }
    }

    /// The user asked to connect
    ///
    /// `has_permission` is the transport's answer for the attached device.
    pub fn request_connect(&mut self, has_permission: bool) -> Result<ConnectStep, SessionError> {
        let (identity, device_type) = match (self.state, self.device) {
            (ConnectionState::Attached(t), Some(identity)) => (identity, t),
            (ConnectionState::AwaitingPermission(_), _) => {
                debug!("Connect ignored, permission request outstanding");
                return Ok(ConnectStep::Ignored);
            }
            (ConnectionState::Connected(_), _) => {
                debug!("Connect ignored, already connected");
                return Ok(ConnectStep::Ignored);
            }
            _ => return Err(SessionError::NoDeviceAttached),
        };

        if self.pending.is_some() {
            debug!("Connect ignored, open already in flight");
            return Ok(ConnectStep::Ignored);
        }

        if has_permission {
            Ok(ConnectStep::Open(self.begin_attempt(identity, device_type)))
        } else {
            self.state = ConnectionState::AwaitingPermission(device_type);
            Ok(ConnectStep::RequestPermission(identity))
        }
    }

    /// The permission request could not be issued; back to Attached
    pub fn permission_request_failed(&mut self) -> bool {
        match self.state {
            ConnectionState::AwaitingPermission(t) => {
                self.state = ConnectionState::Attached(t);
                true
            }
            _ => false,
        }
    }

    /// The host answered a permission request
    pub fn permission_result(&mut self, identity: DeviceIdentity, granted: bool) -> PermissionStep {
        let device_type = match self.state {
            ConnectionState::AwaitingPermission(t) if self.device == Some(identity) => t,
            _ => {
                debug!("Stale permission result for {}", identity);
                return PermissionStep::Stale;
            }
        };

        if self.pending.is_some() {
            debug!("Duplicate permission result for {}", identity);
            return PermissionStep::Stale;
        }

        if !granted {
            info!("Permission denied for {}", identity);
            self.state = ConnectionState::Attached(device_type);
            return PermissionStep::Denied;
        }

        info!("Permission granted for {}", identity);
        PermissionStep::Open(self.begin_attempt(identity, device_type))
    }

    /// An open attempt finished
    pub fn connect_finished(&mut self, attempt: AttemptId, succeeded: bool) -> Completion {
        if self.pending != Some(attempt) {
            debug!("Discarding result of cancelled attempt {}", attempt.0);
            return Completion::Discarded;
        }
        self.pending = None;

        let device_type = self.state.device_type();
        if succeeded {
            self.state = ConnectionState::Connected(device_type);
            Completion::Installed
        } else {
            self.state = ConnectionState::Attached(device_type);
            Completion::RolledBack
        }
    }

    /// The device was unplugged; always ends Disconnected
    pub fn detach(&mut self) -> bool {
        if let Some(attempt) = self.pending.take() {
            debug!("Cancelling attempt {} on detach", attempt.0);
        }
        let changed = self.state != ConnectionState::Disconnected;
        self.state = ConnectionState::Disconnected;
        self.device = None;
        changed
    }

    /// The user asked to disconnect
    ///
    /// Connected goes to Disconnected. A pending permission request or open
    /// is abandoned and the device stays Attached.
    pub fn disconnect(&mut self) -> bool {
        let cancelled = self.pending.take().is_some();
        match self.state {
            ConnectionState::Connected(_) => {
                self.state = ConnectionState::Disconnected;
                self.device = None;
                true
            }
            ConnectionState::AwaitingPermission(t) => {
                self.state = ConnectionState::Attached(t);
                true
            }
            ConnectionState::Attached(_) => {
                if cancelled {
                    debug!("Cancelled in-flight open");
                }
                false
            }
            ConnectionState::Disconnected => false,
        }
    }

    fn begin_attempt(&mut self, identity: DeviceIdentity, device_type: DeviceType) -> OpenRequest {
        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        self.pending = Some(attempt);
        OpenRequest {
            identity,
            device_type,
            attempt,
        }
    }
}
