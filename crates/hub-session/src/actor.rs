//! Session Actor
//!
//! One task owns the connection machine, the open link and the framer. The
//! façade, the hotplug watcher and the host's permission callback all talk to
//! it through [`SessionCommand`]; link workers and reader threads report back
//! through an internal channel tagged with the attempt that produced them.
//!
//! Blocking transport calls never run on the actor task itself. Opening a
//! link and writing to it happen on the blocking pool, and teardown is
//! awaited there so a disconnect only returns once the handle is closed.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_session::actor::{run_session_actor, SessionCommand};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(64);
//! let (event_tx, mut event_rx) = mpsc::unbounded_channel();
//!
//! tokio::spawn(run_session_actor(transport, config, cmd_rx, event_tx));
//! cmd_tx.send(SessionCommand::Connect).await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use hub_link::{
    ByteSink, ProbedDevice, ReadEvent, ReadLoop, SerialLink, Transport, TransportError,
    LINK_PARAMS,
};
use hub_protocol::{DeviceIdentity, DeviceType, Framer};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::machine::{AttemptId, Completion, ConnectStep, ConnectionMachine, OpenRequest, PermissionStep};
use crate::state::{ConnectionState, DeviceInfo};

/// Commands sent to the session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// A device was plugged in
    DeviceAttached { identity: DeviceIdentity },

    /// A device was unplugged
    DeviceDetached { identity: DeviceIdentity },

    /// The host answered a permission request
    PermissionResult {
        identity: DeviceIdentity,
        granted: bool,
    },

    /// Connect to the attached device (or the first one found)
    Connect,

    /// Close the link, or abandon a pending connect
    Disconnect {
        /// Signalled once teardown is complete
        done: Option<oneshot::Sender<()>>,
    },

    /// Write bytes to the open link
    Send {
        data: Vec<u8>,
        response: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Query the current connection state
    QueryState {
        response: oneshot::Sender<ConnectionState>,
    },

    /// Query the identity of the device in use
    QueryDeviceInfo {
        response: oneshot::Sender<Option<DeviceInfo>>,
    },

    /// Close everything and stop the actor
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

/// Reports from link workers and reader threads
enum LinkEvent {
    Opened {
        attempt: AttemptId,
        result: Result<EstablishedLink, SessionError>,
    },
    Inbound {
        attempt: AttemptId,
        event: ReadEvent,
    },
}

/// A link that is open, configured and reading
struct EstablishedLink {
    device: ProbedDevice,
    link: SharedLink,
    reader: Box<dyn ReadLoop>,
}

/// The session's installed link
struct ActiveLink {
    attempt: AttemptId,
    established: EstablishedLink,
}

/// Internal state of the session actor
struct SessionActorState {
    machine: ConnectionMachine,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    active: Option<ActiveLink>,
    framer: Framer,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
}

/// Run the session actor until shutdown or until every command sender is gone
pub async fn run_session_actor(
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    // Unbounded so reader threads never block while the actor joins them
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    let mut state = SessionActorState {
        machine: ConnectionMachine::new(),
        transport,
        config,
        active: None,
        framer: Framer::new(DeviceType::Unknown),
        event_tx,
        link_tx,
    };
    info!("Session actor started");

    let mut shutdown_done = None;
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                if let SessionCommand::Shutdown { done } = cmd {
                    info!("Session shutdown requested");
                    shutdown_done = done;
                    break;
                }
                state.handle_command(cmd).await;
            }
            Some(event) = link_rx.recv() => {
                state.handle_link_event(event).await;
            }
        }
    }

    state.teardown_active().await;
    state.framer.clear();
    if state.machine.detach() {
        state.emit_state();
    }
    if let Some(done) = shutdown_done {
        let _ = done.send(());
    }
    info!("Session actor stopped");
}

impl SessionActorState {
    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::DeviceAttached { identity } => self.on_attached(identity).await,
            SessionCommand::DeviceDetached { identity } => self.on_detached(identity).await,
            SessionCommand::PermissionResult { identity, granted } => {
                self.on_permission(identity, granted).await
            }
            SessionCommand::Connect => self.on_connect().await,
            SessionCommand::Disconnect { done } => {
                self.on_disconnect().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            SessionCommand::Send { data, response } => self.on_send(data, response),
            SessionCommand::QueryState { response } => {
                let _ = response.send(self.machine.state());
            }
            SessionCommand::QueryDeviceInfo { response } => {
                let _ = response.send(self.device_info());
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { attempt, result } => self.on_link_opened(attempt, result).await,
            LinkEvent::Inbound { attempt, event } => self.on_inbound(attempt, event).await,
        }
    }

    // -------------------------------------------------------------------------
    // Device lifecycle
    // -------------------------------------------------------------------------

    async fn on_attached(&mut self, identity: DeviceIdentity) {
        if self.machine.attach(identity) {
            self.emit_state();
        }
    }

    async fn on_detached(&mut self, identity: DeviceIdentity) {
        info!("{} detached", identity);
        self.teardown_active().await;
        self.framer.clear();
        if self.machine.detach() {
            self.emit_state();
        }
    }

    async fn on_connect(&mut self) {
        if self.machine.state() == ConnectionState::Disconnected {
            if let Some(identity) = self.discover().await {
                self.on_attached(identity).await;
            }
        }

        let has_permission = match self.machine.device() {
            Some(identity) => {
                let transport = Arc::clone(&self.transport);
                blocking(move || transport.has_permission(identity))
                    .await
                    .unwrap_or(false)
            }
            None => false,
        };

        match self.machine.request_connect(has_permission) {
            Ok(ConnectStep::Ignored) => {}
            Ok(ConnectStep::RequestPermission(identity)) => {
                self.emit_state();
                self.request_permission(identity).await;
            }
            Ok(ConnectStep::Open(request)) => self.spawn_open(request),
            Err(error) => {
                warn!("Connect failed: {}", error);
                self.emit_error(error);
            }
        }
    }

    async fn request_permission(&mut self, identity: DeviceIdentity) {
        let transport = Arc::clone(&self.transport);
        let result = blocking(move || transport.request_permission(identity))
            .await
            .and_then(|r| r.map_err(|e| SessionError::Transport(e.to_string())));

        match result {
            Ok(()) => info!("Requested permission for {}", identity),
            Err(error) => {
                warn!("Permission request for {} failed: {}", identity, error);
                if self.machine.permission_request_failed() {
                    self.emit_state();
                }
                self.emit_error(error);
            }
        }
    }

    async fn on_permission(&mut self, identity: DeviceIdentity, granted: bool) {
        match self.machine.permission_result(identity, granted) {
            PermissionStep::Open(request) => self.spawn_open(request),
            PermissionStep::Denied => {
                self.emit_state();
                self.emit_error(SessionError::PermissionDenied(identity));
            }
            PermissionStep::Stale => {}
        }
    }

    async fn on_disconnect(&mut self) {
        let before = self.machine.state();
        if before.is_connected() {
            self.teardown_active().await;
            self.framer.clear();
        }
        if self.machine.disconnect() {
            self.emit_state();
        } else {
            debug!("Disconnect in state {} changed nothing", before.name());
        }
    }

    /// First supported device the transport can see
    async fn discover(&self) -> Option<DeviceIdentity> {
        let transport = Arc::clone(&self.transport);
        match blocking(move || transport.enumerate()).await {
            Ok(Ok(identities)) => identities.into_iter().find(|id| id.is_supported()),
            Ok(Err(e)) => {
                warn!("Error enumerating devices: {}", e);
                None
            }
            Err(e) => {
                warn!("Error enumerating devices: {}", e);
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Link lifecycle
    // -------------------------------------------------------------------------

    fn spawn_open(&self, request: OpenRequest) {
        info!(
            "Connecting to {} ({}), attempt {}",
            request.identity,
            request.device_type,
            request.attempt.value()
        );

        let transport = Arc::clone(&self.transport);
        let link_tx = self.link_tx.clone();
        tokio::spawn(async move {
            let sink_tx = link_tx.clone();
            let result = blocking(move || establish_link(transport.as_ref(), request, sink_tx))
                .await
                .and_then(|r| r);
            let _ = link_tx.send(LinkEvent::Opened {
                attempt: request.attempt,
                result,
            });
        });
    }

    async fn on_link_opened(
        &mut self,
        attempt: AttemptId,
        result: Result<EstablishedLink, SessionError>,
    ) {
        match result {
            Ok(established) => match self.machine.connect_finished(attempt, true) {
                Completion::Installed => {
                    info!(
                        "Connected to {} on {}",
                        established.device.identity, established.device.port_name
                    );
                    self.framer.reset(self.machine.state().device_type());
                    self.active = Some(ActiveLink {
                        attempt,
                        established,
                    });
                    self.emit_state();
                }
                _ => {
                    info!("Closing link from cancelled attempt {}", attempt.value());
                    close_established(established).await;
                }
            },
            Err(error) => match self.machine.connect_finished(attempt, false) {
                Completion::RolledBack => {
                    warn!("Connect failed: {}", error);
                    self.emit_state();
                    self.emit_error(error);
                }
                _ => debug!("Cancelled attempt {} failed: {}", attempt.value(), error),
            },
        }
    }

    async fn on_inbound(&mut self, attempt: AttemptId, event: ReadEvent) {
        let current = matches!(&self.active, Some(active) if active.attempt == attempt);
        if !current || !self.machine.state().is_connected() {
            trace!("Dropping read event from attempt {}", attempt.value());
            return;
        }

        match event {
            ReadEvent::Data(bytes) => {
                let frames: Vec<_> = match self.framer.feed(&bytes) {
                    Ok(frames) => frames.collect(),
                    Err(e) => {
                        warn!("Framing failed: {}", e);
                        self.emit_error(e.into());
                        return;
                    }
                };
                for frame in frames {
                    debug!("Frame: {:?}", frame.text());
                    self.emit(SessionEvent::FrameReceived {
                        text: frame.into_text(),
                    });
                }
            }
            ReadEvent::Failed(reason) => {
                warn!("Read loop failed: {}", reason);
                self.emit_error(SessionError::Transport(format!("read failed: {}", reason)));
            }
        }
    }

    fn on_send(&self, data: Vec<u8>, response: oneshot::Sender<Result<(), SessionError>>) {
        let link = match &self.active {
            Some(active) if self.machine.state().is_connected() => {
                Arc::clone(&active.established.link)
            }
            _ => {
                let _ = response.send(Err(SessionError::NotConnected));
                return;
            }
        };

        let timeout = self.config.write_timeout();
        tokio::spawn(async move {
            let result = blocking(move || {
                let mut guard = lock_link(&link);
                guard.write(&data, timeout)
            })
            .await
                .and_then(|r| r.map_err(write_failure));
            let _ = response.send(result);
        });
    }

    /// Stop reading, close the handle, then forget the link
    async fn teardown_active(&mut self) {
        if let Some(active) = self.active.take() {
            close_established(active.established).await;
        }
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        let identity = self.machine.device()?;
        let device = self.active.as_ref().map(|a| &a.established.device);
        Some(DeviceInfo {
            usb_vendor_id: identity.vendor_id,
            usb_product_id: identity.product_id,
            device_type: identity.device_type(),
            port_name: device.map(|d| d.port_name.clone()),
            product: device.and_then(|d| d.product.clone()),
        })
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("No event receiver");
        }
    }

    fn emit_state(&self) {
        let state = self.machine.state();
        debug!("State: {}", state.name());
        self.emit(SessionEvent::StateChanged(state.snapshot()));
    }

    fn emit_error(&self, error: SessionError) {
        self.emit(SessionEvent::Error { error });
    }
}

/// Run blocking transport work off the actor task
async fn blocking<T, F>(f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Transport(format!("I/O worker failed: {}", e)))
}

fn lock_link(link: &SharedLink) -> MutexGuard<'_, Box<dyn SerialLink>> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

/// Probe, open, configure, raise DTR/RTS and start reading
///
/// A failure after open closes the handle before returning.
fn establish_link(
    transport: &dyn Transport,
    request: OpenRequest,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) -> Result<EstablishedLink, SessionError> {
    let identity = request.identity;
    let device = transport
        .probe(identity)
        .map_err(|e| open_failure(identity, e))?;
    let mut link = transport
        .open(&device)
        .map_err(|e| open_failure(identity, e))?;

    match start_link(link.as_mut(), request.attempt, link_tx) {
        Ok(reader) => Ok(EstablishedLink {
            device,
            link: Arc::new(Mutex::new(link)),
            reader,
        }),
        Err(error) => {
            if let Err(e) = link.close() {
                warn!("Error closing {} after failed setup: {}", device.port_name, e);
            }
            Err(error)
        }
    }
}

fn start_link(
    link: &mut dyn SerialLink,
    attempt: AttemptId,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) -> Result<Box<dyn ReadLoop>, SessionError> {
    link.configure(&LINK_PARAMS)
        .map_err(|e| SessionError::Configuration(e.to_string()))?;
    link.set_control_lines(LINK_PARAMS.dtr, LINK_PARAMS.rts)
        .map_err(|e| SessionError::Configuration(e.to_string()))?;

    let sink: ByteSink = Box::new(move |event| {
        let _ = link_tx.send(LinkEvent::Inbound { attempt, event });
    });
    link.start_async_read(sink)
        .map_err(|e| SessionError::Transport(e.to_string()))
}

async fn close_established(established: EstablishedLink) {
    let EstablishedLink {
        device,
        link,
        reader,
    } = established;

    let result = blocking(move || {
        reader.stop();
        let mut guard = lock_link(&link);
        guard.close()
    })
    .await;

    match result {
        Ok(Ok(())) => info!("Closed link on {}", device.port_name),
        Ok(Err(e)) => warn!("Error closing {}: {}", device.port_name, e),
        Err(e) => warn!("Error closing {}: {}", device.port_name, e),
    }
}

fn open_failure(identity: DeviceIdentity, err: TransportError) -> SessionError {
    match err {
        TransportError::PermissionDenied(device) => SessionError::PermissionDenied(device),
        other => SessionError::TransportOpenFailure {
            device: identity,
            reason: other.to_string(),
        },
    }
}

fn write_failure(err: TransportError) -> SessionError {
    match err {
        TransportError::WriteTimeout { timeout_ms } => SessionError::WriteTimeout { timeout_ms },
        TransportError::Closed => SessionError::NotConnected,
        other => SessionError::Transport(other.to_string()),
    }
}
