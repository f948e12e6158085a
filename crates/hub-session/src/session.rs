//! Presentation-facing façade
//!
//! [`Session`] is a cheap, cloneable handle to the session actor. Each method
//! sends one command and, where there is an answer, awaits it.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hub_link::Transport;
use hub_protocol::DeviceIdentity;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::actor::{run_session_actor, SessionCommand};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::state::{ConnectionState, DeviceInfo, StateSnapshot};

/// Handle to a running session
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::Sender<SessionCommand>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.cmd_tx.is_closed())
            .finish()
    }
}

impl Session {
    /// Spawn the session actor on the current tokio runtime
    ///
    /// Returns the façade and the receiving end of the event stream. Events
    /// are never dropped and a slow reader never stalls the actor.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session_actor(
            Arc::clone(&transport),
            config,
            cmd_rx,
            event_tx,
        ));

        (Self { cmd_tx, transport }, event_rx)
    }

    /// Whether any supported device is currently plugged in
    ///
    /// Enumeration failures are logged and read as "no device".
    pub async fn query_attached_valid_device(&self) -> bool {
        let transport = Arc::clone(&self.transport);
        match tokio::task::spawn_blocking(move || transport.enumerate()).await {
            Ok(Ok(identities)) => identities.iter().any(|id| id.is_supported()),
            Ok(Err(e)) => {
                warn!("Error enumerating devices: {}", e);
                false
            }
            Err(e) => {
                warn!("Enumeration worker failed: {}", e);
                false
            }
        }
    }

    /// Begin connecting; progress arrives as [`SessionEvent`]s
    pub async fn request_connect(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Connect).await
    }

    /// Close the link and wait for teardown to finish
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::Disconnect { done: Some(tx) })
            .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Write bytes to the device
    ///
    /// Fails with [`SessionError::NotConnected`] when no link is open and
    /// with [`SessionError::WriteTimeout`] when the write exceeds its bound.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::Send {
            data: data.into(),
            response: tx,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Decode a base64 payload and write the bytes to the device
    ///
    /// Nothing is appended to the decoded bytes. A payload that does not
    /// decode fails with [`SessionError::InvalidEncoding`] before anything
    /// reaches the link.
    pub async fn send_encoded(&self, encoded: &str) -> Result<(), SessionError> {
        let data = BASE64.decode(encoded.trim()).map_err(|e| {
            debug!("Rejecting encoded payload: {}", e);
            SessionError::InvalidEncoding(e.to_string())
        })?;
        self.send(data).await
    }

    pub async fn state(&self) -> Result<ConnectionState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::QueryState { response: tx })
            .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Current attached/connected flags and device type
    pub async fn status(&self) -> Result<StateSnapshot, SessionError> {
        Ok(self.state().await?.snapshot())
    }

    /// Identity of the device in use, or `None` when disconnected
    pub async fn device_info(&self) -> Result<Option<DeviceInfo>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::QueryDeviceInfo { response: tx })
            .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Hotplug: a device appeared
    pub async fn notify_attached(&self, identity: DeviceIdentity) -> Result<(), SessionError> {
        self.command(SessionCommand::DeviceAttached { identity })
            .await
    }

    /// Hotplug: a device went away
    pub async fn notify_detached(&self, identity: DeviceIdentity) -> Result<(), SessionError> {
        self.command(SessionCommand::DeviceDetached { identity })
            .await
    }

    /// The host answered a permission request
    pub async fn notify_permission(
        &self,
        identity: DeviceIdentity,
        granted: bool,
    ) -> Result<(), SessionError> {
        self.command(SessionCommand::PermissionResult { identity, granted })
            .await
    }

    /// Stop the actor, closing any open link first
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(SessionCommand::Shutdown { done: Some(tx) })
            .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    async fn command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }
}
