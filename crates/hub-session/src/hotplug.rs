//! Hotplug watcher
//!
//! Platforms without attach/detach callbacks get them by polling the
//! transport's device list and diffing it against the previous poll.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use hub_link::Transport;
use hub_protocol::DeviceIdentity;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::Session;

/// Commands for the hotplug watcher task
#[derive(Debug)]
pub enum HotplugCommand {
    /// Stop polling
    Shutdown,
}

/// Polls enumeration and forwards changes to a [`Session`]
pub struct HotplugWatcher {
    session: Session,
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    known: HashSet<DeviceIdentity>,
}

impl HotplugWatcher {
    pub fn new(session: Session, transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        Self {
            session,
            transport,
            poll_interval,
            known: HashSet::new(),
        }
    }

    /// Poll until told to stop or until the session goes away
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<HotplugCommand>) {
        info!("Hotplug watcher started ({:?} interval)", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HotplugCommand::Shutdown) | None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        debug!("Session gone: {}", e);
                        break;
                    }
                }
            }
        }

        info!("Hotplug watcher stopped");
    }

    /// Enumerate once and report differences from the previous poll
    pub async fn poll(&mut self) -> Result<(), SessionError> {
        let transport = Arc::clone(&self.transport);
        let identities = match tokio::task::spawn_blocking(move || transport.enumerate()).await {
            Ok(Ok(identities)) => identities,
            Ok(Err(e)) => {
                warn!("Error enumerating devices: {}", e);
                return Ok(());
            }
            Err(e) => {
                warn!("Enumeration worker failed: {}", e);
                return Ok(());
            }
        };

        let current: HashSet<DeviceIdentity> = identities
            .into_iter()
            .filter(|id| id.is_supported())
            .collect();

        for identity in self.known.difference(&current) {
            info!("Device removed: {}", identity);
            self.session.notify_detached(*identity).await?;
        }
        for identity in current.difference(&self.known) {
            info!("Device found: {}", identity);
            self.session.notify_attached(*identity).await?;
        }

        self.known = current;
        Ok(())
    }
}

/// Spawn a watcher task; send [`HotplugCommand::Shutdown`] to stop it
pub fn spawn_hotplug_watcher(
    session: Session,
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
) -> (mpsc::Sender<HotplugCommand>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let watcher = HotplugWatcher::new(session, transport, poll_interval);
    let handle = tokio::spawn(watcher.run(cmd_rx));
    (cmd_tx, handle)
}
