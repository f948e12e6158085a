//! Integration tests for the session manager
//!
//! These drive a real session actor against the simulated transport:
//! - Attach, permission and connect sequencing
//! - Cancellation of stale permission results and in-flight opens
//! - Framing of device output into events, including unread backlogs
//! - Write, open and configuration failures
//! - Hotplug polling

use std::sync::Arc;
use std::time::Duration;

use hub_link::LINK_PARAMS;
use hub_protocol::registry::{hub, iron};
use hub_protocol::{DeviceIdentity, DeviceType};
use hub_session::{
    spawn_hotplug_watcher, ConnectionState, HotplugCommand, Session, SessionConfig, SessionError,
    SessionEvent, StateSnapshot,
};
use hub_sim::{SimFaults, SimTransport};
use tokio::sync::mpsc;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub const WAIT: Duration = Duration::from_secs(3);

    pub fn spawn(transport: &SimTransport) -> (Session, mpsc::UnboundedReceiver<SessionEvent>) {
        Session::spawn(Arc::new(transport.clone()), SessionConfig::default())
    }

    pub fn snapshot(attached: bool, connected: bool, device_type: DeviceType) -> StateSnapshot {
        StateSnapshot {
            attached,
            connected,
            device_type,
        }
    }

    pub fn disconnected() -> StateSnapshot {
        snapshot(false, false, DeviceType::Unknown)
    }

    /// Receive events until one matches, failing after a timeout
    pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => {}
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    pub async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, expected: StateSnapshot) {
        wait_for(rx, |e| e.snapshot() == Some(expected)).await;
    }

    pub async fn wait_for_error(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionError {
        match wait_for(rx, |e| e.error().is_some()).await {
            SessionEvent::Error { error } => error,
            other => panic!("expected error, got {:?}", other),
        }
    }

    pub async fn wait_for_frame(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> String {
        match wait_for(rx, |e| e.frame_text().is_some()).await {
            SessionEvent::FrameReceived { text } => text,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    /// Poll a condition until it holds, failing after a timeout
    pub async fn eventually<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    /// Session connected to an attached, permitted device
    pub async fn connected(
        identity: DeviceIdentity,
    ) -> (SimTransport, Session, mpsc::UnboundedReceiver<SessionEvent>) {
        let transport = SimTransport::with_device(identity);
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(identity).await.unwrap();
        session.request_connect().await.unwrap();
        wait_for_state(&mut rx, snapshot(true, true, identity.device_type())).await;

        (transport, session, rx)
    }
}

use helpers::*;

// ============================================================================
// Attach and permission
// ============================================================================

mod attach_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_device_is_ignored() {
        let transport = SimTransport::new();
        let (session, mut rx) = spawn(&transport);

        session
            .notify_attached(DeviceIdentity::new(0x1234, 0x0001))
            .await
            .unwrap();

        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.device_info().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unlisted_product_from_known_vendor_is_ignored() {
        let transport = SimTransport::new();
        let (session, mut rx) = spawn(&transport);

        session
            .notify_attached(DeviceIdentity::new(13420, 9999))
            .await
            .unwrap();

        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_iron_reports_attached() {
        let transport = SimTransport::new();
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(iron::ID).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::StateChanged(snapshot(true, false, DeviceType::Iron))
        );

        let info = session.device_info().await.unwrap().unwrap();
        assert_eq!(info.usb_vendor_id, 13420);
        assert_eq!(info.usb_product_id, 7937);
        assert_eq!(info.port_name, None);
    }

    #[tokio::test]
    async fn test_double_connect_requests_permission_once() {
        let transport = SimTransport::new();
        transport.attach(hub::ID);
        let (session, _rx) = spawn(&transport);

        session.notify_attached(hub::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.request_connect().await.unwrap();

        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::AwaitingPermission(DeviceType::Hub)
        );
        assert_eq!(transport.stats().permission_requests, vec![hub::ID]);
        assert_eq!(transport.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_grant_connects_with_link_params() {
        let transport = SimTransport::new();
        transport.attach(hub::ID);
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(hub::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.notify_permission(hub::ID, true).await.unwrap();

        wait_for_state(&mut rx, snapshot(true, true, DeviceType::Hub)).await;

        let stats = transport.stats();
        assert_eq!(stats.last_params, Some(LINK_PARAMS));
        assert_eq!(stats.control_lines, Some((true, true)));
        assert_eq!(stats.read_loops_started, 1);
        assert_eq!(stats.open_links(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let transport = SimTransport::new();
        transport.attach(iron::ID);
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(iron::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.notify_permission(iron::ID, false).await.unwrap();

        assert_eq!(
            wait_for_error(&mut rx).await,
            SessionError::PermissionDenied(iron::ID)
        );
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::Attached(DeviceType::Iron)
        );
        assert_eq!(transport.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_late_grant_after_detach_is_ignored() {
        let transport = SimTransport::new();
        transport.attach(hub::ID);
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(hub::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.notify_detached(hub::ID).await.unwrap();
        session.notify_permission(hub::ID, true).await.unwrap();

        wait_for_state(&mut rx, disconnected()).await;
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(transport.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_iron_late_grant_after_detach_is_ignored() {
        let transport = SimTransport::new();
        transport.attach(iron::ID);
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(iron::ID).await.unwrap();
        session.request_connect().await.unwrap();
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::AwaitingPermission(DeviceType::Iron)
        );

        session.notify_detached(iron::ID).await.unwrap();
        session.notify_permission(iron::ID, true).await.unwrap();

        wait_for_state(&mut rx, disconnected()).await;
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert!(session.device_info().await.unwrap().is_none());
        assert_eq!(transport.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_connect_adopts_enumerated_device() {
        let transport = SimTransport::with_device(iron::ID);
        let (session, mut rx) = spawn(&transport);

        assert!(session.query_attached_valid_device().await);
        session.request_connect().await.unwrap();

        wait_for_state(&mut rx, snapshot(true, false, DeviceType::Iron)).await;
        wait_for_state(&mut rx, snapshot(true, true, DeviceType::Iron)).await;
    }

    #[tokio::test]
    async fn test_connect_without_device() {
        let transport = SimTransport::new();
        let (session, mut rx) = spawn(&transport);

        assert!(!session.query_attached_valid_device().await);
        session.request_connect().await.unwrap();

        assert_eq!(wait_for_error(&mut rx).await, SessionError::NoDeviceAttached);
    }
}

// ============================================================================
// Connected session
// ============================================================================

mod connected_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let transport = SimTransport::with_device(hub::ID);
        let (session, _rx) = spawn(&transport);

        assert_eq!(
            session.send("version\r\n").await,
            Err(SessionError::NotConnected)
        );
        assert!(transport.stats().writes.is_empty());
    }

    #[tokio::test]
    async fn test_send_yields_frame() {
        let (transport, session, mut rx) = connected(hub::ID).await;

        session.send("version\r\n").await.unwrap();

        assert_eq!(wait_for_frame(&mut rx).await, "FixHub firmware 2.4.1");
        assert_eq!(transport.stats().writes, vec![b"version\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_encoded_writes_decoded_bytes() {
        let (transport, session, mut rx) = connected(hub::ID).await;

        session.send_encoded("dmVyc2lvbg0K").await.unwrap();

        assert_eq!(wait_for_frame(&mut rx).await, "FixHub firmware 2.4.1");
        assert_eq!(transport.stats().writes, vec![b"version\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_send_encoded_rejects_bad_payload() {
        let (transport, session, _rx) = connected(hub::ID).await;

        assert!(matches!(
            session.send_encoded("not base64!").await,
            Err(SessionError::InvalidEncoding(_))
        ));
        assert!(transport.stats().writes.is_empty());
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::Connected(DeviceType::Hub)
        );
    }

    #[tokio::test]
    async fn test_unread_events_do_not_stall_commands() {
        const FRAMES: usize = 300;
        let (transport, session, mut rx) = connected(hub::ID).await;

        for i in 0..FRAMES {
            let mut bytes = format!("line {}", i).into_bytes();
            bytes.extend_from_slice(hub::PROMPT);
            assert!(transport.inject(&bytes));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = tokio::time::timeout(WAIT, session.status()).await;
        assert_eq!(status.unwrap().unwrap(), snapshot(true, true, DeviceType::Hub));
        tokio::time::timeout(WAIT, session.disconnect())
            .await
            .unwrap()
            .unwrap();

        let mut frames = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::FrameReceived { text } = event {
                frames.push(text);
            }
        }
        assert_eq!(frames.len(), FRAMES);
        assert_eq!(frames.last().map(String::as_str), Some("line 299"));
    }

    #[tokio::test]
    async fn test_iron_frames_use_iron_prompt() {
        let (transport, session, mut rx) = connected(iron::ID).await;
        transport.set_chunk_size(1);

        session.send("status\r\n").await.unwrap();
        assert_eq!(wait_for_frame(&mut rx).await, "tip 320C, idle");

        let mut noise = b"boot ok\r\n".to_vec();
        noise.extend_from_slice(iron::PROMPT);
        noise.extend_from_slice(b"partial");
        assert!(transport.inject(&noise));
        assert_eq!(wait_for_frame(&mut rx).await, "boot ok");
    }

    #[tokio::test]
    async fn test_device_info_when_connected() {
        let (_transport, session, _rx) = connected(hub::ID).await;

        let info = session.device_info().await.unwrap().unwrap();
        assert_eq!(info.device_type, DeviceType::Hub);
        assert_eq!(info.identity(), hub::ID);
        assert!(info.port_name.unwrap().starts_with("sim://"));
        assert_eq!(info.product.as_deref(), Some("FixHub"));
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let (transport, session, _rx) = connected(hub::ID).await;
        transport.set_faults(SimFaults {
            write_timeout: true,
            ..Default::default()
        });

        assert_eq!(
            session.send("help\r\n").await,
            Err(SessionError::WriteTimeout { timeout_ms: 1000 })
        );
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::Connected(DeviceType::Hub)
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (transport, session, mut rx) = connected(hub::ID).await;

        session.disconnect().await.unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::StateChanged(disconnected())));

        let stats = transport.stats();
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.read_loops_stopped, 1);

        session.disconnect().await.unwrap();
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.stats().closes, 1);
        assert_eq!(
            session.send("help\r\n").await,
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (transport, session, mut rx) = connected(hub::ID).await;

        session.disconnect().await.unwrap();
        session.request_connect().await.unwrap();
        wait_for_state(&mut rx, snapshot(true, true, DeviceType::Hub)).await;

        assert_eq!(transport.stats().opens, 2);
        assert_eq!(transport.stats().open_links(), 1);
    }

    #[tokio::test]
    async fn test_detach_while_connected_closes_link() {
        let (transport, session, mut rx) = connected(iron::ID).await;

        transport.detach(iron::ID);
        session.notify_detached(iron::ID).await.unwrap();

        wait_for_state(&mut rx, disconnected()).await;
        let stats = transport.stats();
        assert_eq!(stats.open_links(), 0);
        assert_eq!(stats.read_loops_stopped, 1);
    }

    #[tokio::test]
    async fn test_detach_of_other_device_disconnects() {
        let (transport, session, mut rx) = connected(hub::ID).await;

        session.notify_detached(iron::ID).await.unwrap();

        wait_for_state(&mut rx, disconnected()).await;
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(transport.stats().open_links(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_link() {
        let (transport, session, _rx) = connected(hub::ID).await;

        session.shutdown().await.unwrap();

        assert_eq!(transport.stats().open_links(), 0);
        assert_eq!(session.status().await, Err(SessionError::SessionClosed));
    }

    #[tokio::test]
    async fn test_shutdown_reports_disconnect_before_stream_ends() {
        let (transport, session, mut rx) = connected(iron::ID).await;

        session.shutdown().await.unwrap();

        assert_eq!(rx.recv().await, Some(SessionEvent::StateChanged(disconnected())));
        assert_eq!(rx.recv().await, None);
        assert_eq!(transport.stats().closes, 1);
    }
}

// ============================================================================
// Failures and cancellation
// ============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_open_failure_rolls_back() {
        let transport = SimTransport::with_device(hub::ID);
        transport.set_faults(SimFaults {
            fail_open: true,
            ..Default::default()
        });
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(hub::ID).await.unwrap();
        session.request_connect().await.unwrap();

        let error = wait_for_error(&mut rx).await;
        assert!(matches!(
            error,
            SessionError::TransportOpenFailure { device, .. } if device == hub::ID
        ));
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::Attached(DeviceType::Hub)
        );
    }

    #[tokio::test]
    async fn test_configure_failure_closes_handle() {
        let transport = SimTransport::with_device(iron::ID);
        transport.set_faults(SimFaults {
            fail_configure: true,
            ..Default::default()
        });
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(iron::ID).await.unwrap();
        session.request_connect().await.unwrap();

        assert!(matches!(
            wait_for_error(&mut rx).await,
            SessionError::Configuration(_)
        ));
        let stats = transport.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.read_loops_started, 0);
        assert!(!session.state().await.unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_detach_during_open_discards_link() {
        let transport = SimTransport::with_device(hub::ID);
        transport.set_open_delay(Duration::from_millis(200));
        let (session, mut rx) = spawn(&transport);

        session.notify_attached(hub::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.notify_detached(hub::ID).await.unwrap();

        wait_for_state(&mut rx, disconnected()).await;
        eventually(|| transport.stats().closes == 1).await;

        let stats = transport.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.read_loops_stopped, 1);
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_during_open_keeps_device_attached() {
        let transport = SimTransport::with_device(iron::ID);
        transport.set_open_delay(Duration::from_millis(200));
        let (session, _rx) = spawn(&transport);

        session.notify_attached(iron::ID).await.unwrap();
        session.request_connect().await.unwrap();
        session.disconnect().await.unwrap();

        eventually(|| transport.stats().closes == 1).await;
        assert_eq!(
            session.state().await.unwrap(),
            ConnectionState::Attached(DeviceType::Iron)
        );
    }
}

// ============================================================================
// Hotplug
// ============================================================================

mod hotplug_tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_reports_attach_and_detach() {
        let transport = SimTransport::new();
        let (session, mut rx) = spawn(&transport);
        let (stop_tx, handle) = spawn_hotplug_watcher(
            session.clone(),
            Arc::new(transport.clone()),
            Duration::from_millis(20),
        );

        transport.attach(DeviceIdentity::new(0x0403, 0x6001));
        transport.attach(iron::ID);
        wait_for_state(&mut rx, snapshot(true, false, DeviceType::Iron)).await;

        transport.detach(iron::ID);
        wait_for_state(&mut rx, disconnected()).await;

        stop_tx.send(HotplugCommand::Shutdown).await.unwrap();
        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_stops_with_session() {
        let transport = SimTransport::new();
        let (session, _rx) = spawn(&transport);
        let (_stop_tx, handle) = spawn_hotplug_watcher(
            session.clone(),
            Arc::new(transport.clone()),
            Duration::from_millis(20),
        );

        session.shutdown().await.unwrap();
        transport.attach(hub::ID);

        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    }
}
