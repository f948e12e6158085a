//! Desktop transport over the `serialport` crate
//!
//! Desktop operating systems expose USB CDC devices as ordinary serial ports
//! and gate access through file permissions, so there is no permission
//! round-trip here. The read loop is a dedicated thread polling a cloned port
//! handle with a short timeout, which lets it notice a stop request promptly.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hub_protocol::DeviceIdentity;
use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::scanner::PortScanner;
use crate::transport::{
    ByteSink, LinkParams, ProbedDevice, ReadEvent, ReadLoop, SerialLink, Transport, LINK_PARAMS,
};

/// How long a blocking read waits before re-checking the stop flag
const READ_POLL: Duration = Duration::from_millis(100);

/// Transport backed by the host's serial port drivers
#[derive(Debug, Clone, Default)]
pub struct SerialPortTransport {
    scanner: PortScanner,
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self {
            scanner: PortScanner::new(),
        }
    }
}

impl Transport for SerialPortTransport {
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        Ok(self
            .scanner
            .enumerate_ports()?
            .iter()
            .filter_map(|p| p.identity())
            .collect())
    }

    fn has_permission(&self, _identity: DeviceIdentity) -> bool {
        true
    }

    fn request_permission(&self, identity: DeviceIdentity) -> Result<(), TransportError> {
        debug!("Permission for {} is governed by the OS, nothing to request", identity);
        Ok(())
    }

    fn probe(&self, identity: DeviceIdentity) -> Result<ProbedDevice, TransportError> {
        self.scanner
            .enumerate_ports()?
            .into_iter()
            .find(|p| p.identity() == Some(identity))
            .and_then(|p| p.into_probed())
            .ok_or(TransportError::DeviceNotFound(identity))
    }

    fn open(&self, device: &ProbedDevice) -> Result<Box<dyn SerialLink>, TransportError> {
        debug!("Opening {} for {}", device.port_name, device.identity);

        let port = serialport::new(&device.port_name, LINK_PARAMS.baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(device.identity)
                }
                _ => TransportError::OpenFailed {
                    port: device.port_name.clone(),
                    reason: e.to_string(),
                },
            })?;

        info!("Opened {}", device.port_name);
        Ok(Box::new(SerialPortLink {
            port_name: device.port_name.clone(),
            port: Some(port),
        }))
    }
}

/// An open serial port
pub struct SerialPortLink {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl SerialLink for SerialPortLink {
    fn configure(&mut self, params: &LinkParams) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        let rejected = |e: serialport::Error| TransportError::Configuration(e.to_string());

        port.set_baud_rate(params.baud_rate).map_err(rejected)?;
        port.set_data_bits(params.data_bits).map_err(rejected)?;
        port.set_stop_bits(params.stop_bits).map_err(rejected)?;
        port.set_parity(params.parity).map_err(rejected)?;
        port.set_flow_control(params.flow_control).map_err(rejected)?;

        debug!("Configured {}: {:?}", self.port_name, params);
        Ok(())
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.write_data_terminal_ready(dtr)?;
        port.write_request_to_send(rts)?;
        Ok(())
    }

    fn start_async_read(&mut self, sink: ByteSink) -> Result<Box<dyn ReadLoop>, TransportError> {
        let mut reader = self.port_mut()?.try_clone()?;
        reader.set_timeout(READ_POLL)?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let port_name = self.port_name.clone();

        let thread = std::thread::Builder::new()
            .name("hub-link-reader".to_string())
            .spawn(move || run_read_loop(reader, sink, flag, port_name))?;

        Ok(Box::new(ThreadReadLoop {
            stop,
            thread: Some(thread),
        }))
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;

        let result = port.write_all(data).and_then(|_| port.flush());
        match result {
            Ok(()) => {
                trace!("Wrote {} bytes: {:02X?}", data.len(), data);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransportError::WriteTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.port.take() {
            Some(port) => {
                drop(port);
                info!("Closed {}", self.port_name);
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }
}

fn run_read_loop(
    mut port: Box<dyn SerialPort>,
    mut sink: ByteSink,
    stop: Arc<AtomicBool>,
    port_name: String,
) {
    info!("Starting read loop on {}", port_name);
    let mut buffer = vec![0u8; 1024];

    while !stop.load(Ordering::Acquire) {
        match port.read(&mut buffer) {
            Ok(n) if n > 0 => {
                trace!("Read {} bytes from {}: {:02X?}", n, port_name, &buffer[..n]);
                sink(ReadEvent::Data(buffer[..n].to_vec()));
            }
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!("Read error on {}: {}", port_name, e);
                sink(ReadEvent::Failed(e.to_string()));
                break;
            }
        }
    }

    info!("Read loop ended on {}", port_name);
}

struct ThreadReadLoop {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReadLoop for ThreadReadLoop {
    fn stop(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

impl Drop for ThreadReadLoop {
    fn drop(&mut self) {
        // A loop dropped without stop() still winds down on its next poll
        self.stop.store(true, Ordering::Release);
    }
}
