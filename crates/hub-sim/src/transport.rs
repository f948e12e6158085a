//! In-memory transport
//!
//! `SimTransport` stands in for the USB driver. Tests attach and detach
//! virtual devices, decide permission outcomes, inject faults and read back
//! counters to check what the session did with the transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use hub_link::{
    ByteSink, LinkParams, ProbedDevice, ReadEvent, ReadLoop, SerialLink, Transport,
    TransportError,
};
use hub_protocol::{registry, DeviceIdentity};
use tracing::{debug, info};

use crate::device::{VirtualDevice, VirtualDeviceConfig};

/// How often the simulated read loop re-checks its stop flag
const READ_POLL: Duration = Duration::from_millis(10);

/// Failures to inject into the next transport calls
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// `open` fails with `OpenFailed`
    pub fail_open: bool,
    /// `configure` rejects the link parameters
    pub fail_configure: bool,
    /// `write` fails with `WriteTimeout`
    pub write_timeout: bool,
}

/// Counters of what was asked of the transport
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub enumerations: usize,
    pub permission_requests: Vec<DeviceIdentity>,
    pub opens: usize,
    pub closes: usize,
    pub read_loops_started: usize,
    pub read_loops_stopped: usize,
    pub writes: Vec<Vec<u8>>,
    pub last_params: Option<LinkParams>,
    pub control_lines: Option<(bool, bool)>,
}

impl SimStats {
    /// Links opened and not yet closed
    pub fn open_links(&self) -> usize {
        self.opens.saturating_sub(self.closes)
    }
}

#[derive(Debug)]
struct SimState {
    attached: Vec<DeviceIdentity>,
    permitted: HashSet<DeviceIdentity>,
    faults: SimFaults,
    open_delay: Duration,
    /// Bytes per chunk delivered to the read loop
    chunk_size: usize,
    stats: SimStats,
    /// Feeds the currently running read loop
    inbound: Option<mpsc::Sender<Vec<u8>>>,
}

/// Simulated USB serial transport
#[derive(Debug, Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                attached: Vec::new(),
                permitted: HashSet::new(),
                faults: SimFaults::default(),
                open_delay: Duration::ZERO,
                chunk_size: 7,
                stats: SimStats::default(),
                inbound: None,
            })),
        }
    }

    /// A transport with one device plugged in and already permitted
    pub fn with_device(identity: DeviceIdentity) -> Self {
        let transport = Self::new();
        transport.attach(identity);
        transport.grant(identity);
        transport
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Plug a device in
    pub fn attach(&self, identity: DeviceIdentity) {
        let mut state = self.state();
        if !state.attached.contains(&identity) {
            info!("Simulated attach of {}", identity);
            state.attached.push(identity);
        }
    }

    /// Unplug a device; the running read loop (if any) loses its source
    pub fn detach(&self, identity: DeviceIdentity) {
        let mut state = self.state();
        state.attached.retain(|id| *id != identity);
        state.inbound = None;
        info!("Simulated detach of {}", identity);
    }

    /// Grant access to a device up front
    pub fn grant(&self, identity: DeviceIdentity) {
        self.state().permitted.insert(identity);
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.state().faults = faults;
    }

    /// Make `open` block for `delay` before completing
    pub fn set_open_delay(&self, delay: Duration) {
        self.state().open_delay = delay;
    }

    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.state().chunk_size = chunk_size.max(1);
    }

    /// Push raw bytes to the running read loop as if the device sent them
    ///
    /// Returns false when no read loop is running.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        let state = self.state();
        match &state.inbound {
            Some(tx) => send_chunked(tx, bytes, state.chunk_size),
            None => false,
        }
    }

    pub fn stats(&self) -> SimStats {
        self.state().stats.clone()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn send_chunked(tx: &mpsc::Sender<Vec<u8>>, bytes: &[u8], chunk_size: usize) -> bool {
    bytes
        .chunks(chunk_size.max(1))
        .all(|chunk| tx.send(chunk.to_vec()).is_ok())
}

impl Transport for SimTransport {
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, TransportError> {
        let mut state = self.state();
        state.stats.enumerations += 1;
        Ok(state.attached.clone())
    }

    fn has_permission(&self, identity: DeviceIdentity) -> bool {
        self.state().permitted.contains(&identity)
    }

    fn request_permission(&self, identity: DeviceIdentity) -> Result<(), TransportError> {
        debug!("Simulated permission request for {}", identity);
        self.state().stats.permission_requests.push(identity);
        Ok(())
    }

    fn probe(&self, identity: DeviceIdentity) -> Result<ProbedDevice, TransportError> {
        let state = self.state();
        if !state.attached.contains(&identity) {
            return Err(TransportError::DeviceNotFound(identity));
        }

        Ok(ProbedDevice {
            identity,
            port_name: format!("sim://{}", identity),
            product: registry::product_name(identity.device_type()).map(str::to_string),
            serial_number: Some("SIM0001".to_string()),
        })
    }

    fn open(&self, device: &ProbedDevice) -> Result<Box<dyn SerialLink>, TransportError> {
        let delay = self.state().open_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        if !state.attached.contains(&device.identity) {
            return Err(TransportError::DeviceNotFound(device.identity));
        }
        if state.faults.fail_open {
            return Err(TransportError::OpenFailed {
                port: device.port_name.clone(),
                reason: "simulated open failure".to_string(),
            });
        }

        state.stats.opens += 1;
        info!("Simulated open of {}", device.port_name);

        Ok(Box::new(SimLink {
            inner: Arc::clone(&self.inner),
            device: VirtualDevice::new(VirtualDeviceConfig::for_type(
                device.identity.device_type(),
            )),
            reader_tx: None,
            closed: false,
        }))
    }
}

/// An open simulated link wired to a [`VirtualDevice`]
struct SimLink {
    inner: Arc<Mutex<SimState>>,
    device: VirtualDevice,
    reader_tx: Option<mpsc::Sender<Vec<u8>>>,
    closed: bool,
}

impl SimLink {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl SerialLink for SimLink {
    fn configure(&mut self, params: &LinkParams) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.state();
        if state.faults.fail_configure {
            return Err(TransportError::Configuration(
                "simulated configuration failure".to_string(),
            ));
        }
        state.stats.last_params = Some(*params);
        Ok(())
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state().stats.control_lines = Some((dtr, rts));
        Ok(())
    }

    fn start_async_read(&mut self, mut sink: ByteSink) -> Result<Box<dyn ReadLoop>, TransportError> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        self.reader_tx = Some(tx.clone());
        {
            let mut state = self.state();
            state.inbound = Some(tx);
            state.stats.read_loops_started += 1;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("hub-sim-reader".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    match rx.recv_timeout(READ_POLL) {
                        Ok(bytes) => sink(ReadEvent::Data(bytes)),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Box::new(SimReadLoop {
            inner: Arc::clone(&self.inner),
            stop,
            thread: Some(thread),
        }))
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.ensure_open()?;
        let chunk_size = {
            let mut state = self.state();
            state.stats.writes.push(data.to_vec());
            if state.faults.write_timeout {
                return Err(TransportError::WriteTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            state.chunk_size
        };

        let output = self.device.receive(data);
        if let Some(tx) = &self.reader_tx {
            send_chunked(tx, &output, chunk_size);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.closed = true;
        self.reader_tx = None;

        let mut state = self.state();
        state.inbound = None;
        state.stats.closes += 1;
        info!("Simulated close of {} link", self.device.device_type());
        Ok(())
    }
}

struct SimReadLoop {
    inner: Arc<Mutex<SimState>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReadLoop for SimReadLoop {
    fn stop(mut self: Box<Self>) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.stats.read_loops_stopped += 1;
    }
}

impl Drop for SimReadLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
