//! In-memory transport and discoverer for tests.
//!
//! A [`MockDevice`] is the device side: it answers control requests, records
//! everything the host sends, and can be scripted to fail. Hand its
//! [`MockTransport`] to a [`DeviceSession`](crate::DeviceSession), or add it to
//! a [`MockDiscoverer`] registered with a registry, then inspect the recorded
//! traffic through the device handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::discovery::Discoverer;
use crate::protocols::helios::protocol::{
    self, CMD_GET_FIRMWARE_VERSION, CMD_GET_NAME, CMD_GET_STATUS, CMD_SET_NAME,
    REPLY_FIRMWARE_VERSION, REPLY_NAME, REPLY_STATUS,
};
use crate::transport::{Transport, TransportConfig, TransportError};
use crate::types::{DeviceStatus, TransportKind};

/// Failure a [`MockDevice`] can be scripted to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Busy,
    Disconnected,
    Malformed,
    Timeout,
    InUse,
    PermissionDenied,
    NotFound,
}

impl MockFault {
    fn to_error(self) -> TransportError {
        match self {
            MockFault::Busy => TransportError::Busy,
            MockFault::Disconnected => TransportError::disconnected("mock device unplugged"),
            MockFault::Malformed => TransportError::malformed("mock device rejected payload"),
            MockFault::Timeout => TransportError::Timeout,
            MockFault::InUse => TransportError::InUse,
            MockFault::PermissionDenied => TransportError::PermissionDenied,
            MockFault::NotFound => TransportError::NotFound,
        }
    }
}

#[derive(Debug)]
struct MockState {
    name: String,
    firmware_version: u32,
    status: DeviceStatus,
    present: bool,
    open: bool,
    open_count: usize,
    controls: Vec<Vec<u8>>,
    frames: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    fail_open: Option<MockFault>,
    fail_control: Option<MockFault>,
    fail_status: Option<MockFault>,
    fail_frame: Option<MockFault>,
}

/// Device side of a mock transport. Cloning shares the same device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    endpoint: String,
    kind: TransportKind,
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// A ready device named "Helios" with firmware version 7.
    pub fn new(endpoint: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind,
            state: Arc::new(Mutex::new(MockState {
                name: "Helios".to_string(),
                firmware_version: 7,
                status: DeviceStatus::Ready,
                present: true,
                open: false,
                open_count: 0,
                controls: Vec::new(),
                frames: Vec::new(),
                replies: VecDeque::new(),
                fail_open: None,
                fail_control: None,
                fail_status: None,
                fail_frame: None,
            })),
        }
    }

    pub fn usb(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, TransportKind::Usb)
    }

    pub fn network(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, TransportKind::Network)
    }

    pub fn with_name(self, name: &str) -> Self {
        self.lock().name = name.to_string();
        self
    }

    pub fn with_firmware_version(self, version: u32) -> Self {
        self.lock().firmware_version = version;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A host-side transport connected to this device.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            device: self.clone(),
            open: false,
        }
    }

    /// Status returned by subsequent status polls.
    pub fn set_status(&self, status: DeviceStatus) {
        self.lock().status = status;
    }

    /// Whether discovery reports this device.
    pub fn set_present(&self, present: bool) {
        self.lock().present = present;
    }

    pub fn is_present(&self) -> bool {
        self.lock().present
    }

    pub fn fail_open(&self, fault: Option<MockFault>) {
        self.lock().fail_open = fault;
    }

    /// Fail every control request other than status polls.
    pub fn fail_control(&self, fault: Option<MockFault>) {
        self.lock().fail_control = fault;
    }

    pub fn fail_status(&self, fault: Option<MockFault>) {
        self.lock().fail_status = fault;
    }

    pub fn fail_frames(&self, fault: Option<MockFault>) {
        self.lock().fail_frame = fault;
    }

    /// Name currently stored on the device.
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Whether a host currently holds the device.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Every control packet received, in order.
    pub fn controls(&self) -> Vec<Vec<u8>> {
        self.lock().controls.clone()
    }

    /// Command bytes of every control packet received, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.lock().controls.iter().filter_map(|p| p.first().copied()).collect()
    }

    /// Every frame payload received, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    /// Forget recorded traffic.
    pub fn clear_traffic(&self) {
        let mut state = self.lock();
        state.controls.clear();
        state.frames.clear();
    }

    /// Queue an unsolicited reply ahead of the next real one.
    pub fn push_stale_reply(&self, reply: Vec<u8>) {
        self.lock().replies.push_back(reply);
    }
}

/// Host side of a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    open: bool,
}

impl MockTransport {
    pub fn device(&self) -> &MockDevice {
        &self.device
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.device.kind
    }

    fn endpoint(&self) -> &str {
        &self.device.endpoint
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.device.lock();
        if let Some(fault) = state.fail_open {
            return Err(fault.to_error());
        }
        if !state.present {
            return Err(TransportError::NotFound);
        }
        if state.open {
            return Err(TransportError::InUse);
        }
        state.open = true;
        state.open_count += 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.lock().open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send_control(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.device.lock();
        let command = packet.first().copied().unwrap_or_default();
        let fault = if command == CMD_GET_STATUS {
            state.fail_status
        } else {
            state.fail_control
        };
        if let Some(fault) = fault {
            return Err(fault.to_error());
        }

        state.controls.push(packet.to_vec());
        match command {
            CMD_GET_STATUS => {
                let status = match state.status {
                    DeviceStatus::Ready => protocol::STATUS_READY,
                    DeviceStatus::Busy => protocol::STATUS_BUSY,
                    DeviceStatus::Initializing => protocol::STATUS_INITIALIZING,
                };
                state.replies.push_back(vec![REPLY_STATUS, status]);
            }
            CMD_GET_FIRMWARE_VERSION => {
                let mut reply = vec![REPLY_FIRMWARE_VERSION];
                reply.extend_from_slice(&state.firmware_version.to_le_bytes());
                state.replies.push_back(reply);
            }
            CMD_GET_NAME => {
                let mut reply = vec![REPLY_NAME];
                reply.extend_from_slice(state.name.as_bytes());
                reply.push(0);
                state.replies.push_back(reply);
            }
            CMD_SET_NAME => {
                let body = &packet[1..];
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                state.name = String::from_utf8_lossy(&body[..end]).into_owned();
            }
            _ => {}
        }
        Ok(())
    }

    fn recv_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let reply = self
            .device
            .lock()
            .replies
            .pop_front()
            .ok_or(TransportError::Timeout)?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn send_frame(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.device.lock();
        if let Some(fault) = state.fail_frame {
            return Err(fault.to_error());
        }
        state.frames.push(payload.to_vec());
        Ok(payload.len())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Discoverer reporting a scripted set of [`MockDevice`]s. Cloning shares the
/// device list, so a test can keep a handle after registering a clone.
#[derive(Debug, Clone)]
pub struct MockDiscoverer {
    kind: TransportKind,
    devices: Arc<Mutex<Vec<MockDevice>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MockDiscoverer {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            devices: Arc::new(Mutex::new(Vec::new())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Add a device; it is reported while present.
    pub fn add(&self, device: MockDevice) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device);
    }

    /// Make scans fail as if the transport subsystem were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap_or_else(PoisonError::into_inner) = unavailable;
    }
}

impl Discoverer for MockDiscoverer {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn scan(
        &mut self,
        _config: &TransportConfig,
    ) -> Result<Vec<Box<dyn Transport>>, TransportError> {
        if *self.unavailable.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TransportError::Unavailable(format!(
                "mock {} subsystem disabled",
                self.kind
            )));
        }
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(devices
            .iter()
            .filter(|d| d.is_present())
            .map(|d| Box::new(d.transport()) as Box<dyn Transport>)
            .collect())
    }
}
