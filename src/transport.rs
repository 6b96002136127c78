//! Transport channel trait and its configuration.
//!
//! A [`Transport`] abstracts one physical link (USB or network) to a single
//! device. It moves bytes and classifies failures; it never retries. Policy
//! (what a busy or lost device means for the session) lives in
//! [`DeviceSession`](crate::session::DeviceSession).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::protocols::helios::protocol::{self, Command};
use crate::types::{DeviceStatus, LogLevel, TransportKind};

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure reported by a transport.
///
/// The variants separate "retry later" from "device gone" from "caller bug",
/// plus the reasons a transport cannot be claimed in the first place.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The device cannot accept data right now.
    #[error("device busy")]
    Busy,

    /// The device disconnected or became unreachable.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// The payload or a reply was not valid for the protocol.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// No reply within the configured timeout.
    #[error("timed out waiting for device")]
    Timeout,

    /// Another host or process already holds the device.
    #[error("device already in use")]
    InUse,

    /// The OS refused access to the device.
    #[error("permission denied")]
    PermissionDenied,

    /// The device is no longer present.
    #[error("device not found")]
    NotFound,

    /// The transport subsystem itself could not be initialized.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Operation on a transport that is not open.
    #[error("transport not open")]
    NotOpen,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Create a disconnected error with a message.
    pub fn disconnected(msg: impl Into<String>) -> Self {
        TransportError::Disconnected(msg.into())
    }

    /// Create a malformed-payload error with a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        TransportError::Malformed(msg.into())
    }

    /// Returns true if the link can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected(_)
                | TransportError::NotFound
                | TransportError::NotOpen
                | TransportError::Io(_)
        )
    }

    /// Returns true if this error means the transport could not be claimed.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            TransportError::InUse
                | TransportError::PermissionDenied
                | TransportError::NotFound
                | TransportError::Unavailable(_)
        )
    }

    /// Returns true if the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Busy | TransportError::Timeout)
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration handed to every transport at construction.
///
/// This carries the debug verbosity as well, so two registries in one process
/// can use different settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransportConfig {
    /// Verbosity of the transport library's own diagnostics.
    pub log_level: LogLevel,
    /// Timeout for one control request/reply exchange.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub control_timeout: Duration,
    /// Base timeout for a frame transfer; 1 ms per 32 bytes is added on top.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub frame_timeout_base: Duration,
    /// UDP port network devices listen on.
    pub net_port: u16,
    /// How long network discovery waits for probe replies.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub discovery_timeout: Duration,
    /// Explicit probe targets. When empty, discovery broadcasts on every
    /// IPv4 interface.
    pub scan_addresses: Vec<SocketAddr>,
    /// SDK version announced to the device after opening.
    pub sdk_version: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::None,
            control_timeout: Duration::from_millis(100),
            frame_timeout_base: Duration::from_millis(8),
            net_port: protocol::NET_PORT,
            discovery_timeout: Duration::from_millis(300),
            scan_addresses: Vec::new(),
            sdk_version: protocol::SDK_VERSION,
        }
    }
}

impl TransportConfig {
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_net_port(mut self, port: u16) -> Self {
        self.net_port = port;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Probe these addresses instead of broadcasting.
    pub fn with_scan_addresses(mut self, addresses: Vec<SocketAddr>) -> Self {
        self.scan_addresses = addresses;
        self
    }

    /// Timeout for transferring a frame payload of `len` bytes.
    pub fn frame_timeout(&self, len: usize) -> Duration {
        self.frame_timeout_base + Duration::from_millis((len >> 5) as u64)
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// One physical link to a single device.
///
/// # Contract
///
/// - `open` claims the link; failure to claim returns an open-failure error
///   (`InUse`, `PermissionDenied`, `NotFound`, `Unavailable`).
/// - `send_frame` either transfers the whole payload or fails; a partial
///   transfer is reported as `Disconnected`.
/// - `Busy` and `Timeout` are transient, `Disconnected` is fatal and
///   `Malformed` means the caller produced bytes the device rejects.
/// - No retries happen here.
pub trait Transport: Send + 'static {
    /// The medium this transport uses.
    fn kind(&self) -> TransportKind;

    /// Stable identifier of the physical endpoint, used to de-duplicate
    /// devices across discovery passes.
    fn endpoint(&self) -> &str;

    /// Claim the link.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Release the link. Safe to call when not open.
    fn close(&mut self);

    /// Returns whether the link is currently claimed.
    fn is_open(&self) -> bool;

    /// Send one control packet.
    fn send_control(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Receive one control reply into `buf`, returning its length.
    fn recv_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Transfer a serialized frame, returning the number of bytes sent.
    fn send_frame(&mut self, payload: &[u8]) -> Result<usize, TransportError>;

    /// Discard any stale control replies queued on the link.
    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send a control request and wait for the reply tagged `reply_code`.
    ///
    /// Up to [`protocol::MAX_STALE_REPLIES`] unrelated replies are skipped.
    fn exchange(&mut self, request: &[u8], reply_code: u8) -> Result<Vec<u8>, TransportError> {
        self.send_control(request)?;
        let mut buf = [0u8; protocol::CONTROL_PACKET_SIZE];
        for _ in 0..=protocol::MAX_STALE_REPLIES {
            let len = self.recv_control(&mut buf)?;
            if len > 0 && buf[0] == reply_code {
                return Ok(buf[..len].to_vec());
            }
            log::trace!(
                "{}: skipping stale control reply {:02X?}",
                self.endpoint(),
                &buf[..len]
            );
        }
        Err(TransportError::malformed(format!(
            "no reply with code 0x{:02X}",
            reply_code
        )))
    }

    /// Lightweight live poll of the device's readiness.
    fn poll_status(&mut self) -> Result<DeviceStatus, TransportError> {
        let reply = self.exchange(&Command::GetStatus.encode(), protocol::REPLY_STATUS)?;
        protocol::parse_status(&reply)
    }
}

// =============================================================================
// Re-exports of the built-in transports
// =============================================================================

#[cfg(feature = "usb")]
pub use crate::protocols::helios::usb::UsbTransport;

#[cfg(feature = "network")]
pub use crate::protocols::helios::net::NetTransport;
