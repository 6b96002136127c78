//! Device sessions and frame streaming for Helios laser DACs.
//!
//! This crate discovers Helios DACs over USB and the network, manages the
//! connection lifecycle of each one, and writes point frames to them in three
//! formats: standard 12-bit points, 16-bit high-resolution points, and
//! extended points with four auxiliary channels.
//!
//! # Getting Started
//!
//! ```no_run
//! use helios_dac::{DeviceRegistry, DeviceStatus, Error, Point, TransportConfig, WriteFrameFlags};
//!
//! let mut registry = DeviceRegistry::new(TransportConfig::default());
//! registry.open_all()?;
//!
//! let square = [
//!     Point::new(1000, 1000, 255, 0, 0, 255),
//!     Point::new(3000, 1000, 0, 255, 0, 255),
//!     Point::new(3000, 3000, 0, 0, 255, 255),
//!     Point::new(1000, 3000, 255, 255, 255, 255),
//! ];
//!
//! let session = registry.session_mut(0)?;
//! loop {
//!     // One frame in flight at a time: poll until the device is ready.
//!     if session.status()? != DeviceStatus::Ready {
//!         continue;
//!     }
//!     match session.write_frame(20_000, WriteFrameFlags::empty(), &square) {
//!         Ok(_) | Err(Error::Busy) => {}
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok::<(), helios_dac::Error>(())
//! ```
//!
//! # Sessions
//!
//! Each [`DeviceSession`] moves through the states of [`SessionState`]:
//! Disconnected → Connecting → Idle ⇄ Streaming, with Closed and Faulted as
//! terminal states. Writes are non-blocking: a second frame while one is in
//! flight is rejected with [`Error::Busy`], and completion is observed with
//! [`DeviceSession::status`].
//!
//! # Status Codes
//!
//! Every fallible result converts to a signed integer with
//! [`StatusCode::status_code`]; see [`status`] for the values.
//!
//! # Features
//!
//! - `usb` (default): USB transport via libusb
//! - `network` (default): UDP transport and broadcast discovery
//! - `serde`: `Serialize`/`Deserialize` for configuration and plain data types
//! - `testutils`: in-memory [`MockTransport`](testutils::MockTransport) and
//!   [`MockDiscoverer`](testutils::MockDiscoverer)

pub mod discovery;
mod error;
pub mod frame;
#[cfg(feature = "network")]
mod net_utils;
pub mod protocols;
pub mod registry;
pub mod session;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod transport;
pub mod types;

// Crate-level error types
pub use error::{status, Error, Result, StatusCode};

// Transport trait and configuration
pub use transport::{Transport, TransportConfig, TransportError};

// Discovery
pub use discovery::{DeviceDiscovery, Discoverer};

// Sessions and registry
pub use registry::DeviceRegistry;
pub use session::DeviceSession;

// Frames
pub use frame::{Frame, FramePoints};

// Core types
pub use types::{
    Capabilities, DeviceIdentity, DeviceStatus, LogLevel, Point, PointExt, PointHighRes,
    SessionState, TransportFilter, TransportKind, WriteFrameFlags, WriteStatus,
    HIGH_RES_MIN_FIRMWARE, MAX_NAME_LEN,
};

// Built-in transports
#[cfg(feature = "network")]
pub use protocols::helios::{NetDiscovery, NetTransport};
#[cfg(feature = "usb")]
pub use protocols::helios::{UsbDiscovery, UsbTransport};

// Re-export rusb for consumers that need the Context type
#[cfg(feature = "usb")]
pub use rusb;
