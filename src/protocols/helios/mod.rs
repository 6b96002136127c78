//! Helios laser DAC protocol.
//!
//! The same command set runs over both transports:
//! - USB: interrupt endpoints for control packets, a bulk endpoint for frames.
//! - Network: UDP datagrams carrying the control packets verbatim and frames
//!   split into chunks.
//!
//! [`protocol`] holds the byte encoding; [`usb`] and [`net`] hold the
//! transports and their discoverers.

pub mod protocol;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(feature = "network")]
pub mod net;

pub use protocol::{Command, FrameFormat};

#[cfg(feature = "usb")]
pub use usb::{UsbDiscovery, UsbTransport};

#[cfg(feature = "network")]
pub use net::{NetDiscovery, NetTransport};
