//! Device-agnostic types shared by the transports, sessions and registry.
//!
//! The three point records mirror the binary layout the device firmware
//! expects (fields in declared order, no reordering), so they are `#[repr(C)]`
//! and can be handed across a foreign-call boundary unchanged.

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Point Models
// =============================================================================

/// Standard point: 12-bit position, 8-bit color and intensity.
///
/// `x` and `y` range from 0 (0V, bottom/left) to 4095 (max, top/right).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: u16,
    pub y: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub i: u8,
}

impl Point {
    /// Largest coordinate value a standard point can carry.
    pub const MAX_COORDINATE: u16 = 0x0FFF;

    /// Creates a new standard point.
    pub fn new(x: u16, y: u16, r: u8, g: u8, b: u8, i: u8) -> Self {
        Self { x, y, r, g, b, i }
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: u16, y: u16) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

/// High-resolution point: 16-bit position and color, no intensity channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointHighRes {
    pub x: u16,
    pub y: u16,
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl PointHighRes {
    pub fn new(x: u16, y: u16, r: u16, g: u16, b: u16) -> Self {
        Self { x, y, r, g, b }
    }
}

/// Extended point: every channel 16-bit, plus four user channels for
/// accessory outputs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointExt {
    pub x: u16,
    pub y: u16,
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub i: u16,
    pub user1: u16,
    pub user2: u16,
    pub user3: u16,
    pub user4: u16,
}

impl PointExt {
    /// Creates an extended point with all user channels zeroed.
    pub fn new(x: u16, y: u16, r: u16, g: u16, b: u16, i: u16) -> Self {
        Self {
            x,
            y,
            r,
            g,
            b,
            i,
            ..Default::default()
        }
    }

    /// Sets the four user channels.
    pub fn with_user(mut self, user: [u16; 4]) -> Self {
        [self.user1, self.user2, self.user3, self.user4] = user;
        self
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Modifiers for a frame write. The default (empty) value repeats the frame
    /// until the next one arrives, starting it after the current one finishes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
    pub struct WriteFrameFlags: u8 {
        /// Start output immediately instead of waiting for the current frame to finish.
        const START_IMMEDIATELY = 0b0000_0001;
        /// Play the frame once instead of repeating it.
        const SINGLE_MODE = 0b0000_0010;
        /// Don't block the device while it waits for the transfer to finish.
        const DONT_BLOCK = 0b0000_0100;
    }
}

bitflags! {
    /// Optional device features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
    pub struct Capabilities: u32 {
        /// Accepts high-resolution and extended point formats.
        const HIGH_RESOLUTION = 0b0000_0001;
    }
}

/// First USB firmware revision that accepts the 16-bit point formats.
pub const HIGH_RES_MIN_FIRMWARE: u32 = 6;

impl Capabilities {
    /// Capabilities implied by the transport and reported firmware revision.
    pub fn for_firmware(kind: TransportKind, firmware_version: u32) -> Self {
        match kind {
            TransportKind::Network => Capabilities::HIGH_RESOLUTION,
            TransportKind::Usb if firmware_version >= HIGH_RES_MIN_FIRMWARE => {
                Capabilities::HIGH_RESOLUTION
            }
            TransportKind::Usb => Capabilities::empty(),
        }
    }
}

// =============================================================================
// Transport Kinds
// =============================================================================

/// Physical medium connecting host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransportKind {
    Usb,
    Network,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => write!(f, "USB"),
            TransportKind::Network => write!(f, "network"),
        }
    }
}

/// Which transports a discovery pass should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransportFilter {
    Usb,
    Network,
    #[default]
    Both,
}

impl TransportFilter {
    /// Returns true if devices of the given kind pass this filter.
    pub fn matches(&self, kind: TransportKind) -> bool {
        match self {
            TransportFilter::Both => true,
            TransportFilter::Usb => kind == TransportKind::Usb,
            TransportFilter::Network => kind == TransportKind::Network,
        }
    }
}

// =============================================================================
// Identity and State
// =============================================================================

/// Longest name, in bytes, a device will store (excluding the terminator).
pub const MAX_NAME_LEN: usize = 20;

/// Cached identity of an opened device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    /// Human-readable label persisted on the device.
    pub name: String,
    pub kind: TransportKind,
    pub firmware_version: u32,
    pub capabilities: Capabilities,
    /// Transport endpoint, e.g. `usb:1:5` or `net:192.168.1.20:7355`.
    pub endpoint: String,
}

impl DeviceIdentity {
    pub fn supports_higher_resolutions(&self) -> bool {
        self.capabilities.contains(Capabilities::HIGH_RESOLUTION)
    }
}

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Connected, ready to accept a frame.
    Idle,
    /// A frame has been handed to the device and not yet acknowledged.
    Streaming,
    Closed,
    /// Unrecoverable transport error; only `close()` is accepted.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
            SessionState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Live device readiness, as reported by a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceStatus {
    /// Ready for the next frame.
    Ready,
    /// Still playing the previous frame.
    Busy,
    /// Booting or otherwise not yet able to play frames.
    Initializing,
}

/// Outcome of an accepted frame write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStatus {
    /// The frame was handed to the transport.
    Written,
    /// The frame was empty; nothing was sent.
    NoOp,
}

/// Verbosity of the underlying transport library's own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogLevel {
    #[default]
    None,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Maps the integer levels used by libusb (0 = none .. 4 = debug).
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            0 => Some(LogLevel::None),
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warning),
            3 => Some(LogLevel::Info),
            4 => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_layouts_match_device_records() {
        assert_eq!(std::mem::size_of::<Point>(), 8);
        assert_eq!(std::mem::size_of::<PointHighRes>(), 10);
        assert_eq!(std::mem::size_of::<PointExt>(), 20);
    }

    #[test]
    fn test_capabilities_for_firmware() {
        assert!(Capabilities::for_firmware(TransportKind::Usb, 5).is_empty());
        assert_eq!(
            Capabilities::for_firmware(TransportKind::Usb, HIGH_RES_MIN_FIRMWARE),
            Capabilities::HIGH_RESOLUTION
        );
        assert_eq!(
            Capabilities::for_firmware(TransportKind::Network, 0),
            Capabilities::HIGH_RESOLUTION
        );
    }

    #[test]
    fn test_transport_filter_matches() {
        assert!(TransportFilter::Both.matches(TransportKind::Usb));
        assert!(TransportFilter::Both.matches(TransportKind::Network));
        assert!(TransportFilter::Usb.matches(TransportKind::Usb));
        assert!(!TransportFilter::Usb.matches(TransportKind::Network));
        assert!(!TransportFilter::Network.matches(TransportKind::Usb));
    }

    #[test]
    fn test_log_level_from_level() {
        assert_eq!(LogLevel::from_level(0), Some(LogLevel::None));
        assert_eq!(LogLevel::from_level(4), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_level(5), None);
        assert_eq!(LogLevel::from_level(-1), None);
    }

    #[test]
    fn test_ext_point_user_channels() {
        let p = PointExt::new(1, 2, 3, 4, 5, 6).with_user([7, 8, 9, 10]);
        assert_eq!((p.user1, p.user2, p.user3, p.user4), (7, 8, 9, 10));
        assert_eq!(p.i, 6);
    }
}
