//! Helios network protocol constants.

// Datagram kinds
pub const NET_CONTROL: u8 = 0x01;
pub const NET_FRAME: u8 = 0x02;
pub const NET_DISCOVER: u8 = 0x03;
pub const NET_CLAIM: u8 = 0x04;
pub const NET_RELEASE: u8 = 0x05;

pub const NET_DISCOVER_MAGIC: &[u8; 4] = b"HNET";

/// Bytes before the payload of a frame chunk: kind, seq (u16 LE), index, count.
pub const NET_CHUNK_HEADER_SIZE: usize = 5;

// Control commands
pub const CMD_STOP: u8 = 0x01;
pub const CMD_SET_SHUTTER: u8 = 0x02;
pub const CMD_GET_STATUS: u8 = 0x03;
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x04;
pub const CMD_GET_NAME: u8 = 0x05;
pub const CMD_SET_NAME: u8 = 0x06;
pub const CMD_SET_SDK_VERSION: u8 = 0x07;
pub const CMD_ERASE_FIRMWARE: u8 = 0xDE;

// Control replies
pub const REPLY_STATUS: u8 = 0x83;
pub const REPLY_FIRMWARE_VERSION: u8 = 0x84;
pub const REPLY_NAME: u8 = 0x85;

// Status byte values
pub const STATUS_BUSY: u8 = 0x00;
pub const STATUS_READY: u8 = 0x01;
pub const STATUS_INITIALIZING: u8 = 0x02;

pub const MAX_NAME_LEN: usize = 20;

// Default port
pub const HELIOS_NET_PORT: u16 = 7355;
