//! Helios command set and frame encoding.

use byteorder::{WriteBytesExt, LE};
use std::io;

use crate::transport::TransportError;
use crate::types::{DeviceStatus, Point, PointExt, PointHighRes, WriteFrameFlags, MAX_NAME_LEN};

// -------------------------------------------------------------------------------------------------
//  Constants
// -------------------------------------------------------------------------------------------------

/// USB vendor ID.
pub const VENDOR_ID: u16 = 0x1209;
/// USB product ID.
pub const PRODUCT_ID: u16 = 0xE500;

pub const INTERFACE: u8 = 0;
pub const ALT_SETTING: u8 = 1;
pub const EP_BULK_OUT: u8 = 0x02;
pub const EP_INT_OUT: u8 = 0x06;
pub const EP_INT_IN: u8 = 0x83;

/// Size of a control reply packet.
pub const CONTROL_PACKET_SIZE: usize = 32;

/// Unrelated replies skipped while waiting for a specific one.
pub const MAX_STALE_REPLIES: usize = 3;

/// SDK version announced to the device after opening.
pub const SDK_VERSION: u8 = 6;

/// Maximum points in one frame.
pub const MAX_POINTS: usize = 0x1000;
/// Maximum output rate.
pub const MAX_PPS: u32 = 0xFFFF;

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

/// Leading byte of 16-bit frame payloads.
pub const WIDE_FRAME_MAGIC: u8 = 0xA5;

/// Bytes per standard point on the wire.
pub const STANDARD_POINT_SIZE: usize = 7;
/// Bytes trailing a standard frame (pps, count, flags).
pub const STANDARD_TRAILER_SIZE: usize = 5;
/// Bytes leading a 16-bit frame (magic, format, flags, pps, count).
pub const WIDE_HEADER_SIZE: usize = 9;

// Network datagram kinds
pub const NET_PORT: u16 = 7355;
pub const NET_CONTROL: u8 = 0x01;
pub const NET_FRAME: u8 = 0x02;
pub const NET_DISCOVER: u8 = 0x03;
pub const NET_CLAIM: u8 = 0x04;
pub const NET_RELEASE: u8 = 0x05;
pub const NET_DISCOVER_MAGIC: &[u8; 4] = b"HNET";
/// Frame bytes carried per datagram.
pub const NET_CHUNK_SIZE: usize = 1024;
/// Bytes leading each frame chunk (kind, seq, index, count).
pub const NET_CHUNK_HEADER_SIZE: usize = 5;

// -------------------------------------------------------------------------------------------------
//  Control Commands
// -------------------------------------------------------------------------------------------------

/// A control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Stop,
    SetShutter(bool),
    GetStatus,
    GetFirmwareVersion,
    GetName,
    SetName(&'a str),
    SetSdkVersion(u8),
    EraseFirmware,
}

impl Command<'_> {
    /// Encode the request as a control packet.
    ///
    /// `SetName` is truncated to [`MAX_NAME_LEN`] bytes; callers validate first.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Stop => vec![CMD_STOP, 0],
            Command::SetShutter(level) => vec![CMD_SET_SHUTTER, u8::from(level)],
            Command::GetStatus => vec![CMD_GET_STATUS, 0],
            Command::GetFirmwareVersion => vec![CMD_GET_FIRMWARE_VERSION, 0],
            Command::GetName => vec![CMD_GET_NAME, 0],
            Command::SetName(name) => {
                let mut packet = vec![0u8; CONTROL_PACKET_SIZE];
                packet[0] = CMD_SET_NAME;
                let bytes = name.as_bytes();
                let len = bytes.len().min(MAX_NAME_LEN);
                packet[1..1 + len].copy_from_slice(&bytes[..len]);
                packet
            }
            Command::SetSdkVersion(version) => vec![CMD_SET_SDK_VERSION, version],
            Command::EraseFirmware => vec![CMD_ERASE_FIRMWARE, 0],
        }
    }
}

/// Parse a `REPLY_STATUS` packet.
pub fn parse_status(reply: &[u8]) -> Result<DeviceStatus, TransportError> {
    match reply {
        [REPLY_STATUS, STATUS_READY, ..] => Ok(DeviceStatus::Ready),
        [REPLY_STATUS, STATUS_BUSY, ..] => Ok(DeviceStatus::Busy),
        [REPLY_STATUS, STATUS_INITIALIZING, ..] => Ok(DeviceStatus::Initializing),
        _ => Err(TransportError::malformed(format!(
            "invalid status reply {:02X?}",
            reply
        ))),
    }
}

/// Parse a `REPLY_FIRMWARE_VERSION` packet.
pub fn parse_firmware_version(reply: &[u8]) -> Result<u32, TransportError> {
    match reply {
        [REPLY_FIRMWARE_VERSION, b0, b1, b2, b3, ..] => {
            Ok(u32::from_le_bytes([*b0, *b1, *b2, *b3]))
        }
        _ => Err(TransportError::malformed(format!(
            "invalid firmware version reply {:02X?}",
            reply
        ))),
    }
}

/// Parse a `REPLY_NAME` packet. The name runs until the first NUL.
pub fn parse_name(reply: &[u8]) -> Result<String, TransportError> {
    let Some((&REPLY_NAME, body)) = reply.split_first() else {
        return Err(TransportError::malformed(format!(
            "invalid name reply {:02X?}",
            reply
        )));
    };
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    Ok(String::from_utf8_lossy(&body[..end]).into_owned())
}

// -------------------------------------------------------------------------------------------------
//  Point Encoding
// -------------------------------------------------------------------------------------------------

/// Point types that may be written to bytes.
pub trait WriteToBytes {
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()>;
}

/// Types that have a constant size when written to bytes.
pub trait SizeBytes {
    const SIZE_BYTES: usize;
}

impl WriteToBytes for Point {
    /// 12-bit x and y packed into three bytes, then r, g, b, i.
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8((self.x >> 4) as u8)?;
        writer.write_u8((((self.x & 0x0F) << 4) as u8) | ((self.y >> 8) & 0x0F) as u8)?;
        writer.write_u8((self.y & 0xFF) as u8)?;
        writer.write_u8(self.r)?;
        writer.write_u8(self.g)?;
        writer.write_u8(self.b)?;
        writer.write_u8(self.i)?;
        Ok(())
    }
}

impl SizeBytes for Point {
    const SIZE_BYTES: usize = STANDARD_POINT_SIZE;
}

impl WriteToBytes for PointHighRes {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LE>(self.x)?;
        writer.write_u16::<LE>(self.y)?;
        writer.write_u16::<LE>(self.r)?;
        writer.write_u16::<LE>(self.g)?;
        writer.write_u16::<LE>(self.b)?;
        Ok(())
    }
}

impl SizeBytes for PointHighRes {
    const SIZE_BYTES: usize = 10;
}

impl WriteToBytes for PointExt {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LE>(self.x)?;
        writer.write_u16::<LE>(self.y)?;
        writer.write_u16::<LE>(self.r)?;
        writer.write_u16::<LE>(self.g)?;
        writer.write_u16::<LE>(self.b)?;
        writer.write_u16::<LE>(self.i)?;
        writer.write_u16::<LE>(self.user1)?;
        writer.write_u16::<LE>(self.user2)?;
        writer.write_u16::<LE>(self.user3)?;
        writer.write_u16::<LE>(self.user4)?;
        Ok(())
    }
}

impl SizeBytes for PointExt {
    const SIZE_BYTES: usize = 20;
}

// -------------------------------------------------------------------------------------------------
//  Frame Encoding
// -------------------------------------------------------------------------------------------------

/// Format tag of a 16-bit frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFormat {
    HighResolution = 1,
    Extended = 2,
}

/// Encode a standard frame.
///
/// Firmware drops transfers whose length is a multiple of 64 bytes, so in that
/// case the last point is left out and the rate scaled to keep the frame's
/// duration.
pub fn encode_standard_frame(
    pps: u32,
    flags: WriteFrameFlags,
    points: &[Point],
) -> io::Result<Vec<u8>> {
    let mut count = points.len();
    let mut pps_actual = pps;
    if (count * STANDARD_POINT_SIZE + STANDARD_TRAILER_SIZE) % 64 == 0 {
        count -= 1;
        pps_actual = ((pps as f64 * count as f64 / points.len() as f64) + 0.5) as u32;
    }

    let mut buf = Vec::with_capacity(count * STANDARD_POINT_SIZE + STANDARD_TRAILER_SIZE);
    for point in &points[..count] {
        point.write_to_bytes(&mut buf)?;
    }
    buf.write_u16::<LE>(pps_actual as u16)?;
    buf.write_u16::<LE>(count as u16)?;
    buf.write_u8(flags.bits())?;
    Ok(buf)
}

/// Encode a high-resolution or extended frame.
pub fn encode_wide_frame<P: WriteToBytes + SizeBytes>(
    format: FrameFormat,
    pps: u32,
    flags: WriteFrameFlags,
    points: &[P],
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(WIDE_HEADER_SIZE + points.len() * P::SIZE_BYTES);
    buf.write_u8(WIDE_FRAME_MAGIC)?;
    buf.write_u8(format as u8)?;
    buf.write_u8(flags.bits())?;
    buf.write_u32::<LE>(pps)?;
    buf.write_u16::<LE>(points.len() as u16)?;
    for point in points {
        point.write_to_bytes(&mut buf)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_point_packing() {
        let mut buf = Vec::new();
        Point::new(0xABC, 0x123, 10, 20, 30, 40)
            .write_to_bytes(&mut buf)
            .unwrap();
        assert_eq!(buf, vec![0xAB, 0xC1, 0x23, 10, 20, 30, 40]);
    }

    #[test]
    fn test_standard_frame_trailer() {
        let points = vec![Point::new(4095, 0, 255, 0, 0, 255); 10];
        let flags = WriteFrameFlags::SINGLE_MODE | WriteFrameFlags::DONT_BLOCK;
        let buf = encode_standard_frame(30_000, flags, &points).unwrap();
        assert_eq!(buf.len(), 10 * 7 + 5);
        let trailer = &buf[70..];
        assert_eq!(u16::from_le_bytes([trailer[0], trailer[1]]), 30_000);
        assert_eq!(u16::from_le_bytes([trailer[2], trailer[3]]), 10);
        assert_eq!(trailer[4], 0b110);
    }

    #[test]
    fn test_standard_frame_avoids_multiple_of_64_bytes() {
        // 45 points * 7 + 5 = 320 = 5 * 64
        let points = vec![Point::blanked(2048, 2048); 45];
        let buf = encode_standard_frame(30_000, WriteFrameFlags::empty(), &points).unwrap();
        assert_eq!(buf.len(), 44 * 7 + 5);
        assert_ne!(buf.len() % 64, 0);
        let trailer = &buf[buf.len() - 5..];
        let pps = u16::from_le_bytes([trailer[0], trailer[1]]);
        let count = u16::from_le_bytes([trailer[2], trailer[3]]);
        assert_eq!(count, 44);
        // 30000 * 44 / 45 = 29333.3
        assert_eq!(pps, 29_333);
    }

    #[test]
    fn test_wide_frame_layout() {
        let points = [PointHighRes::new(0x0102, 0x0304, 0xFFFF, 0, 0x8000)];
        let buf = encode_wide_frame(
            FrameFormat::HighResolution,
            40_000,
            WriteFrameFlags::START_IMMEDIATELY,
            &points,
        )
        .unwrap();
        assert_eq!(buf.len(), WIDE_HEADER_SIZE + 10);
        assert_eq!(&buf[..3], &[WIDE_FRAME_MAGIC, 1, 0b001]);
        assert_eq!(u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]), 40_000);
        assert_eq!(u16::from_le_bytes([buf[7], buf[8]]), 1);
        assert_eq!(&buf[9..13], &[0x02, 0x01, 0x04, 0x03]);
        assert_eq!(&buf[17..19], &[0x00, 0x80]);
    }

    #[test]
    fn test_extended_frame_carries_user_channels() {
        let points = [PointExt::new(1, 2, 3, 4, 5, 6).with_user([7, 8, 9, 0xABCD])];
        let buf =
            encode_wide_frame(FrameFormat::Extended, 1000, WriteFrameFlags::empty(), &points)
                .unwrap();
        assert_eq!(buf.len(), WIDE_HEADER_SIZE + 20);
        assert_eq!(buf[1], FrameFormat::Extended as u8);
        assert_eq!(&buf[buf.len() - 2..], &[0xCD, 0xAB]);
    }

    #[test]
    fn test_set_name_packet() {
        let packet = Command::SetName("Laser 1").encode();
        assert_eq!(packet.len(), CONTROL_PACKET_SIZE);
        assert_eq!(packet[0], CMD_SET_NAME);
        assert_eq!(&packet[1..8], b"Laser 1");
        assert!(packet[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_replies() {
        assert_eq!(parse_status(&[REPLY_STATUS, 1]).unwrap(), DeviceStatus::Ready);
        assert_eq!(parse_status(&[REPLY_STATUS, 0]).unwrap(), DeviceStatus::Busy);
        assert_eq!(
            parse_status(&[REPLY_STATUS, 2]).unwrap(),
            DeviceStatus::Initializing
        );
        assert!(parse_status(&[REPLY_STATUS, 9]).is_err());
        assert!(parse_status(&[REPLY_NAME, 1]).is_err());

        assert_eq!(
            parse_firmware_version(&[REPLY_FIRMWARE_VERSION, 7, 0, 0, 0]).unwrap(),
            7
        );
        assert!(parse_firmware_version(&[REPLY_FIRMWARE_VERSION, 7]).is_err());

        assert_eq!(parse_name(b"\x85Helios 1\0garbage").unwrap(), "Helios 1");
        assert_eq!(parse_name(b"\x85").unwrap(), "");
        assert!(parse_name(&[]).is_err());
    }
}
