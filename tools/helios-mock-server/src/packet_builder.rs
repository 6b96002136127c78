//! Pure functions for building and reading Helios network datagrams.

use crate::constants::{
    MAX_NAME_LEN, NET_CHUNK_HEADER_SIZE, NET_CLAIM, NET_CONTROL, NET_DISCOVER,
    NET_DISCOVER_MAGIC, REPLY_FIRMWARE_VERSION, REPLY_NAME, REPLY_STATUS,
};

/// Build a discovery reply: kind, magic, then the NUL-terminated name.
pub fn build_discovery_reply(name: &str) -> Vec<u8> {
    let mut reply = Vec::with_capacity(1 + NET_DISCOVER_MAGIC.len() + name.len() + 1);
    reply.push(NET_DISCOVER);
    reply.extend_from_slice(NET_DISCOVER_MAGIC);
    reply.extend_from_slice(name.as_bytes());
    reply.push(0);
    reply
}

/// Build a claim reply. A zero byte refuses the claim.
pub fn build_claim_reply(granted: bool) -> Vec<u8> {
    vec![NET_CLAIM, u8::from(granted)]
}

pub fn build_status_reply(status: u8) -> Vec<u8> {
    vec![NET_CONTROL, REPLY_STATUS, status]
}

pub fn build_firmware_reply(version: u32) -> Vec<u8> {
    let mut reply = vec![NET_CONTROL, REPLY_FIRMWARE_VERSION];
    reply.extend_from_slice(&version.to_le_bytes());
    reply
}

pub fn build_name_reply(name: &str) -> Vec<u8> {
    let mut reply = vec![NET_CONTROL, REPLY_NAME];
    reply.extend_from_slice(name.as_bytes());
    reply.push(0);
    reply
}

/// Read the name carried by a set-name control packet (command byte first).
pub fn parse_set_name(packet: &[u8]) -> String {
    let body = packet.get(1..).unwrap_or_default();
    let body = &body[..body.len().min(MAX_NAME_LEN)];
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Header of one frame chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub seq: u16,
    pub index: u8,
    pub count: u8,
}

/// Split a frame chunk datagram into its header and payload.
pub fn parse_frame_chunk(datagram: &[u8]) -> Option<(ChunkHeader, &[u8])> {
    if datagram.len() < NET_CHUNK_HEADER_SIZE {
        return None;
    }
    let header = ChunkHeader {
        seq: u16::from_le_bytes([datagram[1], datagram[2]]),
        index: datagram[3],
        count: datagram[4],
    };
    if header.count == 0 || header.index >= header.count {
        return None;
    }
    Some((header, &datagram[NET_CHUNK_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CMD_SET_NAME, NET_FRAME, STATUS_READY};

    #[test]
    fn test_build_discovery_reply() {
        let reply = build_discovery_reply("Bench");
        assert_eq!(reply[0], NET_DISCOVER);
        assert_eq!(&reply[1..5], b"HNET");
        assert_eq!(&reply[5..], b"Bench\0");
    }

    #[test]
    fn test_build_control_replies() {
        assert_eq!(build_claim_reply(false), vec![NET_CLAIM, 0]);
        assert_eq!(build_status_reply(STATUS_READY), vec![NET_CONTROL, REPLY_STATUS, 1]);
        assert_eq!(
            build_firmware_reply(0x0102),
            vec![NET_CONTROL, REPLY_FIRMWARE_VERSION, 0x02, 0x01, 0, 0]
        );
        assert_eq!(&build_name_reply("A")[..], &[NET_CONTROL, REPLY_NAME, b'A', 0]);
    }

    #[test]
    fn test_parse_set_name() {
        let mut packet = vec![0u8; 32];
        packet[0] = CMD_SET_NAME;
        packet[1..6].copy_from_slice(b"Stage");
        assert_eq!(parse_set_name(&packet), "Stage");
        assert_eq!(parse_set_name(&[CMD_SET_NAME]), "");
    }

    #[test]
    fn test_parse_frame_chunk() {
        let datagram = [NET_FRAME, 0x34, 0x12, 1, 2, 0xAA, 0xBB];
        let (header, payload) = parse_frame_chunk(&datagram).unwrap();
        assert_eq!(
            header,
            ChunkHeader {
                seq: 0x1234,
                index: 1,
                count: 2
            }
        );
        assert_eq!(payload, &[0xAA, 0xBB]);

        assert!(parse_frame_chunk(&[NET_FRAME, 0, 0, 2, 2]).is_none());
        assert!(parse_frame_chunk(&[NET_FRAME, 0, 0]).is_none());
    }
}
