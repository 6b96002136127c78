//! UDP transport for networked Helios DACs.
//!
//! Every datagram starts with a kind byte (see the `NET_*` constants in
//! [`protocol`](super::protocol)). Control packets travel verbatim after the
//! kind byte; frames are split into numbered chunks of at most
//! [`NET_CHUNK_SIZE`] bytes.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::discovery::Discoverer;
use crate::net_utils;
use crate::protocols::helios::protocol::{
    CONTROL_PACKET_SIZE, NET_CHUNK_HEADER_SIZE, NET_CHUNK_SIZE, NET_CLAIM, NET_CONTROL,
    NET_DISCOVER, NET_DISCOVER_MAGIC, NET_FRAME, NET_RELEASE, MAX_STALE_REPLIES,
};
use crate::transport::{Transport, TransportConfig, TransportError};
use crate::types::TransportKind;

/// Consecutive unanswered control requests before the device is considered gone.
pub const MAX_MISSED_REPLIES: u32 = 3;

/// Read timeout used while draining stale datagrams.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

const MAX_DATAGRAM: usize = 1500;

/// Create an IPv4 UDP socket bound to an ephemeral port.
fn bind_udp(broadcast: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&SockAddr::from(bind_addr))?;
    Ok(socket.into())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            TransportError::disconnected(err.to_string())
        }
        _ => TransportError::Io(err),
    }
}

/// Split a frame payload into chunk datagrams.
pub(crate) fn frame_datagrams(seq: u16, payload: &[u8]) -> Vec<Vec<u8>> {
    let count = payload.len().div_ceil(NET_CHUNK_SIZE);
    payload
        .chunks(NET_CHUNK_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let mut datagram = Vec::with_capacity(NET_CHUNK_HEADER_SIZE + chunk.len());
            datagram.push(NET_FRAME);
            datagram.extend_from_slice(&seq.to_le_bytes());
            datagram.push(index as u8);
            datagram.push(count as u8);
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect()
}

/// A Helios DAC reachable over UDP.
pub struct NetTransport {
    addr: SocketAddr,
    endpoint: String,
    socket: Option<UdpSocket>,
    config: TransportConfig,
    frame_seq: u16,
    missed_replies: u32,
}

impl NetTransport {
    /// Create a transport for the device at `addr`. Nothing is sent until
    /// [`Transport::open`].
    pub fn new(addr: SocketAddr, config: TransportConfig) -> Self {
        Self {
            addr,
            endpoint: format!("net:{}:{}", addr.ip(), addr.port()),
            socket: None,
            config,
            frame_seq: 0,
            missed_replies: 0,
        }
    }

    /// Address of the device.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::NotOpen)
    }

    fn claim(&self, socket: &UdpSocket) -> Result<(), TransportError> {
        socket.send(&[NET_CLAIM]).map_err(io_error)?;
        let mut buf = [0u8; MAX_DATAGRAM];
        for _ in 0..=MAX_STALE_REPLIES {
            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e) if is_timeout(&e) => return Err(TransportError::NotFound),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    return Err(TransportError::NotFound)
                }
                Err(e) => return Err(TransportError::Io(e)),
            };
            match &buf[..len] {
                [NET_CLAIM, 0, ..] => return Err(TransportError::InUse),
                [NET_CLAIM, _, ..] => return Ok(()),
                other => log::trace!("{}: ignoring {:02X?} during claim", self.endpoint, other),
            }
        }
        Err(TransportError::malformed("no claim reply"))
    }
}

impl Transport for NetTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = bind_udp(false)
            .map_err(|e| TransportError::Unavailable(format!("UDP socket: {e}")))?;
        socket.connect(self.addr).map_err(io_error)?;
        socket
            .set_read_timeout(Some(self.config.control_timeout))
            .map_err(TransportError::Io)?;

        self.claim(&socket)?;
        log::debug!("{}: claimed", self.endpoint);
        self.socket = Some(socket);
        self.missed_replies = 0;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.send(&[NET_RELEASE]);
            log::debug!("{}: released", self.endpoint);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn send_control(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let mut datagram = Vec::with_capacity(1 + packet.len());
        datagram.push(NET_CONTROL);
        datagram.extend_from_slice(packet);
        self.socket()?.send(&datagram).map_err(io_error)?;
        Ok(())
    }

    fn recv_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut datagram = [0u8; MAX_DATAGRAM];
        loop {
            let result = self.socket()?.recv(&mut datagram);
            match result {
                Ok(len) => {
                    self.missed_replies = 0;
                    let Some((&NET_CONTROL, body)) = datagram[..len].split_first() else {
                        log::trace!(
                            "{}: ignoring non-control datagram {:02X?}",
                            self.endpoint,
                            &datagram[..len.min(8)]
                        );
                        continue;
                    };
                    let n = body.len().min(buf.len()).min(CONTROL_PACKET_SIZE);
                    buf[..n].copy_from_slice(&body[..n]);
                    return Ok(n);
                }
                Err(e) if is_timeout(&e) => {
                    self.missed_replies += 1;
                    if self.missed_replies >= MAX_MISSED_REPLIES {
                        return Err(TransportError::disconnected(format!(
                            "{} consecutive control replies missed",
                            self.missed_replies
                        )));
                    }
                    return Err(TransportError::Timeout);
                }
                Err(e) => return Err(io_error(e)),
            }
        }
    }

    fn send_frame(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
        let seq = self.frame_seq;
        let socket = self.socket()?;
        for datagram in frame_datagrams(seq, payload) {
            socket.send(&datagram).map_err(io_error)?;
        }
        self.frame_seq = seq.wrapping_add(1);
        Ok(payload.len())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let socket = self.socket()?;
        socket
            .set_read_timeout(Some(DRAIN_TIMEOUT))
            .map_err(TransportError::Io)?;
        let mut buf = [0u8; MAX_DATAGRAM];
        while let Ok(len) = socket.recv(&mut buf) {
            log::trace!("{}: drained {} bytes", self.endpoint, len);
        }
        socket
            .set_read_timeout(Some(self.config.control_timeout))
            .map_err(TransportError::Io)?;
        Ok(())
    }
}

impl Drop for NetTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Discovers networked Helios DACs with a UDP probe.
///
/// Probes go to [`TransportConfig::scan_addresses`] when set, otherwise to
/// every local broadcast address.
#[derive(Debug, Default)]
pub struct NetDiscovery;

impl NetDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl Discoverer for NetDiscovery {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn scan(
        &mut self,
        config: &TransportConfig,
    ) -> Result<Vec<Box<dyn Transport>>, TransportError> {
        let socket = bind_udp(true)
            .map_err(|e| TransportError::Unavailable(format!("UDP socket: {e}")))?;

        let targets = if config.scan_addresses.is_empty() {
            net_utils::broadcast_targets(config.net_port)
        } else {
            config.scan_addresses.clone()
        };
        for target in targets.iter().filter(|t| t.is_ipv4()) {
            if let Err(e) = socket.send_to(&[NET_DISCOVER], target) {
                log::trace!("discovery probe to {} failed: {}", target, e);
            }
        }

        let deadline = Instant::now() + config.discovery_timeout;
        let mut seen = HashSet::new();
        let mut found: Vec<Box<dyn Transport>> = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket
                .set_read_timeout(Some(remaining))
                .map_err(TransportError::Io)?;
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(reply) => reply,
                Err(e) if is_timeout(&e) => break,
                Err(e) => {
                    log::debug!("discovery receive failed: {}", e);
                    break;
                }
            };
            match &buf[..len] {
                [NET_DISCOVER, magic @ ..] if magic.starts_with(NET_DISCOVER_MAGIC) => {}
                _ => continue,
            }
            if seen.insert(src) {
                log::debug!("found Helios network DAC at {}", src);
                found.push(Box::new(NetTransport::new(src, config.clone())));
            }
        }
        Ok(found)
    }
}
