//! Core mock Helios device implementation.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::behavior::DeviceBehavior;
use crate::config::ServerConfig;
use crate::constants::*;
use crate::packet_builder::*;

/// Chunks of one frame collected so far.
struct PendingFrame {
    seq: u16,
    chunks: Vec<Option<Vec<u8>>>,
}

impl PendingFrame {
    fn new(header: ChunkHeader) -> Self {
        Self {
            seq: header.seq,
            chunks: vec![None; header.count as usize],
        }
    }

    /// Store a chunk; returns the assembled payload once every chunk is in.
    fn insert(&mut self, index: u8, payload: &[u8]) -> Option<Vec<u8>> {
        self.chunks[index as usize] = Some(payload.to_vec());
        if self.chunks.iter().any(Option::is_none) {
            return None;
        }
        Some(self.chunks.iter().flatten().flatten().copied().collect())
    }
}

/// A mock network Helios DAC with pluggable behavior.
pub struct MockHeliosServer<B: DeviceBehavior> {
    socket: UdpSocket,
    addr: SocketAddr,
    config: ServerConfig,
    name: String,
    behavior: B,
    running: Arc<AtomicBool>,
    // Claim tracking
    client: Option<SocketAddr>,
    last_activity: Option<Instant>,
    pending: Option<PendingFrame>,
}

impl<B: DeviceBehavior> MockHeliosServer<B> {
    /// Create a new mock device with the given configuration and behavior.
    pub fn new(config: ServerConfig, behavior: B) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_address)?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        let addr = socket.local_addr()?;

        log::info!("Mock Helios device '{}' listening on {}", config.name, addr);

        Ok(Self {
            socket,
            addr,
            name: config.name.clone(),
            config,
            behavior,
            running: Arc::new(AtomicBool::new(true)),
            client: None,
            last_activity: None,
            pending: None,
        })
    }

    /// Get the server's local address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get a handle to control the running flag.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start the server in a background thread and return a handle.
    pub fn spawn(self) -> ServerHandle {
        let addr = self.addr();
        let running = self.running_handle();

        let handle = thread::spawn(move || {
            self.run();
        });

        ServerHandle {
            addr,
            running,
            handle: Some(handle),
        }
    }

    /// Run the server loop (blocking).
    pub fn run(mut self) {
        let mut buf = [0u8; 2048];

        while self.running.load(Ordering::SeqCst) {
            if let Some(last_time) = self.last_activity {
                if last_time.elapsed() > self.config.link_timeout && self.client.is_some() {
                    log::info!("Claim lapsed");
                    self.release();
                }
            }

            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    log::error!("Socket error: {}", e);
                    break;
                }
            };

            if len == 0 {
                continue;
            }

            let latency = self.behavior.get_simulated_latency();
            if !latency.is_zero() {
                thread::sleep(latency);
            }

            self.behavior.on_packet_received(&buf[..len]);

            let kind = buf[0];
            if !self.behavior.should_respond(kind) {
                log::debug!("Ignoring datagram kind 0x{:02X} (should_respond=false)", kind);
                continue;
            }

            match kind {
                NET_DISCOVER => {
                    log::debug!("Received discovery probe from {}", src);
                    self.send(&build_discovery_reply(&self.name), src);
                }
                NET_CLAIM => self.handle_claim(src),
                NET_RELEASE => {
                    if self.client == Some(src) {
                        log::info!("Client released: {}", src);
                        self.release();
                    }
                }
                NET_CONTROL if self.client == Some(src) => {
                    self.last_activity = Some(Instant::now());
                    self.handle_control(&buf[1..len], src);
                }
                NET_FRAME if self.client == Some(src) => {
                    self.last_activity = Some(Instant::now());
                    self.handle_frame_chunk(&buf[..len]);
                }
                NET_CONTROL | NET_FRAME => {
                    log::trace!("Ignoring datagram from unclaimed host {}", src);
                }
                _ => {
                    log::trace!("Unknown datagram kind: 0x{:02X} from {}", kind, src);
                }
            }
        }

        log::info!("Mock Helios device stopped");
    }

    fn send(&self, datagram: &[u8], dest: SocketAddr) {
        if let Err(e) = self.socket.send_to(datagram, dest) {
            log::debug!("Send to {} failed: {}", dest, e);
        }
    }

    fn release(&mut self) {
        self.client = None;
        self.last_activity = None;
        self.pending = None;
        self.behavior.on_client_disconnected();
    }

    fn handle_claim(&mut self, src: SocketAddr) {
        let granted = match self.client {
            Some(owner) => owner == src,
            None => self.behavior.grant_claim(src),
        };
        if granted && self.client.is_none() {
            log::info!("Client connected: {}", src);
            self.client = Some(src);
            self.behavior.on_client_connected(src);
        }
        if granted {
            self.last_activity = Some(Instant::now());
        } else {
            log::debug!("Refusing claim from {}", src);
        }
        self.send(&build_claim_reply(granted), src);
    }

    fn handle_control(&mut self, packet: &[u8], src: SocketAddr) {
        let Some(&command) = packet.first() else {
            return;
        };
        self.behavior.on_command(packet);

        match command {
            CMD_GET_STATUS => {
                self.send(&build_status_reply(self.behavior.get_status_byte()), src);
            }
            CMD_GET_FIRMWARE_VERSION => {
                self.send(&build_firmware_reply(self.config.firmware_version), src);
            }
            CMD_GET_NAME => {
                self.send(&build_name_reply(&self.name), src);
            }
            CMD_SET_NAME => {
                self.name = parse_set_name(packet);
                log::debug!("Renamed to '{}'", self.name);
            }
            CMD_STOP => {
                self.pending = None;
            }
            CMD_SET_SHUTTER | CMD_SET_SDK_VERSION | CMD_ERASE_FIRMWARE => {}
            _ => {
                log::trace!("Unknown command: 0x{:02X} from {}", command, src);
            }
        }
    }

    fn handle_frame_chunk(&mut self, datagram: &[u8]) {
        let Some((header, payload)) = parse_frame_chunk(datagram) else {
            log::debug!("Dropping malformed frame chunk");
            return;
        };

        let restart = match &self.pending {
            Some(pending) => {
                pending.seq != header.seq || pending.chunks.len() != header.count as usize
            }
            None => true,
        };
        if restart {
            self.pending = Some(PendingFrame::new(header));
        }

        let assembled = self
            .pending
            .as_mut()
            .and_then(|pending| pending.insert(header.index, payload));
        if let Some(frame) = assembled {
            self.pending = None;
            log::trace!("Frame {} assembled ({} bytes)", header.seq, frame.len());
            self.behavior.on_frame_received(&frame);
        }
    }
}

/// Handle for controlling a spawned server. Dropping it stops the server.
pub struct ServerHandle {
    /// The server's local address.
    pub addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop the server.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_frame_assembles_out_of_order() {
        let header = ChunkHeader {
            seq: 3,
            index: 0,
            count: 3,
        };
        let mut pending = PendingFrame::new(header);
        assert_eq!(pending.insert(2, &[5, 6]), None);
        assert_eq!(pending.insert(0, &[1, 2]), None);
        assert_eq!(pending.insert(1, &[3, 4]), Some(vec![1, 2, 3, 4, 5, 6]));
    }
}
