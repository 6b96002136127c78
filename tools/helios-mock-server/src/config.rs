//! Configuration for the mock device.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::constants::{HELIOS_NET_PORT, MAX_NAME_LEN};

/// Static device configuration (set at construction time).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Initial device name; hosts may change it with a set-name command.
    pub name: String,
    pub firmware_version: u32,
    pub bind_address: SocketAddr,
    pub read_timeout: Duration,
    /// Idle time after which a claim lapses.
    pub link_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration for a device called `name`, truncated to the
    /// 20 bytes the device stores.
    ///
    /// Binds to `127.0.0.1:0` by default (ephemeral port for testing).
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(MAX_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            name: name[..end].to_string(),
            firmware_version: 7,
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            read_timeout: Duration::from_millis(50),
            link_timeout: Duration::from_secs(5),
        }
    }

    /// Create a configuration that binds to the standard Helios port on all
    /// interfaces.
    pub fn new_on_standard_port(name: &str) -> Self {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, HELIOS_NET_PORT));
        Self::new(name).with_bind_address(addr)
    }

    pub fn with_firmware_version(mut self, version: u32) -> Self {
        self.firmware_version = version;
        self
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the socket read timeout, which bounds how quickly `stop` is noticed.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }
}
