//! Behavior trait for customizing mock device responses.

use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::STATUS_READY;

/// Behavior hooks for customizing how the mock device responds.
///
/// The server core handles framing, claiming and frame reassembly; the
/// behavior decides what the device reports and observes what it receives.
pub trait DeviceBehavior: Send + 'static {
    /// Called for every datagram, before any filtering.
    fn on_packet_received(&mut self, _raw_data: &[u8]) {}

    /// Called with every control packet from the claiming host, starting
    /// at the command byte.
    fn on_command(&mut self, _packet: &[u8]) {}

    /// Called once all chunks of a frame have arrived.
    fn on_frame_received(&mut self, payload: &[u8]);

    /// Whether to answer a datagram of the given kind.
    ///
    /// Return `false` to simulate a device that has dropped off the network.
    fn should_respond(&self, kind: u8) -> bool;

    /// Status byte reported to status polls (one of `STATUS_*`).
    fn get_status_byte(&self) -> u8;

    /// Whether a claim from `addr` is granted while the device is free.
    fn grant_claim(&self, _addr: SocketAddr) -> bool {
        true
    }

    /// Delay applied before each datagram is processed.
    fn get_simulated_latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Called when a host claims the device.
    fn on_client_connected(&mut self, _addr: SocketAddr) {}

    /// Called when the claim is released or times out.
    fn on_client_disconnected(&mut self) {}
}

/// Always ready, answers everything, ignores frames.
#[derive(Default)]
pub struct SimpleBehavior;

impl DeviceBehavior for SimpleBehavior {
    fn on_frame_received(&mut self, _payload: &[u8]) {}

    fn should_respond(&self, _kind: u8) -> bool {
        true
    }

    fn get_status_byte(&self) -> u8 {
        STATUS_READY
    }
}
