//! Headless virtual Helios DAC.
//!
//! Answers discovery on the local network so the `helios-dac` crate can be
//! exercised without hardware, and logs every frame it receives.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use clap::Parser;
use helios_mock_server::{
    DeviceBehavior, MockHeliosServer, ServerConfig, CMD_ERASE_FIRMWARE, CMD_SET_SHUTTER,
    CMD_STOP, HELIOS_NET_PORT, STATUS_BUSY, STATUS_READY,
};

#[derive(Parser)]
#[command(about = "Virtual network Helios DAC")]
struct Args {
    /// Device name reported to hosts
    #[arg(short, long, default_value = "Virtual Helios")]
    name: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = HELIOS_NET_PORT)]
    port: u16,

    /// Firmware version reported to hosts
    #[arg(long, default_value_t = 7)]
    firmware: u32,

    /// Delay before each datagram is handled, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

/// Point count, rate and format name read from a frame payload's header.
fn frame_header(payload: &[u8]) -> Option<(u16, u32, &'static str)> {
    match payload {
        [0xA5, format, _, p0, p1, p2, p3, c0, c1, ..] => Some((
            u16::from_le_bytes([*c0, *c1]),
            u32::from_le_bytes([*p0, *p1, *p2, *p3]),
            if *format == 1 { "high-resolution" } else { "extended" },
        )),
        [.., p0, p1, c0, c1, _] => Some((
            u16::from_le_bytes([*c0, *c1]),
            u32::from(u16::from_le_bytes([*p0, *p1])),
            "standard",
        )),
        _ => None,
    }
}

/// Plays each frame for its nominal duration, reporting busy meanwhile.
struct PlaybackBehavior {
    latency: Duration,
    busy_until: Option<Instant>,
    frames: u64,
}

impl DeviceBehavior for PlaybackBehavior {
    fn on_command(&mut self, packet: &[u8]) {
        match packet.first().copied() {
            Some(CMD_STOP) => {
                log::info!("Stop");
                self.busy_until = None;
            }
            Some(CMD_SET_SHUTTER) => {
                let open = packet.get(1) == Some(&1);
                log::info!("Shutter {}", if open { "open" } else { "closed" });
            }
            Some(CMD_ERASE_FIRMWARE) => log::warn!("Firmware erase requested (ignored)"),
            _ => {}
        }
    }

    fn on_frame_received(&mut self, payload: &[u8]) {
        self.frames += 1;
        let Some((count, pps, format)) = frame_header(payload) else {
            log::warn!("Frame {}: {} bytes, unreadable header", self.frames, payload.len());
            return;
        };
        log::info!("Frame {}: {} {} points at {} pps", self.frames, count, format, pps);
        if pps > 0 {
            let playback = Duration::from_secs_f64(f64::from(count) / f64::from(pps));
            self.busy_until = Some(Instant::now() + playback);
        }
    }

    fn should_respond(&self, _kind: u8) -> bool {
        true
    }

    fn get_status_byte(&self) -> u8 {
        match self.busy_until {
            Some(until) if Instant::now() < until => STATUS_BUSY,
            _ => STATUS_READY,
        }
    }

    fn get_simulated_latency(&self) -> Duration {
        self.latency
    }

    fn on_client_connected(&mut self, addr: SocketAddr) {
        log::info!("Claimed by {}", addr);
    }

    fn on_client_disconnected(&mut self) {
        log::info!("Released");
        self.busy_until = None;
    }
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig::new(&args.name)
        .with_firmware_version(args.firmware)
        .with_bind_address(SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port)));
    let behavior = PlaybackBehavior {
        latency: Duration::from_millis(args.latency_ms),
        busy_until: None,
        frames: 0,
    };

    MockHeliosServer::new(config, behavior)?.run();
    Ok(())
}
