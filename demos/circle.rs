//! Streaming example.
//!
//! Draws a circle on every connected DAC, writing a new frame whenever a
//! device reports ready.
//!
//! Run with: `cargo run --example circle -- [--points N] [--pps N] [--high-res]`

use std::f32::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use helios_dac::{
    DeviceRegistry, DeviceStatus, Point, PointHighRes, Result, TransportConfig, WriteFrameFlags,
};

#[derive(Parser)]
#[command(about = "Stream a circle to connected Helios DACs")]
struct Args {
    /// Points per frame
    #[arg(short, long, default_value_t = 600)]
    points: usize,

    /// Output rate in points per second
    #[arg(long, default_value_t = 30_000)]
    pps: u32,

    /// Seconds to run for
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Use 16-bit points on devices that accept them
    #[arg(long)]
    high_res: bool,
}

/// Unit circle sample `i` of `n`, in 0.0..=1.0 on both axes.
fn circle_at(i: usize, n: usize) -> (f32, f32) {
    let angle = 2.0 * PI * i as f32 / n as f32;
    (0.5 + 0.4 * angle.cos(), 0.5 + 0.4 * angle.sin())
}

fn standard_circle(n: usize, hue: u8) -> Vec<Point> {
    (0..n)
        .map(|i| {
            let (x, y) = circle_at(i, n);
            Point::new(
                (x * 4095.0) as u16,
                (y * 4095.0) as u16,
                hue,
                255 - hue,
                255,
                255,
            )
        })
        .collect()
}

fn high_res_circle(n: usize, hue: u8) -> Vec<PointHighRes> {
    (0..n)
        .map(|i| {
            let (x, y) = circle_at(i, n);
            let r = u16::from(hue) << 8;
            PointHighRes::new(
                (x * 65535.0) as u16,
                (y * 65535.0) as u16,
                r,
                0xFFFF - r,
                0xFFFF,
            )
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut registry = DeviceRegistry::new(TransportConfig::default());
    if registry.open_all()? == 0 {
        println!("No DACs found.");
        return Ok(());
    }
    for session in registry.iter() {
        println!("  Streaming to {} ({})", session.name(), session.endpoint());
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut frames = 0u64;
    while Instant::now() < deadline {
        let hue = (frames % 256) as u8;
        for session in registry.sessions_mut() {
            match session.status() {
                Ok(DeviceStatus::Ready) => {}
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("{}: {}", session.endpoint(), e);
                    continue;
                }
            }
            let result = if args.high_res && session.supports_higher_resolutions() {
                session.write_frame_high_resolution(
                    args.pps,
                    WriteFrameFlags::empty(),
                    &high_res_circle(args.points, hue),
                )
            } else {
                session.write_frame(
                    args.pps,
                    WriteFrameFlags::empty(),
                    &standard_circle(args.points, hue),
                )
            };
            match result {
                Ok(_) => {}
                Err(e) if e.is_retryable() => {}
                Err(e) => eprintln!("{}: {}", session.endpoint(), e),
            }
        }
        frames += 1;
        thread::sleep(Duration::from_millis(1));
    }

    for session in registry.sessions_mut() {
        if let Err(e) = session.stop() {
            eprintln!("{}: stop failed: {}", session.endpoint(), e);
        }
    }
    println!("\nDone after {} iterations", frames);
    Ok(())
}
