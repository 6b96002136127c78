//! Discovery example.
//!
//! Opens every reachable Helios DAC and prints what each one reports.
//!
//! Run with: `cargo run --example scan -- [--usb|--network] [--rename NAME]`

use clap::Parser;
use helios_dac::{DeviceRegistry, LogLevel, Result, TransportConfig, TransportFilter};

#[derive(Parser)]
#[command(about = "List connected Helios DACs")]
struct Args {
    /// Only look for USB devices
    #[arg(long, conflicts_with = "network")]
    usb: bool,

    /// Only look for network devices
    #[arg(long)]
    network: bool,

    /// Rename the first device found
    #[arg(long)]
    rename: Option<String>,

    /// libusb diagnostics level (0 = none .. 4 = debug)
    #[arg(long, default_value_t = 0)]
    usb_log_level: i32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let filter = if args.usb {
        TransportFilter::Usb
    } else if args.network {
        TransportFilter::Network
    } else {
        TransportFilter::Both
    };
    let log_level = LogLevel::from_level(args.usb_log_level).unwrap_or_default();

    println!("Scanning for DACs...\n");
    let mut registry = DeviceRegistry::new(TransportConfig::default().with_log_level(log_level));
    let count = registry.open(filter)?;

    if count == 0 {
        println!("No DACs found.");
        return Ok(());
    }

    for (index, session) in registry.iter().enumerate() {
        let identity = session.identity();
        println!(
            "  [{}] {} ({}, firmware {}, high resolution: {})",
            index,
            identity.name,
            identity.endpoint,
            identity.firmware_version,
            if identity.supports_higher_resolutions() {
                "yes"
            } else {
                "no"
            }
        );
    }

    if let Some(name) = args.rename {
        registry.set_name(0, &name)?;
        println!("\nRenamed device 0 to '{}'", registry.name(0)?);
    }

    Ok(())
}
