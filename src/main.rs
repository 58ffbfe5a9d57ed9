//! Desktop run of the bridge: serves a disk image to a simulated host and
//! logs what the host would have seen.

use std::path::PathBuf;

use acsi2sd::acsi::command;
use acsi2sd::acsi::response::{INQUIRY_LEN, MODE_PAGE_0_LEN};
use acsi2sd::sim::{NoDelay, SimInterrupts, SimWatchdog, SimulatedHost};
use acsi2sd::storage::image::ImageDevice;
use acsi2sd::{Bridge, BridgeConfig};
use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::ensure;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(about, version)]
struct Args {
    /// Raw disk image standing in for the SD card
    #[arg(long)]
    image: PathBuf,
    /// ACSI device ID to answer to
    #[arg(long, default_value_t = 0)]
    id: u8,
    /// Number of blocks to read from the start of the image
    #[arg(long, default_value_t = 1)]
    read_blocks: u8,
    /// Log every command and storage event
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    ensure!(args.id < 8, "device ID must be 0..=7, was {}", args.id);
    let image = ImageDevice::open(&args.image)?;
    info!(image = %image.path().display(), "serving image");

    let config = BridgeConfig {
        device_id: args.id,
        ..BridgeConfig::default()
    };
    let interrupts = SimInterrupts::default();
    let mut host = SimulatedHost::new(&interrupts);

    let script = [
        command::test_unit_ready(args.id),
        command::inquiry(args.id, INQUIRY_LEN as u8),
        command::request_sense(args.id, 4),
        command::mode_sense(args.id, 0),
        command::mode_sense(args.id, 4),
        command::read(args.id, 0, args.read_blocks),
    ];
    for frame in script {
        host.queue(frame, Vec::new());
    }

    let mut bridge = Bridge::new(
        host,
        interrupts,
        image,
        SimWatchdog::default(),
        NoDelay::default(),
        config,
    );
    while !bridge.bus().is_drained() {
        bridge.step();
    }

    for outcome in bridge.bus().outcomes() {
        match outcome.status {
            Some(status) => info!(
                frame = ?outcome.frame,
                status,
                bytes = outcome.data.len(),
                "command complete"
            ),
            None => warn!(frame = ?outcome.frame, "command not answered"),
        }
    }

    if let Some(inquiry) = bridge.bus().outcomes().get(1)
        && inquiry.data.len() == INQUIRY_LEN
    {
        info!(
            vendor = %String::from_utf8_lossy(&inquiry.data[8..16]),
            product = %String::from_utf8_lossy(&inquiry.data[16..32]),
            revision = %String::from_utf8_lossy(&inquiry.data[32..36]),
            "identification"
        );
    }
    if let Some(sense) = bridge.bus().outcomes().get(3)
        && sense.data.len() == MODE_PAGE_0_LEN
    {
        let blocks = u32::from_be_bytes([0, sense.data[5], sense.data[6], sense.data[7]]);
        info!(blocks, "capacity");
    }
    info!(feeds = bridge.watchdog().feeds(), "watchdog");

    Ok(())
}
