//! JT/T808 terminal simulator.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracklink_cli::{init_logging, load_config, shutdown_on_ctrl_c};
use tracklink_simulator::{GeneratorConfig, TrafficGenerator};

#[derive(Parser, Debug)]
#[command(version, about = "JT/T 808-2013 GPS tracking simulator")]
struct Cli {
    /// Server IP address
    #[arg(short, long)]
    ip: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Device ID (terminal phone number)
    #[arg(short, long)]
    device: Option<String>,

    /// JSON config file (defaults to ./config.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send locations as 0x0704 batches
    #[arg(long)]
    batch: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config: GeneratorConfig = load_config(cli.config.as_deref())?;
    if let Some(ip) = cli.ip {
        config.server_ip = ip;
    }
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(device) = cli.device {
        config.device.device_id = device;
    }
    if cli.batch {
        config.batch_enabled = true;
    }

    let generator = TrafficGenerator::new(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %generator.phone(),
        batch = config.batch_enabled,
        "Starting simulator"
    );

    generator.run(shutdown_on_ctrl_c()).await?;

    let stats = generator.stats();
    info!(
        locations = stats.locations_sent(),
        batches = stats.batches_sent(),
        suppressed = stats.suppressed(),
        heartbeats = stats.heartbeats_sent(),
        reconnects = stats.reconnects(),
        "Simulator stopped"
    );
    Ok(())
}
