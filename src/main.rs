use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info};

use fastps_gateway::logging::{setup_logging, shutdown_flag};
use fastps_lib::constants::{DEVICE_ADDRESS, UDP_PORT};
use fastps_lib::{DeviceSession, UdpResponder};

/// Answers UDP control datagrams for a FAST-PS power supply.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the controller's ASCII command server.
    #[arg(short, long, default_value = DEVICE_ADDRESS)]
    device: String,
    /// Receive timeout for device replies, in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Local IPv4 address and port to receive control datagrams on.
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], UDP_PORT)))]
    bind: SocketAddr,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("Gateway failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let session = DeviceSession::connect(&cli.device, Duration::from_millis(cli.timeout_ms))
        .await
        .context("Cannot open the device connection")?;
    let responder = UdpResponder::bind(cli.bind, session)
        .await
        .with_context(|| format!("Cannot bind UDP socket to {}", cli.bind))?;

    let running = shutdown_flag();
    responder.run(running).await.context("UDP responder stopped")?;
    info!("Gateway finished");
    Ok(())
}
