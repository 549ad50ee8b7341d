use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::net::TcpListener;
use tracing::info;

use fastps_gateway::logging::setup_logging;
use fastps_lib::config::GatewayConfig;
use fastps_lib::constants::DEVICE_ADDRESS;
use fastps_lib::simulator::{SimulatedDevice, Simulator};

/// Serves a simulated FAST-PS controller on the ASCII command port.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to accept command connections on.
    #[arg(short, long, default_value = DEVICE_ADDRESS)]
    listen: String,
    /// Gateway configuration file whose registers the simulator should know.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Start with the output switched on.
    #[arg(long)]
    output_on: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let mut simulator = Simulator::new().with_output(cli.output_on);
    if let Some(path) = &cli.config {
        let config = GatewayConfig::from_file(path)?;
        simulator = simulator.with_registers(config.registers.iter().map(|r| r.number));
    }

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("Cannot listen on {}", cli.listen))?;
    let device = SimulatedDevice::serve(listener, simulator)?;

    tokio::signal::ctrl_c().await?;
    info!(commands = device.commands().len(), "Simulated device stopped");
    Ok(())
}
