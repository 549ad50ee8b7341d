use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use fastps_gateway::logging::setup_logging;
use fastps_lib::constants::UDP_BUFFER_SIZE;
use fastps_lib::datagram::ControlDatagram;
use fastps_lib::packet::ResponseFrame;

/// Sends one control datagram to a FAST-PS gateway and prints its answer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Gateway address, e.g. 192.168.0.10:16665.
    target: SocketAddr,
    /// Apply the given setpoints before reading back.
    #[arg(short, long)]
    set: bool,
    /// Current setpoint in amperes.
    #[arg(short = 'i', long, default_value_t = 0.0, allow_negative_numbers = true)]
    current: f64,
    /// Voltage setpoint in volts.
    #[arg(short = 'u', long, default_value_t = 0.0, allow_negative_numbers = true)]
    voltage: f64,
    /// How long to wait for the response, in milliseconds.
    #[arg(short, long, default_value_t = 2000)]
    wait_ms: u64,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(None, &cli.verbose)?;

    let local: SocketAddr = match cli.target {
        SocketAddr::V4(_) => "0.0.0.0:0".parse()?,
        SocketAddr::V6(_) => "[::]:0".parse()?,
    };
    let socket = UdpSocket::bind(local).await?;

    let request = ControlDatagram::new(cli.set, cli.current, cli.voltage);
    let bytes = request.to_bytes();
    debug!(bytes = hex::encode(bytes), "UDP write");
    socket.send_to(&bytes, cli.target).await?;

    let mut buffer = [0u8; UDP_BUFFER_SIZE];
    let (len, peer) = timeout(Duration::from_millis(cli.wait_ms), socket.recv_from(&mut buffer))
        .await
        .with_context(|| format!("No response from {} within {} ms", cli.target, cli.wait_ms))??;
    debug!(%peer, bytes = hex::encode(&buffer[..len]), "UDP read");

    let frame = ResponseFrame::parse(&buffer[..len]).context("Malformed response")?;
    println!(
        "Packet {} from {}:{}",
        frame.ip.identification.get(),
        frame.ip.source(),
        frame.udp.source_port.get()
    );
    println!("{}", frame.payload);
    Ok(())
}
