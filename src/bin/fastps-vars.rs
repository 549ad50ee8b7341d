use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::error;

use fastps_gateway::logging::setup_logging;
use fastps_lib::config::GatewayConfig;
use fastps_lib::variables::{DataType, DataValue, Variant};
use fastps_lib::{DeviceSession, VariableAdapter};

/// Reads and writes the variables a FAST-PS power supply exposes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Gateway configuration file.
    #[arg(short, long, default_value = "/etc/fastps.toml")]
    config: PathBuf,
    /// Override the device address from the configuration file.
    #[arg(short, long)]
    device: Option<String>,
    /// Receive timeout for device replies, in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List every variable with its type and access rights.
    List,
    /// Read one or more variables, e.g. `Device/Status`.
    Get { paths: Vec<String> },
    /// Write a variable, e.g. `SetPoint/VoltageSetpoint 5.0`.
    Set { path: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("{:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = GatewayConfig::from_file(&cli.config)?;
    let registers = config.register_table()?;
    let address = cli.device.unwrap_or(config.device.address);

    let session = DeviceSession::connect(&address, Duration::from_millis(cli.timeout_ms))
        .await
        .context("Cannot open the device connection")?;
    let mut adapter = VariableAdapter::new(session, registers, config.device.name)?;

    match cli.command {
        Action::List => {
            for variable in adapter.variables() {
                println!(
                    "{:<28} {:<8} {:<10} {}",
                    variable.path(),
                    variable.data_type(),
                    variable.access(),
                    variable.description
                );
            }
        }
        Action::Get { paths } => {
            for path in paths {
                let value = adapter.read(&path).await?;
                println!("{path} = {}", format_value(&value));
            }
        }
        Action::Set { path, value } => {
            let data_type = adapter
                .variable(&path)
                .map(|v| v.data_type())
                .with_context(|| format!("Unknown variable {path}"))?;
            let value = parse_value(data_type, &value)?;
            adapter.write(&path, value).await?;
            println!("{path} written");
        }
    }
    Ok(())
}

fn parse_value(data_type: DataType, text: &str) -> Result<Variant> {
    let value = match data_type {
        DataType::Boolean => match text.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Variant::Boolean(true),
            "0" | "false" | "off" => Variant::Boolean(false),
            _ => bail!("{text:?} is not a boolean"),
        },
        DataType::UInt32 => Variant::UInt32(text.parse().with_context(|| format!("{text:?} is not a uint32"))?),
        DataType::Double => Variant::Double(text.parse().with_context(|| format!("{text:?} is not a double"))?),
        DataType::String => Variant::String(text.to_string()),
    };
    Ok(value)
}

fn format_value(value: &DataValue) -> String {
    match &value.value {
        Some(Variant::UInt32(word)) => format!("{word:#010x}"),
        Some(Variant::Double(number)) => format!("{number:.6}"),
        Some(Variant::Boolean(flag)) => flag.to_string(),
        Some(Variant::String(text)) => text.clone(),
        Some(other) => format!("{other:?}"),
        None => format!("<{}>", value.quality),
    }
}
