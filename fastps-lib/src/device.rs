use crate::constants::{DEVICE_BUFFER_SIZE, DEVICE_TIMEOUT};
use crate::error::{GatewayError, Result};
use crate::protocol::{ACK, Command, RawResponse, UpdateMode};
use futures_lite::future::poll_once;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// The one connection to the power-supply controller.
///
/// The session owns the transport together with its command and response
/// buffers. `execute` takes `&mut self`, so at most one command is outstanding
/// at any time.
///
/// A reply that misses its timeout may still arrive later. It is discarded
/// before the next command is written, so it is never taken as the answer to
/// a different command.
pub struct DeviceSession<T = TcpStream> {
    transport: T,
    timeout: Duration,
    /// The last exchange timed out and its reply may still be in flight.
    late_reply: bool,
    command: String,
    response: [u8; DEVICE_BUFFER_SIZE],
}

impl DeviceSession<TcpStream> {
    /// Connect to the controller's command server.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        info!(%address, "Connecting to device command server...");
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| GatewayError::ConnectFailed {
                address: address.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        info!("Connected to device command server.");
        Ok(Self::new(stream, timeout))
    }

    /// Connect with the default 1 s receive timeout.
    pub async fn connect_default(address: &str) -> Result<Self> {
        Self::connect(address, DEVICE_TIMEOUT).await
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> DeviceSession<T> {
    /// Wrap an already connected transport.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            late_reply: false,
            command: String::with_capacity(DEVICE_BUFFER_SIZE),
            response: [0; DEVICE_BUFFER_SIZE],
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send one command line and wait for one reply.
    ///
    /// The command is written with a single send. A transport that accepts fewer
    /// bytes than the command length leaves the exchange torn, which is reported
    /// as the fatal `ShortWrite`. Exactly one receive follows; nothing arriving
    /// within the timeout, or an empty read, is a `CommunicationTimeout`.
    pub async fn execute(&mut self, command: &str) -> Result<RawResponse> {
        self.command.clear();
        self.command.push_str(command);
        self.command.push_str("\r\n");

        self.discard_stale().await?;

        debug!(command, "Device write");
        let written = self.transport.write(self.command.as_bytes()).await?;
        if written != self.command.len() {
            error!(
                command,
                written,
                expected = self.command.len(),
                "Mismatch in number of sent bytes"
            );
            return Err(GatewayError::ShortWrite {
                command: command.to_string(),
                written,
                expected: self.command.len(),
            });
        }
        self.transport.flush().await?;

        let received = match timeout(self.timeout, self.transport.read(&mut self.response)).await {
            Ok(Ok(0)) => {
                warn!(command, "Device closed the connection");
                return Err(GatewayError::CommunicationTimeout {
                    command: command.to_string(),
                });
            }
            Err(_) => {
                warn!(command, timeout = ?self.timeout, "No response from device");
                self.late_reply = true;
                return Err(GatewayError::CommunicationTimeout {
                    command: command.to_string(),
                });
            }
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                warn!(command, "Device receive timed out");
                self.late_reply = true;
                return Err(GatewayError::CommunicationTimeout {
                    command: command.to_string(),
                });
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(n)) => n,
        };

        let response = RawResponse::from_bytes(&self.response[..received]);
        debug!(
            response = response.as_str(),
            bytes = hex::encode(&self.response[..received]),
            "Device read"
        );
        if received < 3 {
            warn!(command, received, "Less than 3 characters received as device response");
        }
        Ok(response)
    }

    /// Drop whatever the device sent outside of an exchange. After a timeout
    /// the late reply is awaited for up to one more timeout; anything else
    /// already buffered is read without waiting.
    async fn discard_stale(&mut self) -> Result<()> {
        if std::mem::take(&mut self.late_reply) {
            match timeout(self.timeout, self.transport.read(&mut self.response)).await {
                Ok(Ok(n)) if n > 0 => self.log_discarded(n),
                Ok(Err(e)) if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(e.into());
                }
                _ => debug!("Late device reply never arrived"),
            }
        }

        while let Some(read) = poll_once(self.transport.read(&mut self.response)).await {
            match read {
                Ok(0) => break,
                Ok(n) => self.log_discarded(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn log_discarded(&self, n: usize) {
        warn!(
            bytes = hex::encode(&self.response[..n]),
            "Discarding stale device reply"
        );
    }

    /// Send a command from the verb table.
    pub async fn request(&mut self, command: &Command) -> Result<RawResponse> {
        let line = command.to_string();
        self.execute(&line).await
    }

    async fn query_f64(&mut self, command: Command) -> Result<f64> {
        let response = self.request(&command).await?;
        response.parse_prefixed(&command.reply_prefix())
    }

    async fn write_acknowledged(&mut self, command: Command) -> Result<()> {
        let response = self.request(&command).await?;
        response.acknowledge(&command)
    }

    /// Read the status word (`MST`).
    pub async fn status(&mut self) -> Result<u32> {
        let command = Command::Status;
        let response = self.request(&command).await?;
        response.parse_hex_prefixed(&command.reply_prefix())
    }

    /// Output state, taken from bit 0 of the status word.
    pub async fn output_enabled(&mut self) -> Result<bool> {
        Ok(self.status().await? & 1 == 1)
    }

    /// Current readback in amperes.
    pub async fn current(&mut self) -> Result<f64> {
        self.query_f64(Command::ReadCurrent).await
    }

    /// Voltage readback in volts.
    pub async fn voltage(&mut self) -> Result<f64> {
        self.query_f64(Command::ReadVoltage).await
    }

    /// Active current setpoint in amperes. The device answers `#NAK:13` while
    /// the output is off.
    pub async fn current_setpoint(&mut self) -> Result<f64> {
        self.query_f64(Command::QueryCurrentSetpoint).await
    }

    /// Active voltage setpoint in volts.
    pub async fn voltage_setpoint(&mut self) -> Result<f64> {
        self.query_f64(Command::QueryVoltageSetpoint).await
    }

    pub async fn set_current_setpoint(&mut self, amperes: f64) -> Result<()> {
        self.write_acknowledged(Command::SetCurrentSetpoint(amperes)).await
    }

    pub async fn set_voltage_setpoint(&mut self, volts: f64) -> Result<()> {
        self.write_acknowledged(Command::SetVoltageSetpoint(volts)).await
    }

    /// Switch the output on (`MON`) or off (`MOFF`).
    pub async fn set_output(&mut self, on: bool) -> Result<()> {
        let command = if on { Command::OutputOn } else { Command::OutputOff };
        info!("{}", command);
        self.write_acknowledged(command).await
    }

    /// Clear the status register. Fire-and-forget: the reply is only scanned
    /// for an acknowledgement and logged otherwise.
    pub async fn reset_status(&mut self) -> Result<()> {
        info!("MRESET");
        let response = self.request(&Command::ResetStatus).await?;
        if !response.is_ack() {
            warn!(response = response.as_str(), "MRESET not acknowledged with {}", ACK);
        }
        Ok(())
    }

    /// Query the setpoint source (`UPMODE`).
    pub async fn update_mode(&mut self) -> Result<UpdateMode> {
        let command = Command::QueryUpdateMode;
        let response = self.request(&command).await?;
        response.payload(&command.reply_prefix())?.parse()
    }

    pub async fn set_update_mode(&mut self, mode: UpdateMode) -> Result<()> {
        self.write_acknowledged(Command::SetUpdateMode(mode)).await
    }

    /// Generic register read (`MRG:<n>`).
    pub async fn read_register(&mut self, number: u16) -> Result<f64> {
        let response = self.request(&Command::ReadRegister(number)).await?;
        response.parse_register(number)
    }

    /// Generic register write (`MWG:<n>:<value>`).
    pub async fn write_register(&mut self, number: u16, value: f64) -> Result<()> {
        let command = Command::WriteRegister(number, value);
        info!("{}", command);
        let response = self.request(&command).await?;
        response.classify_write(&command)
    }
}
