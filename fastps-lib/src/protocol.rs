//! # FAST-PS ASCII Command Protocol
//!
//! The controller exposes a line-oriented ASCII protocol on a loopback TCP port.
//! Every command is a verb, optionally followed by `:`-separated arguments, and
//! terminated with CRLF. Every reply starts with `#`:
//!
//! - `#<VERB>:<data>` answers a query (`#MRV:12.000143`, `#MRG:30:0.25`).
//! - `#AK` acknowledges a write.
//! - `#NAK:<code>` rejects a command (`#NAK:13` is sent for setpoint queries while
//!   the output is off).
//!
//! ### Core Types
//!
//! - **`Command`**: one entry of the verb table, rendered with `Display` into the
//!   exact command line sent on the wire (without the CRLF).
//! - **`RawResponse`**: a received reply with prefix-validated accessors. Parsing
//!   never panics; a reply that does not carry the expected marker is reported as
//!   `GatewayError::ProtocolMismatch`.

use crate::error::{GatewayError, Result};
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;

/// Marker of a positive acknowledgement.
pub const ACK: &str = "#AK";

/// Marker of a negative acknowledgement, followed by the error code.
pub const NAK: &str = "#NAK:";

/// Source of the output setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default)]
pub enum UpdateMode {
    /// Setpoints are taken from the command interface.
    #[default]
    #[strum(to_string = "NORMAL")]
    Normal,
    /// Setpoints are taken from the SFP fast link.
    #[strum(to_string = "SFP")]
    Sfp,
}

impl FromStr for UpdateMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "NORMAL" => Ok(UpdateMode::Normal),
            "SFP" => Ok(UpdateMode::Sfp),
            other => Err(GatewayError::ProtocolMismatch {
                expected: "SFP or NORMAL".to_string(),
                response: other.to_string(),
            }),
        }
    }
}

/// The device command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `MST`, answered with the status word in hex.
    Status,
    /// `MRI`, current readback in amperes.
    ReadCurrent,
    /// `MRV`, voltage readback in volts.
    ReadVoltage,
    /// `MWI:?`
    QueryCurrentSetpoint,
    /// `MWV:?`
    QueryVoltageSetpoint,
    /// `MWI:<amperes>`
    SetCurrentSetpoint(f64),
    /// `MWV:<volts>`
    SetVoltageSetpoint(f64),
    /// `MRG:<n>`
    ReadRegister(u16),
    /// `MWG:<n>:<value>`
    WriteRegister(u16, f64),
    /// `MON`
    OutputOn,
    /// `MOFF`
    OutputOff,
    /// `MRESET`, clears the status register.
    ResetStatus,
    /// `UPMODE`
    QueryUpdateMode,
    /// `UPMODE:SFP` / `UPMODE:NORMAL`
    SetUpdateMode(UpdateMode),
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Status => "MST",
            Command::ReadCurrent => "MRI",
            Command::ReadVoltage => "MRV",
            Command::QueryCurrentSetpoint | Command::SetCurrentSetpoint(_) => "MWI",
            Command::QueryVoltageSetpoint | Command::SetVoltageSetpoint(_) => "MWV",
            Command::ReadRegister(_) => "MRG",
            Command::WriteRegister(..) => "MWG",
            Command::OutputOn => "MON",
            Command::OutputOff => "MOFF",
            Command::ResetStatus => "MRESET",
            Command::QueryUpdateMode | Command::SetUpdateMode(_) => "UPMODE",
        }
    }

    /// The marker a data reply to this command starts with, e.g. `#MRV:`.
    pub fn reply_prefix(&self) -> String {
        format!("#{}:", self.verb())
    }

    /// Whether the device answers this command with `#AK`/`#NAK` rather than data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::SetCurrentSetpoint(_)
                | Command::SetVoltageSetpoint(_)
                | Command::WriteRegister(..)
                | Command::OutputOn
                | Command::OutputOff
                | Command::ResetStatus
                | Command::SetUpdateMode(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match self {
            Command::QueryCurrentSetpoint | Command::QueryVoltageSetpoint => write!(f, "{verb}:?"),
            // setpoints use six decimals, registers keep full double precision
            Command::SetCurrentSetpoint(value) | Command::SetVoltageSetpoint(value) => {
                write!(f, "{verb}:{value:.6}")
            }
            Command::ReadRegister(number) => write!(f, "{verb}:{number}"),
            Command::WriteRegister(number, value) => write!(f, "{verb}:{number}:{value}"),
            Command::SetUpdateMode(mode) => write!(f, "{verb}:{mode}"),
            _ => f.write_str(verb),
        }
    }
}

/// A single reply received from the device, with line terminators stripped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    text: String,
}

impl RawResponse {
    pub fn new(text: impl Into<String>) -> Self {
        let text: String = text.into();
        let trimmed = text.trim_end_matches(['\r', '\n', '\0', ' ']);
        Self {
            text: trimmed.to_string(),
        }
    }

    /// Build a reply from received bytes. The reply ends at the first NUL, if any.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Self::new(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_ack(&self) -> bool {
        self.text.starts_with(ACK)
    }

    /// The error code of a `#NAK:<code>` reply.
    pub fn nak_code(&self) -> Option<&str> {
        self.text.strip_prefix(NAK).map(str::trim)
    }

    /// The data following `prefix`, or `ProtocolMismatch` if the reply carries
    /// any other marker (including `#NAK:`).
    pub fn payload(&self, prefix: &str) -> Result<&str> {
        self.text
            .strip_prefix(prefix)
            .ok_or_else(|| GatewayError::ProtocolMismatch {
                expected: prefix.to_string(),
                response: self.text.clone(),
            })
    }

    /// Validate `prefix` and parse the first whitespace-delimited token after it.
    pub fn parse_prefixed<T: FromStr>(&self, prefix: &str) -> Result<T> {
        let payload = self.payload(prefix)?;
        first_token(payload)
            .and_then(|token| token.parse::<T>().ok())
            .ok_or_else(|| self.mismatch(prefix))
    }

    /// Validate `prefix` and parse a hexadecimal word after it.
    pub fn parse_hex_prefixed(&self, prefix: &str) -> Result<u32> {
        let payload = self.payload(prefix)?;
        first_token(payload)
            .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
            .and_then(|token| u32::from_str_radix(token, 16).ok())
            .ok_or_else(|| self.mismatch(prefix))
    }

    /// Parse a `#MRG:<n>:<value>` reply, checking the echoed register number.
    pub fn parse_register(&self, number: u16) -> Result<f64> {
        let prefix = Command::ReadRegister(number).reply_prefix();
        let payload = self.payload(&prefix)?;
        let (echo, value) = payload.split_once(':').ok_or_else(|| self.mismatch(&prefix))?;
        if echo.trim().parse::<u16>().ok() != Some(number) {
            return Err(GatewayError::ProtocolMismatch {
                expected: format!("{prefix}{number}:"),
                response: self.text.clone(),
            });
        }
        first_token(value)
            .and_then(|token| token.parse::<f64>().ok())
            .ok_or_else(|| self.mismatch(&prefix))
    }

    /// Strict acknowledgement check for setpoint and output commands.
    pub fn acknowledge(&self, command: &Command) -> Result<()> {
        if self.is_ack() {
            return Ok(());
        }
        match self.nak_code() {
            Some(code) => Err(GatewayError::Rejected {
                command: command.to_string(),
                code: code.to_string(),
            }),
            None => Err(self.mismatch(ACK)),
        }
    }

    /// Acknowledgement classification for register writes: a short, empty,
    /// garbled or negative reply is a `BadWrite`, anything else is accepted.
    pub fn classify_write(&self, command: &Command) -> Result<()> {
        let garbled = self.text.len() < 3 || !self.text.starts_with('#');
        if garbled || self.nak_code().is_some() {
            return Err(GatewayError::BadWrite {
                command: command.to_string(),
                response: self.text.clone(),
            });
        }
        Ok(())
    }

    fn mismatch(&self, expected: &str) -> GatewayError {
        GatewayError::ProtocolMismatch {
            expected: expected.to_string(),
            response: self.text.clone(),
        }
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn first_token(payload: &str) -> Option<&str> {
    payload.split_whitespace().next()
}
