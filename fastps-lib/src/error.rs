use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The primary error type for the `fastps-lib` library.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to connect to the device at {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Torn write for {command:?}: transport accepted {written} of {expected} bytes")]
    ShortWrite {
        command: String,
        written: usize,
        expected: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No response from the device to {command:?}")]
    CommunicationTimeout { command: String },

    #[error("Protocol mismatch: expected {expected:?}, got {response:?}")]
    ProtocolMismatch { expected: String, response: String },

    #[error("Device rejected {command:?} with NAK code {code}")]
    Rejected { command: String, code: String },

    #[error("Bad write: {command:?} answered with {response:?}")]
    BadWrite { command: String, response: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Variable {0} is not writable")]
    NotWritable(String),

    #[error("Variable {0} is not readable")]
    NotReadable(String),

    #[error("Unknown variable {0}")]
    UnknownVariable(String),

    #[error("Unknown register {0}")]
    UnknownRegister(u16),

    #[error("Too many registers: {count} configured, capacity is {capacity}")]
    ConfigurationOverflow { count: usize, capacity: usize },

    #[error("Register number {0} is configured more than once")]
    DuplicateRegister(u16),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed packet: expected {expected} bytes, got {actual}")]
    MalformedPacket { expected: usize, actual: usize },

    #[error("Bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("Checksum error: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumError { expected: u16, actual: u16 },
}

impl GatewayError {
    /// Errors that leave the owned device socket in an unknown state, or that
    /// make startup impossible. Everything else is scoped to a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectFailed { .. }
                | GatewayError::ShortWrite { .. }
                | GatewayError::Io(_)
                | GatewayError::ConfigurationOverflow { .. }
                | GatewayError::DuplicateRegister(_)
                | GatewayError::Config(_)
        )
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
