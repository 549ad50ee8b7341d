use crate::constants::{CONTROL_MAGIC, CONTROL_SIZE, MICRO, RESPONSE_SIZE};
use crate::error::{GatewayError, Result};
use std::fmt;
use zerocopy::byteorder::little_endian::{I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Volts or amps to integer micro-units, rounded to nearest.
pub fn to_micro(value: f64) -> i64 {
    (value * MICRO).round() as i64
}

pub fn from_micro(value: i64) -> f64 {
    value as f64 / MICRO
}

/// Wire layout of a control datagram (24 bytes, little-endian).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ControlDatagramRaw {
    pub magic: U32,
    pub set: U32,
    pub current_setpoint_ua: I64,
    pub voltage_setpoint_uv: I64,
}

/// Inbound request carrying optional new setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlDatagram {
    pub magic: u32,
    /// Setpoints are applied only when non-zero.
    pub set: u32,
    pub current_setpoint_ua: i64,
    pub voltage_setpoint_uv: i64,
}

impl ControlDatagram {
    /// A request with setpoints given in amperes and volts.
    pub fn new(set: bool, current_a: f64, voltage_v: f64) -> Self {
        Self {
            magic: CONTROL_MAGIC,
            set: set as u32,
            current_setpoint_ua: to_micro(current_a),
            voltage_setpoint_uv: to_micro(voltage_v),
        }
    }

    /// A request that only asks for the current values.
    pub fn query() -> Self {
        Self::new(false, 0.0, 0.0)
    }

    pub fn applies_setpoints(&self) -> bool {
        self.set != 0
    }

    /// Decode a received datagram. Anything but exactly 24 bytes is a
    /// `MalformedPacket`; a foreign signature word is `BadMagic`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw = ControlDatagramRaw::ref_from_bytes(bytes).map_err(|_| GatewayError::MalformedPacket {
            expected: CONTROL_SIZE,
            actual: bytes.len(),
        })?;
        let datagram = Self::from(*raw);
        if datagram.magic != CONTROL_MAGIC {
            return Err(GatewayError::BadMagic(datagram.magic));
        }
        Ok(datagram)
    }

    pub fn to_bytes(&self) -> [u8; CONTROL_SIZE] {
        let mut out = [0u8; CONTROL_SIZE];
        out.copy_from_slice(ControlDatagramRaw::from(*self).as_bytes());
        out
    }
}

impl From<ControlDatagramRaw> for ControlDatagram {
    fn from(raw: ControlDatagramRaw) -> Self {
        Self {
            magic: raw.magic.get(),
            set: raw.set.get(),
            current_setpoint_ua: raw.current_setpoint_ua.get(),
            voltage_setpoint_uv: raw.voltage_setpoint_uv.get(),
        }
    }
}

impl From<ControlDatagram> for ControlDatagramRaw {
    fn from(datagram: ControlDatagram) -> Self {
        Self {
            magic: U32::new(datagram.magic),
            set: U32::new(datagram.set),
            current_setpoint_ua: I64::new(datagram.current_setpoint_ua),
            voltage_setpoint_uv: I64::new(datagram.voltage_setpoint_uv),
        }
    }
}

/// Wire layout of a response payload (36 bytes, little-endian).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ResponseDatagramRaw {
    pub status: U32,
    pub current_setpoint_ua: I64,
    pub voltage_setpoint_uv: I64,
    pub current_value_ua: I64,
    pub voltage_value_uv: I64,
}

/// Outbound payload: status word, setpoints and readbacks in micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseDatagram {
    pub status: u32,
    pub current_setpoint_ua: i64,
    pub voltage_setpoint_uv: i64,
    pub current_value_ua: i64,
    pub voltage_value_uv: i64,
}

impl ResponseDatagram {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw = ResponseDatagramRaw::ref_from_bytes(bytes).map_err(|_| GatewayError::MalformedPacket {
            expected: RESPONSE_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from(*raw))
    }

    pub fn to_bytes(&self) -> [u8; RESPONSE_SIZE] {
        let mut out = [0u8; RESPONSE_SIZE];
        out.copy_from_slice(ResponseDatagramRaw::from(*self).as_bytes());
        out
    }
}

impl From<ResponseDatagramRaw> for ResponseDatagram {
    fn from(raw: ResponseDatagramRaw) -> Self {
        Self {
            status: raw.status.get(),
            current_setpoint_ua: raw.current_setpoint_ua.get(),
            voltage_setpoint_uv: raw.voltage_setpoint_uv.get(),
            current_value_ua: raw.current_value_ua.get(),
            voltage_value_uv: raw.voltage_value_uv.get(),
        }
    }
}

impl From<ResponseDatagram> for ResponseDatagramRaw {
    fn from(datagram: ResponseDatagram) -> Self {
        Self {
            status: U32::new(datagram.status),
            current_setpoint_ua: I64::new(datagram.current_setpoint_ua),
            voltage_setpoint_uv: I64::new(datagram.voltage_setpoint_uv),
            current_value_ua: I64::new(datagram.current_value_ua),
            voltage_value_uv: I64::new(datagram.voltage_value_uv),
        }
    }
}

impl fmt::Display for ResponseDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status: {:#010x}, I set: {:.6} A, V set: {:.6} V, I: {:.6} A, V: {:.6} V",
            self.status,
            from_micro(self.current_setpoint_ua),
            from_micro(self.voltage_setpoint_uv),
            from_micro(self.current_value_ua),
            from_micro(self.voltage_value_uv)
        )
    }
}
