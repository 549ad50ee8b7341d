//! Callback bodies for the external variable-access server.
//!
//! The server owns the address space, sessions and its wire protocol. This module
//! only provides the table of named variables, resolved once at startup, and the
//! `read`/`write` bodies that turn each access into exactly one device exchange.
//!
//! Variables are addressed by their path, `<folder>/<name>`:
//!
//! ```text
//! Device/Name               string   read-only   from configuration
//! Device/Status             uint32   read-only   MST
//! Device/OutputOn           boolean  read-write  MST bit 0 / MON, MOFF
//! Device/MReset             boolean  read-write  always false / MRESET
//! Device/SfpMode            boolean  read-write  UPMODE
//! SetPoint/Voltage          double   read-only   MRV
//! SetPoint/Current          double   read-only   MRI
//! SetPoint/VoltageSetpoint  double   read-write  MWV
//! SetPoint/CurrentSetpoint  double   read-write  MWI
//! Registers/<name>          double   read-write  MRG / MWG
//! ```

use crate::device::DeviceSession;
use crate::error::{GatewayError, Result};
use crate::protocol::UpdateMode;
use crate::registers::{RegisterKey, RegisterTable};
use std::collections::HashMap;
use strum_macros::Display;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// A value exchanged with the variable-access server.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Empty,
    Boolean(bool),
    UInt32(u32),
    Double(f64),
    String(String),
    Array(Vec<Variant>),
}

impl Variant {
    /// Scalar type of the value, `None` for empty and array values.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Variant::Boolean(_) => Some(DataType::Boolean),
            Variant::UInt32(_) => Some(DataType::UInt32),
            Variant::Double(_) => Some(DataType::Double),
            Variant::String(_) => Some(DataType::String),
            Variant::Empty | Variant::Array(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DataType {
    String,
    UInt32,
    Boolean,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn can_read(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Folder {
    Device,
    SetPoint,
    Registers,
}

/// What a variable is bound to on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    DeviceName,
    DeviceStatus,
    OutputOn,
    Reset,
    SfpMode,
    Voltage,
    Current,
    VoltageSetpoint,
    CurrentSetpoint,
    Register(RegisterKey),
}

impl Quantity {
    pub fn data_type(&self) -> DataType {
        match self {
            Quantity::DeviceName => DataType::String,
            Quantity::DeviceStatus => DataType::UInt32,
            Quantity::OutputOn | Quantity::Reset | Quantity::SfpMode => DataType::Boolean,
            Quantity::Voltage
            | Quantity::Current
            | Quantity::VoltageSetpoint
            | Quantity::CurrentSetpoint
            | Quantity::Register(_) => DataType::Double,
        }
    }

    pub fn access(&self) -> Access {
        match self {
            Quantity::DeviceName | Quantity::DeviceStatus | Quantity::Voltage | Quantity::Current => Access::ReadOnly,
            _ => Access::ReadWrite,
        }
    }
}

/// One entry of the variable table.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub folder: Folder,
    pub name: String,
    pub description: String,
    pub quantity: Quantity,
}

impl Variable {
    fn new(folder: Folder, name: impl Into<String>, description: impl Into<String>, quantity: Quantity) -> Self {
        Self {
            folder,
            name: name.into(),
            description: description.into(),
            quantity,
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.folder, self.name)
    }

    pub fn data_type(&self) -> DataType {
        self.quantity.data_type()
    }

    pub fn access(&self) -> Access {
        self.quantity.access()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Quality {
    Good,
    Uncertain,
}

/// Result of a read: a value, or no value with `Uncertain` quality when the
/// device did not answer as expected.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub quality: Quality,
}

impl DataValue {
    pub fn good(value: Variant) -> Self {
        Self {
            value: Some(value),
            quality: Quality::Good,
        }
    }

    pub fn uncertain() -> Self {
        Self {
            value: None,
            quality: Quality::Uncertain,
        }
    }
}

/// The seam the variable-access server calls into.
pub struct VariableAdapter<T = TcpStream> {
    session: DeviceSession<T>,
    registers: RegisterTable,
    device_name: String,
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> VariableAdapter<T> {
    pub fn new(session: DeviceSession<T>, registers: RegisterTable, device_name: impl Into<String>) -> Result<Self> {
        let mut variables = vec![
            Variable::new(Folder::Device, "Name", "device name", Quantity::DeviceName),
            Variable::new(Folder::Device, "Status", "power supply internal status", Quantity::DeviceStatus),
            Variable::new(Folder::Device, "OutputOn", "on/off state of the device output", Quantity::OutputOn),
            Variable::new(Folder::Device, "MReset", "reset the module status register", Quantity::Reset),
            Variable::new(Folder::Device, "SfpMode", "setpoints taken from the SFP link", Quantity::SfpMode),
            Variable::new(Folder::SetPoint, "Voltage", "voltage readback [V]", Quantity::Voltage),
            Variable::new(Folder::SetPoint, "Current", "current readback [A]", Quantity::Current),
            Variable::new(Folder::SetPoint, "VoltageSetpoint", "voltage setpoint [V]", Quantity::VoltageSetpoint),
            Variable::new(Folder::SetPoint, "CurrentSetpoint", "current setpoint [A]", Quantity::CurrentSetpoint),
        ];
        variables.extend(registers.iter().map(|(key, entry)| {
            Variable::new(Folder::Registers, &entry.name, &entry.description, Quantity::Register(key))
        }));

        let mut index = HashMap::with_capacity(variables.len());
        for (i, variable) in variables.iter().enumerate() {
            if index.insert(variable.path(), i).is_some() {
                return Err(GatewayError::Config(format!("variable {} is declared twice", variable.path())));
            }
        }

        Ok(Self {
            session,
            registers,
            device_name: device_name.into(),
            variables,
            index,
        })
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, path: &str) -> Option<&Variable> {
        self.index.get(path).map(|&i| &self.variables[i])
    }

    pub fn registers(&self) -> &RegisterTable {
        &self.registers
    }

    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }

    fn lookup(&self, path: &str) -> Result<Quantity> {
        self.variable(path)
            .map(|v| v.quantity)
            .ok_or_else(|| GatewayError::UnknownVariable(path.to_string()))
    }

    /// Read a variable. Device failures are reported as an `Uncertain` value;
    /// only fatal transport errors are returned as `Err`.
    pub async fn read(&mut self, path: &str) -> Result<DataValue> {
        let quantity = self.lookup(path)?;
        if !quantity.access().can_read() {
            return Err(GatewayError::NotReadable(path.to_string()));
        }

        match self.read_quantity(quantity).await {
            Ok(value) => {
                debug!(variable = path, ?value, "Read");
                Ok(DataValue::good(value))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(variable = path, error = %e, "Read failed");
                Ok(DataValue::uncertain())
            }
        }
    }

    async fn read_quantity(&mut self, quantity: Quantity) -> Result<Variant> {
        let session = &mut self.session;
        let value = match quantity {
            Quantity::DeviceName => Variant::String(self.device_name.clone()),
            Quantity::DeviceStatus => Variant::UInt32(session.status().await?),
            Quantity::OutputOn => Variant::Boolean(session.output_enabled().await?),
            // momentary trigger, never a persisted flag
            Quantity::Reset => Variant::Boolean(false),
            Quantity::SfpMode => Variant::Boolean(session.update_mode().await? == UpdateMode::Sfp),
            Quantity::Voltage => Variant::Double(session.voltage().await?),
            Quantity::Current => Variant::Double(session.current().await?),
            Quantity::VoltageSetpoint => Variant::Double(session.voltage_setpoint().await?),
            Quantity::CurrentSetpoint => Variant::Double(session.current_setpoint().await?),
            Quantity::Register(key) => Variant::Double(self.registers.read_key(session, key).await?),
        };
        Ok(value)
    }

    /// Write a variable. Non-scalar or wrongly typed values are rejected with
    /// `InvalidInput` before anything is sent to the device.
    pub async fn write(&mut self, path: &str, value: Variant) -> Result<()> {
        let quantity = self.lookup(path)?;
        if !quantity.access().can_write() {
            return Err(GatewayError::NotWritable(path.to_string()));
        }

        let expected = quantity.data_type();
        match value.data_type() {
            None => {
                return Err(GatewayError::InvalidInput(format!("{path} expects a scalar {expected}")));
            }
            Some(actual) if actual != expected => {
                return Err(GatewayError::InvalidInput(format!(
                    "{path} expects {expected}, got {actual}"
                )));
            }
            Some(_) => {}
        }

        debug!(variable = path, ?value, "Write");
        let session = &mut self.session;
        match (quantity, value) {
            (Quantity::OutputOn, Variant::Boolean(on)) => session.set_output(on).await,
            (Quantity::Reset, Variant::Boolean(true)) => session.reset_status().await,
            (Quantity::Reset, Variant::Boolean(false)) => Ok(()),
            (Quantity::SfpMode, Variant::Boolean(sfp)) => {
                let mode = if sfp { UpdateMode::Sfp } else { UpdateMode::Normal };
                session.set_update_mode(mode).await
            }
            (Quantity::VoltageSetpoint, Variant::Double(volts)) => session.set_voltage_setpoint(volts).await,
            (Quantity::CurrentSetpoint, Variant::Double(amperes)) => session.set_current_setpoint(amperes).await,
            (Quantity::Register(key), Variant::Double(value)) => self.registers.write_key(session, key, value).await,
            (quantity, _) => Err(GatewayError::NotWritable(format!("{quantity:?}"))),
        }
    }
}
