//! Configuration-driven scalar registers, accessed with `MRG`/`MWG`.

use crate::constants::MAX_REGISTERS;
use crate::device::DeviceSession;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// One register declared in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegisterEntry {
    pub number: u16,
    pub name: String,
    pub description: String,
}

impl RegisterEntry {
    pub fn new(number: u16, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Index of an entry in a `RegisterTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterKey(usize);

/// The immutable set of registers exposed by the gateway.
#[derive(Debug, Clone, Default)]
pub struct RegisterTable {
    entries: Vec<RegisterEntry>,
}

impl RegisterTable {
    pub const CAPACITY: usize = MAX_REGISTERS;

    /// Populate the table. Exceeding the capacity or repeating a register
    /// number is a startup error.
    pub fn load(entries: impl IntoIterator<Item = RegisterEntry>) -> Result<Self> {
        let entries: Vec<RegisterEntry> = entries.into_iter().collect();
        if entries.len() > Self::CAPACITY {
            return Err(GatewayError::ConfigurationOverflow {
                count: entries.len(),
                capacity: Self::CAPACITY,
            });
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.number) {
                return Err(GatewayError::DuplicateRegister(entry.number));
            }
            info!(
                number = entry.number,
                name = %entry.name,
                description = %entry.description,
                "Register"
            );
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterKey, &RegisterEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (RegisterKey(i), e))
    }

    pub fn key(&self, number: u16) -> Option<RegisterKey> {
        self.entries.iter().position(|e| e.number == number).map(RegisterKey)
    }

    pub fn entry(&self, key: RegisterKey) -> Option<&RegisterEntry> {
        self.entries.get(key.0)
    }

    fn number(&self, key: RegisterKey) -> Result<u16> {
        self.entry(key)
            .map(|e| e.number)
            .ok_or(GatewayError::UnknownRegister(key.0 as u16))
    }

    fn resolve(&self, number: u16) -> Result<RegisterKey> {
        self.key(number).ok_or(GatewayError::UnknownRegister(number))
    }

    /// Read a configured register by number.
    pub async fn read<T>(&self, session: &mut DeviceSession<T>, number: u16) -> Result<f64>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let key = self.resolve(number)?;
        self.read_key(session, key).await
    }

    /// Write a configured register by number.
    pub async fn write<T>(&self, session: &mut DeviceSession<T>, number: u16, value: f64) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let key = self.resolve(number)?;
        self.write_key(session, key, value).await
    }

    pub async fn read_key<T>(&self, session: &mut DeviceSession<T>, key: RegisterKey) -> Result<f64>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let number = self.number(key)?;
        session.read_register(number).await
    }

    pub async fn write_key<T>(&self, session: &mut DeviceSession<T>, key: RegisterKey, value: f64) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let number = self.number(key)?;
        session.write_register(number, value).await
    }
}
