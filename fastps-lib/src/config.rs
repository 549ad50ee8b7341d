//! Gateway configuration
//!
//! Loaded from a TOML file naming the device and the registers to expose:
//!
//! ```toml
//! [server]
//! port = 16664
//!
//! [device]
//! name = "FAST-PS 1"
//!
//! [[registers]]
//! number = 30
//! name = "PID_I_Kp_v"
//! description = "proportional gain of the voltage loop"
//! ```

use crate::constants::DEVICE_ADDRESS;
use crate::error::{GatewayError, Result};
use crate::registers::{RegisterEntry, RegisterTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub device: DeviceConfig,
    /// Registers in declaration order
    #[serde(default)]
    pub registers: Vec<RegisterEntry>,
}

/// Settings of the variable-access server hosting the variables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 16664 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Endpoint of the controller's command server
    #[serde(default = "default_device_address")]
    pub address: String,
}

fn default_device_address() -> String {
    DEVICE_ADDRESS.to_string()
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {e}", path.display())))?;
        contents.parse()
    }

    /// Build the register table. Fails before any connection is attempted if
    /// the register list is too long or repeats a number.
    pub fn register_table(&self) -> Result<RegisterTable> {
        RegisterTable::load(self.registers.iter().cloned())
    }

    fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            return Err(GatewayError::Config("device name is empty".to_string()));
        }
        for register in &self.registers {
            if register.name.trim().is_empty() {
                return Err(GatewayError::Config(format!("register {} has no name", register.number)));
            }
            if register.name.contains('/') {
                return Err(GatewayError::Config(format!(
                    "register name {:?} must not contain '/'",
                    register.name
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for GatewayConfig {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
