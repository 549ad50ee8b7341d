//! Tests for gateway configuration loading

mod common;

use common::*;
use fastps_lib::config::GatewayConfig;
use fastps_lib::constants::DEVICE_ADDRESS;

const SAMPLE: &str = r#"
[server]
port = 4840

[device]
name = "FAST-PS 1"
address = "192.168.0.10:10001"

[[registers]]
number = 30
name = "PID_V_Kp"
description = "proportional gain of the voltage loop"

[[registers]]
number = 31
name = "PID_V_Ki"
description = "integral gain of the voltage loop"
"#;

#[test]
fn test_parse_full_config() {
    let config: GatewayConfig = SAMPLE.parse().unwrap();
    assert_eq!(config.server.port, 4840);
    assert_eq!(config.device.name, "FAST-PS 1");
    assert_eq!(config.device.address, "192.168.0.10:10001");
    assert_eq!(config.registers, pid_registers());

    let table = config.register_table().unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn test_defaults() {
    let config: GatewayConfig = "[device]\nname = \"PS\"\n".parse().unwrap();
    assert_eq!(config.server.port, 16664);
    assert_eq!(config.device.address, DEVICE_ADDRESS);
    assert!(config.registers.is_empty());
}

#[test]
fn test_invalid_configs() {
    for text in [
        "",
        "[device]\nname = \"\"\n",
        "[device]\nname = \"PS\"\n[[registers]]\nnumber = 1\nname = \"a/b\"\ndescription = \"\"\n",
        "[device]\nname = \"PS\"\n[[registers]]\nnumber = 70000\nname = \"big\"\ndescription = \"\"\n",
    ] {
        let result = text.parse::<GatewayConfig>();
        assert!(
            matches!(result, Err(GatewayError::Config(_))),
            "{text:?} should be rejected"
        );
    }
}

#[test]
fn test_register_table_errors_surface_at_startup() {
    let mut text = String::from("[device]\nname = \"PS\"\n");
    for n in 0..41 {
        text.push_str(&format!("[[registers]]\nnumber = {n}\nname = \"R{n}\"\ndescription = \"\"\n"));
    }
    let config: GatewayConfig = text.parse().unwrap();
    assert!(matches!(
        config.register_table(),
        Err(GatewayError::ConfigurationOverflow { count: 41, .. })
    ));
}

#[test]
fn test_missing_file() {
    let result = GatewayConfig::from_file("/nonexistent/fastps.toml");
    assert!(matches!(result, Err(GatewayError::Config(_))));
}
