//! Tests for the variable table and its read/write callbacks

mod common;

use common::*;
use fastps_lib::variables::{Access, DataType, DataValue, Quality, Variant};
use fastps_lib::VariableAdapter;
use tokio::net::TcpStream;

async fn adapter(simulator: Simulator) -> (SimulatedDevice, VariableAdapter<TcpStream>) {
    let (device, session) = start(simulator.with_registers([30, 31])).await;
    let registers = RegisterTable::load(pid_registers()).unwrap();
    let adapter = VariableAdapter::new(session, registers, "FAST-PS 1").unwrap();
    (device, adapter)
}

#[tokio::test]
async fn test_variable_table() {
    let (_device, adapter) = adapter(Simulator::new()).await;

    let paths: Vec<String> = adapter.variables().iter().map(|v| v.path()).collect();
    assert_eq!(
        paths,
        vec![
            "Device/Name",
            "Device/Status",
            "Device/OutputOn",
            "Device/MReset",
            "Device/SfpMode",
            "SetPoint/Voltage",
            "SetPoint/Current",
            "SetPoint/VoltageSetpoint",
            "SetPoint/CurrentSetpoint",
            "Registers/PID_V_Kp",
            "Registers/PID_V_Ki",
        ]
    );

    let status = adapter.variable("Device/Status").unwrap();
    assert_eq!(status.data_type(), DataType::UInt32);
    assert_eq!(status.access(), Access::ReadOnly);
    let register = adapter.variable("Registers/PID_V_Ki").unwrap();
    assert_eq!(register.data_type(), DataType::Double);
    assert_eq!(register.access(), Access::ReadWrite);
    assert_eq!(register.description, "integral gain of the voltage loop");
}

#[tokio::test]
async fn test_register_name_clash_is_rejected() {
    let (_device, session) = start(Simulator::new()).await;
    let registers = RegisterTable::load(vec![
        RegisterEntry::new(1, "Gain", ""),
        RegisterEntry::new(2, "Gain", ""),
    ])
    .unwrap();
    assert!(matches!(
        VariableAdapter::new(session, registers, "FAST-PS 1"),
        Err(GatewayError::Config(_))
    ));
}

#[tokio::test]
async fn test_device_name_needs_no_exchange() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    let value = adapter.read("Device/Name").await.unwrap();
    assert_eq!(value, DataValue::good(Variant::String("FAST-PS 1".to_string())));
    assert!(device.commands().is_empty());
}

#[tokio::test]
async fn test_reset_is_momentary() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    assert_eq!(
        adapter.read("Device/MReset").await.unwrap(),
        DataValue::good(Variant::Boolean(false))
    );
    adapter.write("Device/MReset", Variant::Boolean(false)).await.unwrap();
    assert!(device.commands().is_empty());

    adapter.write("Device/MReset", Variant::Boolean(true)).await.unwrap();
    assert_eq!(device.commands(), vec!["MRESET"]);
    assert_eq!(
        adapter.read("Device/MReset").await.unwrap(),
        DataValue::good(Variant::Boolean(false))
    );
}

#[tokio::test]
async fn test_output_on_follows_status_bit() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    assert_eq!(
        adapter.read("Device/OutputOn").await.unwrap(),
        DataValue::good(Variant::Boolean(false))
    );
    adapter.write("Device/OutputOn", Variant::Boolean(true)).await.unwrap();
    assert_eq!(
        adapter.read("Device/OutputOn").await.unwrap(),
        DataValue::good(Variant::Boolean(true))
    );
    adapter.write("Device/OutputOn", Variant::Boolean(false)).await.unwrap();

    assert_eq!(device.commands(), vec!["MST", "MON", "MST", "MOFF"]);
}

#[tokio::test]
async fn test_setpoint_uncertain_while_output_off() {
    let (_device, mut adapter) = adapter(Simulator::new()).await;

    adapter
        .write("SetPoint/VoltageSetpoint", Variant::Double(5.0))
        .await
        .unwrap();
    let value = adapter.read("SetPoint/VoltageSetpoint").await.unwrap();
    assert_eq!(value.quality, Quality::Uncertain);
    assert!(value.value.is_none());

    adapter.write("Device/OutputOn", Variant::Boolean(true)).await.unwrap();
    assert_eq!(
        adapter.read("SetPoint/VoltageSetpoint").await.unwrap(),
        DataValue::good(Variant::Double(5.0))
    );
    assert_eq!(
        adapter.read("SetPoint/Voltage").await.unwrap(),
        DataValue::good(Variant::Double(5.0))
    );
}

#[tokio::test]
async fn test_sfp_mode() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    adapter.write("Device/SfpMode", Variant::Boolean(true)).await.unwrap();
    assert_eq!(
        adapter.read("Device/SfpMode").await.unwrap(),
        DataValue::good(Variant::Boolean(true))
    );
    assert_eq!(device.commands(), vec!["UPMODE:SFP", "UPMODE"]);
}

#[tokio::test]
async fn test_register_variables() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    adapter.write("Registers/PID_V_Ki", Variant::Double(0.75)).await.unwrap();
    assert_eq!(
        adapter.read("Registers/PID_V_Ki").await.unwrap(),
        DataValue::good(Variant::Double(0.75))
    );
    assert_eq!(device.commands(), vec!["MWG:31:0.75", "MRG:31"]);
}

#[tokio::test]
async fn test_invalid_writes_send_nothing() {
    let (device, mut adapter) = adapter(Simulator::new()).await;

    for value in [
        Variant::Empty,
        Variant::Array(vec![Variant::Double(1.0), Variant::Double(2.0)]),
        Variant::Boolean(true),
        Variant::String("5.0".to_string()),
    ] {
        let result = adapter.write("SetPoint/CurrentSetpoint", value.clone()).await;
        assert!(
            matches!(result, Err(GatewayError::InvalidInput(_))),
            "{value:?} should be rejected, got {result:?}"
        );
    }

    assert!(matches!(
        adapter.write("SetPoint/Voltage", Variant::Double(1.0)).await,
        Err(GatewayError::NotWritable(_))
    ));
    assert!(matches!(
        adapter.write("Device/Status", Variant::UInt32(0)).await,
        Err(GatewayError::NotWritable(_))
    ));
    assert!(matches!(
        adapter.read("Device/Missing").await,
        Err(GatewayError::UnknownVariable(_))
    ));
    assert!(device.commands().is_empty());
}

#[tokio::test]
async fn test_silent_device_reads_uncertain() {
    let (device, mut adapter) = adapter(Simulator::new()).await;
    device.set_silent(true);

    let value = adapter.read("Device/Status").await.unwrap();
    assert_eq!(value, DataValue::uncertain());
}
