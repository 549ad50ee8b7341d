//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use fastps_lib::error::GatewayError;
#[allow(unused_imports)]
pub use fastps_lib::registers::{RegisterEntry, RegisterTable};
#[allow(unused_imports)]
pub use fastps_lib::simulator::{SimulatedDevice, Simulator};
#[allow(unused_imports)]
pub use fastps_lib::DeviceSession;
#[allow(unused_imports)]
pub use hex;

use std::time::Duration;
use tokio::net::TcpStream;

/// Receive timeout used against the simulator; short enough to keep
/// timeout tests fast.
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Route library logs to the test output, honouring `RUST_LOG`
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a simulator and open a session to it
#[allow(dead_code)]
pub async fn start(simulator: Simulator) -> (SimulatedDevice, DeviceSession<TcpStream>) {
    init_tracing();
    let device = SimulatedDevice::spawn(simulator)
        .await
        .expect("Failed to start simulated device");
    let session = DeviceSession::connect(&device.address().to_string(), TEST_TIMEOUT)
        .await
        .expect("Failed to connect to simulated device");
    (device, session)
}

/// Registers 30 and 31, as declared in a typical configuration
#[allow(dead_code)]
pub fn pid_registers() -> Vec<RegisterEntry> {
    vec![
        RegisterEntry::new(30, "PID_V_Kp", "proportional gain of the voltage loop"),
        RegisterEntry::new(31, "PID_V_Ki", "integral gain of the voltage loop"),
    ]
}
