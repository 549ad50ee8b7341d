pub mod config;
pub mod constants;
pub mod datagram;
pub mod device;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod registers;
pub mod responder;
pub mod simulator;
pub mod variables;


// Re-export the main types for easy access
pub use device::DeviceSession;
pub use error::{GatewayError, Result};
pub use registers::{RegisterEntry, RegisterTable};
pub use responder::UdpResponder;
pub use variables::VariableAdapter;
