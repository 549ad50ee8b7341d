// Protocol constants for the FAST-PS gateway

use std::time::Duration;

/// Loopback endpoint of the controller's ASCII command server
pub const DEVICE_ADDRESS: &str = "127.0.0.1:10001";

/// Default receive timeout for one device round trip
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Size of the device response buffer
pub const DEVICE_BUFFER_SIZE: usize = 128;

/// Port the UDP responder listens on
pub const UDP_PORT: u16 = 16665;

/// Size of the UDP receive buffer
pub const UDP_BUFFER_SIZE: usize = 256;

/// Signature word of a control datagram ("CeUL" on the wire)
pub const CONTROL_MAGIC: u32 = 0x4C55_6543;

/// Size of a control datagram (24 bytes)
pub const CONTROL_SIZE: usize = 24;

/// Size of a response payload (36 bytes)
pub const RESPONSE_SIZE: usize = 36;

/// Size of an IPv4 header without options (20 bytes)
pub const IPV4_HEADER_SIZE: usize = 20;

/// Size of a UDP header (8 bytes)
pub const UDP_HEADER_SIZE: usize = 8;

/// Size of the checksum pseudo-header (12 bytes)
pub const PSEUDO_HEADER_SIZE: usize = 12;

/// Full response frame: IPv4 header + UDP header + payload (64 bytes)
pub const RESPONSE_FRAME_SIZE: usize = IPV4_HEADER_SIZE + UDP_HEADER_SIZE + RESPONSE_SIZE;

/// Version 4, header length 5 words
pub const IPV4_VERSION_IHL: u8 = 0x45;

/// Time to live of synthesized responses
pub const IPV4_TTL: u8 = 255;

/// Maximum number of configured registers
pub const MAX_REGISTERS: usize = 40;

/// Longest idle wait per responder iteration. The timer rounds this up to
/// 1 ms; an arriving datagram ends the wait immediately.
pub const LOOP_DELAY: Duration = Duration::from_micros(100);

/// Scale between volts/amps and the integer micro-units on the wire
pub const MICRO: f64 = 1_000_000.0;
