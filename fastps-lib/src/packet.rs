//! IPv4 and UDP headers for the synthesized response frame.
//!
//! The responder sends its reply as an ordinary datagram whose content starts
//! with a complete IPv4 header and UDP header, followed by the 36-byte payload.
//! Clients strip the first 28 bytes and decode the payload by fixed offset.
//! Both headers are in network byte order; the payload is little-endian.

use crate::constants::{
    IPV4_HEADER_SIZE, IPV4_TTL, IPV4_VERSION_IHL, PSEUDO_HEADER_SIZE, RESPONSE_FRAME_SIZE, RESPONSE_SIZE,
    UDP_HEADER_SIZE,
};
use crate::datagram::ResponseDatagram;
use crate::error::{GatewayError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::net::{Ipv4Addr, SocketAddrV4};
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum IpProtocol {
    Udp = 17,

    #[num_enum(catch_all)]
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_length: U16,
    pub identification: U16,
    pub flags_fragment: U16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: U16,
    pub source: [u8; 4],
    pub destination: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UdpHeader {
    pub source_port: U16,
    pub destination_port: U16,
    pub length: U16,
    pub checksum: U16,
}

/// Header prepended to the UDP segment for checksum purposes only.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PseudoHeader {
    pub source: [u8; 4],
    pub destination: [u8; 4],
    pub zero: u8,
    pub protocol: u8,
    pub udp_length: U16,
}

/// RFC 1071 internet checksum: ones'-complement of the ones'-complement sum
/// of all 16-bit big-endian words. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u64 = chunks
        .by_ref()
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u64)
        .sum();
    if let [last] = chunks.remainder() {
        sum += (*last as u64) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

impl Ipv4Header {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, identification: u16, payload_len: usize) -> Self {
        let mut header = Self {
            version_ihl: IPV4_VERSION_IHL,
            tos: 0,
            total_length: U16::new((IPV4_HEADER_SIZE + payload_len) as u16),
            identification: U16::new(identification),
            flags_fragment: U16::new(0),
            ttl: IPV4_TTL,
            protocol: IpProtocol::Udp.into(),
            checksum: U16::new(0),
            source: source.octets(),
            destination: destination.octets(),
        };
        header.checksum = U16::new(checksum(header.as_bytes()));
        header
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from_primitive(self.protocol)
    }

    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.source)
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.destination)
    }

    /// A header carrying a correct checksum sums to zero.
    pub fn verify(&self) -> Result<()> {
        match checksum(self.as_bytes()) {
            0 => Ok(()),
            _ => Err(GatewayError::ChecksumError {
                expected: self.expected_checksum(),
                actual: self.checksum.get(),
            }),
        }
    }

    fn expected_checksum(&self) -> u16 {
        let mut copy = *self;
        copy.checksum = U16::new(0);
        checksum(copy.as_bytes())
    }
}

impl PseudoHeader {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, udp_length: u16) -> Self {
        Self {
            source: source.octets(),
            destination: destination.octets(),
            zero: 0,
            protocol: IpProtocol::Udp.into(),
            udp_length: U16::new(udp_length),
        }
    }
}

/// Checksum of a UDP segment over the pseudo-header, the UDP header (with a
/// zero checksum field) and the payload.
pub fn udp_checksum(source: Ipv4Addr, destination: Ipv4Addr, header: &UdpHeader, payload: &[u8]) -> u16 {
    let mut header = *header;
    header.checksum = U16::new(0);

    let pseudo = PseudoHeader::new(source, destination, header.length.get());
    let mut pseudogram = BytesMut::with_capacity(PSEUDO_HEADER_SIZE + UDP_HEADER_SIZE + payload.len());
    pseudogram.put_slice(pseudo.as_bytes());
    pseudogram.put_slice(header.as_bytes());
    pseudogram.put_slice(payload);

    match checksum(&pseudogram) {
        // RFC 768: a computed zero is transmitted as all ones
        0 => 0xffff,
        sum => sum,
    }
}

/// A complete response: IPv4 header, UDP header and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    pub ip: Ipv4Header,
    pub udp: UdpHeader,
    pub payload: ResponseDatagram,
}

impl ResponseFrame {
    /// Assemble the frame for `payload`, sent from `source` to `destination`.
    pub fn build(source: SocketAddrV4, destination: SocketAddrV4, identification: u16, payload: ResponseDatagram) -> Self {
        let udp_length = (UDP_HEADER_SIZE + RESPONSE_SIZE) as u16;
        let ip = Ipv4Header::new(*source.ip(), *destination.ip(), identification, udp_length as usize);

        let mut udp = UdpHeader {
            source_port: U16::new(source.port()),
            destination_port: U16::new(destination.port()),
            length: U16::new(udp_length),
            checksum: U16::new(0),
        };
        udp.checksum = U16::new(udp_checksum(*source.ip(), *destination.ip(), &udp, &payload.to_bytes()));

        Self { ip, udp, payload }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(RESPONSE_FRAME_SIZE);
        buffer.put_slice(self.ip.as_bytes());
        buffer.put_slice(self.udp.as_bytes());
        buffer.put_slice(&self.payload.to_bytes());
        buffer.freeze()
    }

    /// Decode a received frame and verify both checksums.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RESPONSE_FRAME_SIZE {
            return Err(GatewayError::MalformedPacket {
                expected: RESPONSE_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let (ip, rest) = Ipv4Header::read_from_prefix(bytes).map_err(|_| GatewayError::MalformedPacket {
            expected: IPV4_HEADER_SIZE,
            actual: bytes.len(),
        })?;
        let (udp, payload) = UdpHeader::read_from_prefix(rest).map_err(|_| GatewayError::MalformedPacket {
            expected: UDP_HEADER_SIZE,
            actual: rest.len(),
        })?;

        ip.verify()?;
        if ip.protocol() != IpProtocol::Udp {
            return Err(GatewayError::ProtocolMismatch {
                expected: "UDP".to_string(),
                response: format!("{:?}", ip.protocol()),
            });
        }
        if udp.checksum.get() != 0 {
            let expected = udp_checksum(ip.source(), ip.destination(), &udp, payload);
            if expected != udp.checksum.get() {
                return Err(GatewayError::ChecksumError {
                    expected,
                    actual: udp.checksum.get(),
                });
            }
        }

        Ok(Self {
            ip,
            udp,
            payload: ResponseDatagram::parse(payload)?,
        })
    }
}
