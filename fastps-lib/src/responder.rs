use crate::constants::{LOOP_DELAY, UDP_BUFFER_SIZE};
use crate::datagram::{ControlDatagram, ResponseDatagram, from_micro, to_micro};
use crate::device::DeviceSession;
use crate::error::{GatewayError, Result};
use crate::packet::ResponseFrame;
use std::io::ErrorKind;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

/// What one polling iteration did with the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was waiting.
    Idle,
    /// A datagram was received and dropped.
    Discarded { peer: SocketAddr, len: usize },
    /// A datagram was answered with a response frame.
    Responded { peer: SocketAddr, frame_len: usize },
}

/// Answers control datagrams with a status/setpoint/readback frame.
///
/// Every received datagram is handled exactly once: it is either discarded or
/// answered with one response frame before the next receive.
pub struct UdpResponder<T = TcpStream> {
    socket: UdpSocket,
    local: SocketAddrV4,
    session: DeviceSession<T>,
    buffer: [u8; UDP_BUFFER_SIZE],
    received: u64,
    delay: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> UdpResponder<T> {
    /// Bind the UDP port. The bound IPv4 address becomes the source address of
    /// every synthesized IP header.
    pub async fn bind(address: SocketAddr, session: DeviceSession<T>) -> Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(local) => local,
            SocketAddr::V6(local) => {
                return Err(GatewayError::Config(format!(
                    "UDP responder needs an IPv4 address, got {local}"
                )));
            }
        };
        info!(%local, "UDP socket open.");
        Ok(Self {
            socket,
            local,
            session,
            buffer: [0; UDP_BUFFER_SIZE],
            received: 0,
            delay: LOOP_DELAY,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Number of datagrams received so far, valid or not.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Poll until `running` is cleared. The flag is checked once per iteration,
    /// so an exchange in progress always completes. Only fatal errors end the
    /// loop early; the device connection and the UDP socket are closed on return.
    ///
    /// Each idle wait ends as soon as a datagram arrives, or after `delay` at
    /// the latest. Tokio timers round `delay` up to whole milliseconds.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        info!(local = %self.local, "UDP responder running.");
        while running.load(Ordering::Relaxed) {
            let _ = tokio::time::timeout(self.delay, self.socket.readable()).await;
            self.poll_once().await?;
        }
        info!(received = self.received, "UDP responder stopped running.");
        Ok(())
    }

    /// One `Idle -> {Discard | Respond} -> Idle` step. Never waits for a datagram.
    pub async fn poll_once(&mut self) -> Result<Outcome> {
        let (len, peer) = match self.socket.try_recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Outcome::Idle),
            Err(e) => {
                // e.g. an ICMP port-unreachable reported for an earlier send
                debug!(error = %e, "UDP receive failed");
                return Ok(Outcome::Idle);
            }
        };
        self.received += 1;
        debug!(%peer, bytes = hex::encode(&self.buffer[..len]), "UDP read");

        let control = match ControlDatagram::parse(&self.buffer[..len]) {
            Ok(control) => control,
            Err(GatewayError::BadMagic(magic)) => {
                warn!(%peer, "Received wrong magic {:#010x}, discarding", magic);
                return Ok(Outcome::Discarded { peer, len });
            }
            Err(e) => {
                warn!(%peer, error = %e, "Received unknown packet, discarding");
                return Ok(Outcome::Discarded { peer, len });
            }
        };
        let SocketAddr::V4(peer_v4) = peer else {
            warn!(%peer, "Cannot answer a non-IPv4 peer, discarding");
            return Ok(Outcome::Discarded { peer, len });
        };

        if control.applies_setpoints() {
            self.apply_setpoints(&control).await?;
        }
        let payload = self.gather().await?;

        // the identification field carries the low 16 bits of the packet counter
        let frame = ResponseFrame::build(self.local, peer_v4, self.received as u16, payload);
        let bytes = frame.to_bytes();
        debug!(%peer, bytes = hex::encode(&bytes), "UDP write");
        if let Err(e) = self.socket.send_to(&bytes, peer).await {
            warn!(%peer, error = %e, "Failed to send response");
        }
        Ok(Outcome::Responded {
            peer,
            frame_len: bytes.len(),
        })
    }

    /// Voltage first, then current. A rejected setpoint is logged and the
    /// response is still sent.
    async fn apply_setpoints(&mut self, control: &ControlDatagram) -> Result<()> {
        let volts = from_micro(control.voltage_setpoint_uv);
        let amperes = from_micro(control.current_setpoint_ua);
        debug!(volts, amperes, "Applying setpoints");

        if let Err(e) = self.session.set_voltage_setpoint(volts).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "error setting the voltage");
        }
        if let Err(e) = self.session.set_current_setpoint(amperes).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "error setting the current");
        }
        Ok(())
    }

    /// Five sequential round trips in fixed order. A value the device did not
    /// deliver is reported as zero.
    async fn gather(&mut self) -> Result<ResponseDatagram> {
        let status = or_zero(self.session.status().await, "status")?;
        let current_setpoint = or_zero(self.session.current_setpoint().await, "current setpoint")?;
        let voltage_setpoint = or_zero(self.session.voltage_setpoint().await, "voltage setpoint")?;
        let current = or_zero(self.session.current().await, "current")?;
        let voltage = or_zero(self.session.voltage().await, "voltage")?;

        Ok(ResponseDatagram {
            status,
            current_setpoint_ua: to_micro(current_setpoint),
            voltage_setpoint_uv: to_micro(voltage_setpoint),
            current_value_ua: to_micro(current),
            voltage_value_uv: to_micro(voltage),
        })
    }
}

fn or_zero<V: Default>(result: Result<V>, what: &str) -> Result<V> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!(error = %e, "No {} from device", what);
            Ok(V::default())
        }
    }
}
