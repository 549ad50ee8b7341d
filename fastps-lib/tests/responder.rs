//! Tests for the UDP control responder

mod common;

use common::*;
use fastps_lib::datagram::ControlDatagram;
use fastps_lib::packet::ResponseFrame;
use fastps_lib::responder::Outcome;
use fastps_lib::UdpResponder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const REPLY_WAIT: Duration = Duration::from_secs(2);
const DISCARD_WAIT: Duration = Duration::from_millis(300);

struct Harness {
    device: SimulatedDevice,
    client: UdpSocket,
    target: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<fastps_lib::Result<()>>,
}

impl Harness {
    async fn start(simulator: Simulator) -> Self {
        Self::start_with_delay(simulator, Duration::from_millis(1)).await
    }

    async fn start_with_delay(simulator: Simulator, delay: Duration) -> Self {
        let (device, session) = start(simulator).await;
        let responder = UdpResponder::bind("127.0.0.1:0".parse().unwrap(), session)
            .await
            .unwrap()
            .with_delay(delay);
        let target = SocketAddr::V4(responder.local_addr());

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(responder.run(Arc::clone(&running)));
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            device,
            client,
            target,
            running,
            task,
        }
    }

    async fn exchange(&self, request: &[u8]) -> Option<Vec<u8>> {
        self.exchange_within(request, REPLY_WAIT).await
    }

    async fn exchange_within(&self, request: &[u8], wait: Duration) -> Option<Vec<u8>> {
        self.client.send_to(request, self.target).await.unwrap();
        let mut buffer = [0u8; 256];
        match timeout(wait, self.client.recv_from(&mut buffer)).await {
            Ok(Ok((len, peer))) => {
                assert_eq!(peer, self.target);
                Some(buffer[..len].to_vec())
            }
            _ => None,
        }
    }

    async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let result = timeout(REPLY_WAIT, self.task).await.expect("responder did not stop");
        result.unwrap().unwrap();
    }
}

fn powered() -> Simulator {
    let mut sim = Simulator::new().with_output(true);
    sim.handle("MWV:12.5");
    sim.handle("MWI:0.75");
    sim.set_faults(0x0000_0100);
    sim
}

#[tokio::test]
async fn test_query_returns_one_frame() {
    let harness = Harness::start(powered()).await;

    let reply = harness
        .exchange(&ControlDatagram::query().to_bytes())
        .await
        .expect("no response");
    assert_eq!(reply.len(), 64);

    let frame = ResponseFrame::parse(&reply).unwrap();
    assert_eq!(frame.ip.identification.get(), 1);
    assert_eq!(frame.ip.source(), std::net::Ipv4Addr::LOCALHOST);
    assert_eq!(frame.udp.source_port.get(), harness.target.port());
    assert_eq!(
        frame.udp.destination_port.get(),
        harness.client.local_addr().unwrap().port()
    );

    let payload = frame.payload;
    assert_eq!(payload.status, harness.device.with_state(|sim| sim.status()));
    assert_eq!(payload.status, 0x101);
    assert_eq!(payload.current_setpoint_ua, 750_000);
    assert_eq!(payload.voltage_setpoint_uv, 12_500_000);
    assert_eq!(payload.current_value_ua, 750_000);
    assert_eq!(payload.voltage_value_uv, 12_500_000);

    // gathered in fixed order, no setpoint writes
    assert_eq!(harness.device.commands(), vec!["MST", "MWI:?", "MWV:?", "MRI", "MRV"]);
    harness.stop().await;
}

#[tokio::test]
async fn test_set_applies_voltage_then_current() {
    let harness = Harness::start(Simulator::new().with_output(true)).await;

    let request = ControlDatagram::new(true, 1.5, 5.0);
    assert_eq!(request.voltage_setpoint_uv, 5_000_000);
    let reply = harness.exchange(&request.to_bytes()).await.expect("no response");
    let frame = ResponseFrame::parse(&reply).unwrap();

    assert_eq!(
        harness.device.commands(),
        vec!["MWV:5.000000", "MWI:1.500000", "MST", "MWI:?", "MWV:?", "MRI", "MRV"]
    );
    assert_eq!(frame.payload.voltage_setpoint_uv, 5_000_000);
    assert_eq!(frame.payload.current_setpoint_ua, 1_500_000);
    harness.stop().await;
}

#[tokio::test]
async fn test_unanswered_values_are_zero() {
    // with the output off the device refuses setpoint queries and reads back zero
    let harness = Harness::start(Simulator::new()).await;
    harness.device.with_state(|sim| sim.handle("MWV:3.0"));

    let reply = harness
        .exchange(&ControlDatagram::query().to_bytes())
        .await
        .expect("no response");
    let payload = ResponseFrame::parse(&reply).unwrap().payload;
    assert_eq!(payload.status, 0);
    assert_eq!(payload.voltage_setpoint_uv, 0);
    assert_eq!(payload.voltage_value_uv, 0);
    harness.stop().await;
}

#[tokio::test]
async fn test_bad_datagrams_are_discarded() {
    let harness = Harness::start(powered()).await;

    let mut bad_magic = ControlDatagram::query().to_bytes();
    bad_magic[3] = 0;
    assert!(harness.exchange_within(&bad_magic, DISCARD_WAIT).await.is_none());
    assert!(
        harness
            .exchange_within(&hex_to_bytes("4365554c0000"), DISCARD_WAIT)
            .await
            .is_none()
    );
    assert!(harness.device.commands().is_empty());

    // discarded datagrams still advance the packet counter
    let reply = harness
        .exchange(&ControlDatagram::query().to_bytes())
        .await
        .expect("no response");
    assert_eq!(ResponseFrame::parse(&reply).unwrap().ip.identification.get(), 3);
    harness.stop().await;
}

#[tokio::test]
async fn test_arriving_datagram_ends_idle_wait() {
    // the idle wait is far longer than the reply wait, so only readiness can wake the loop
    let harness = Harness::start_with_delay(powered(), Duration::from_secs(30)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    let reply = harness
        .exchange(&ControlDatagram::query().to_bytes())
        .await
        .expect("no response");
    assert_eq!(reply.len(), 64);
    assert!(started.elapsed() < REPLY_WAIT);
    harness.task.abort();
}

#[tokio::test]
async fn test_poll_once_never_blocks() {
    let (_device, session) = start(powered()).await;
    let mut responder = UdpResponder::bind("127.0.0.1:0".parse().unwrap(), session)
        .await
        .unwrap();

    assert_eq!(responder.poll_once().await.unwrap(), Outcome::Idle);
    assert_eq!(responder.received(), 0);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = SocketAddr::V4(responder.local_addr());
    client.send_to(&[0u8; 24], target).await.unwrap();

    let mut outcome = Outcome::Idle;
    for _ in 0..200 {
        outcome = responder.poll_once().await.unwrap();
        if outcome != Outcome::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        outcome,
        Outcome::Discarded {
            peer: client.local_addr().unwrap(),
            len: 24
        }
    );
    assert_eq!(responder.received(), 1);
}

#[tokio::test]
async fn test_lost_device_stops_responder() {
    // a transport that tears every command line
    let (transport, _peer) = tokio::io::duplex(4);
    let session = DeviceSession::new(transport, TEST_TIMEOUT);
    let responder = UdpResponder::bind("127.0.0.1:0".parse().unwrap(), session)
        .await
        .unwrap()
        .with_delay(Duration::from_millis(1));
    let target = SocketAddr::V4(responder.local_addr());
    let task = tokio::spawn(responder.run(Arc::new(AtomicBool::new(true))));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&ControlDatagram::query().to_bytes(), target)
        .await
        .unwrap();

    let result = timeout(REPLY_WAIT, task).await.expect("responder kept running").unwrap();
    assert!(matches!(result, Err(GatewayError::ShortWrite { .. })));
}
