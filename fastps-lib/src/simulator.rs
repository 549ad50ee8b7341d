//! # Simulated FAST-PS controller
//!
//! A deterministic stand-in for the controller's ASCII command server. It keeps
//! just enough state to answer the verb table the way the real device does,
//! including `#NAK:13` for setpoint queries while the output is off.
//!
//! `Simulator` answers single command lines and has no I/O. `SimulatedDevice`
//! serves a `Simulator` over TCP and records every command line it receives.

use crate::protocol::UpdateMode;
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// NAK codes used by the simulator.
pub const NAK_UNKNOWN_COMMAND: &str = "01";
pub const NAK_BAD_VALUE: &str = "04";
pub const NAK_UNKNOWN_REGISTER: &str = "06";
pub const NAK_OUTPUT_OFF: &str = "13";

/// State of the simulated controller.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    /// Status bits other than bit 0, which mirrors the output state.
    faults: u32,
    output_on: bool,
    current_setpoint: f64,
    voltage_setpoint: f64,
    mode: UpdateMode,
    registers: BTreeMap<u16, f64>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare registers, all starting at zero.
    pub fn with_registers(mut self, numbers: impl IntoIterator<Item = u16>) -> Self {
        self.registers.extend(numbers.into_iter().map(|n| (n, 0.0)));
        self
    }

    pub fn with_output(mut self, on: bool) -> Self {
        self.output_on = on;
        self
    }

    pub fn set_faults(&mut self, faults: u32) {
        self.faults = faults & !1;
    }

    pub fn status(&self) -> u32 {
        self.faults | self.output_on as u32
    }

    pub fn output_on(&self) -> bool {
        self.output_on
    }

    pub fn setpoints(&self) -> (f64, f64) {
        (self.current_setpoint, self.voltage_setpoint)
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn register(&self, number: u16) -> Option<f64> {
        self.registers.get(&number).copied()
    }

    /// Answer one command line (without CRLF).
    pub fn handle(&mut self, line: &str) -> String {
        let line = line.trim();
        let (verb, args) = match line.split_once(':') {
            Some((verb, args)) => (verb, Some(args)),
            None => (line, None),
        };

        match (verb, args) {
            ("MST", None) => format!("#MST:{:08X}", self.status()),
            ("MON", None) => {
                self.output_on = true;
                ack()
            }
            ("MOFF", None) => {
                self.output_on = false;
                ack()
            }
            ("MRESET", None) => {
                self.faults = 0;
                ack()
            }
            ("MRI", None) => format!("#MRI:{:.6}", self.readback(self.current_setpoint)),
            ("MRV", None) => format!("#MRV:{:.6}", self.readback(self.voltage_setpoint)),
            ("MWI", Some("?")) => self.setpoint_reply("MWI", self.current_setpoint),
            ("MWV", Some("?")) => self.setpoint_reply("MWV", self.voltage_setpoint),
            ("MWI", Some(value)) => match value.trim().parse() {
                Ok(value) => {
                    self.current_setpoint = value;
                    ack()
                }
                Err(_) => nak(NAK_BAD_VALUE),
            },
            ("MWV", Some(value)) => match value.trim().parse() {
                Ok(value) => {
                    self.voltage_setpoint = value;
                    ack()
                }
                Err(_) => nak(NAK_BAD_VALUE),
            },
            ("MRG", Some(number)) => match number.trim().parse::<u16>() {
                Ok(number) => match self.registers.get(&number) {
                    Some(value) => format!("#MRG:{number}:{value}"),
                    None => nak(NAK_UNKNOWN_REGISTER),
                },
                Err(_) => nak(NAK_BAD_VALUE),
            },
            ("MWG", Some(args)) => self.write_register(args),
            ("UPMODE", None) => format!("#UPMODE:{}", self.mode),
            ("UPMODE", Some(mode)) => match mode.parse::<UpdateMode>() {
                Ok(mode) => {
                    self.mode = mode;
                    ack()
                }
                Err(_) => nak(NAK_BAD_VALUE),
            },
            _ => nak(NAK_UNKNOWN_COMMAND),
        }
    }

    fn readback(&self, setpoint: f64) -> f64 {
        if self.output_on { setpoint } else { 0.0 }
    }

    fn setpoint_reply(&self, verb: &str, value: f64) -> String {
        if self.output_on {
            format!("#{verb}:{value:.6}")
        } else {
            nak(NAK_OUTPUT_OFF)
        }
    }

    fn write_register(&mut self, args: &str) -> String {
        let Some((number, value)) = args.split_once(':') else {
            return nak(NAK_BAD_VALUE);
        };
        let (Ok(number), Ok(value)) = (number.trim().parse::<u16>(), value.trim().parse::<f64>()) else {
            return nak(NAK_BAD_VALUE);
        };
        match self.registers.get_mut(&number) {
            Some(slot) => {
                *slot = value;
                ack()
            }
            None => nak(NAK_UNKNOWN_REGISTER),
        }
    }
}

fn ack() -> String {
    "#AK".to_string()
}

fn nak(code: &str) -> String {
    format!("#NAK:{code}")
}

struct Shared {
    simulator: Mutex<Simulator>,
    commands: Mutex<Vec<String>>,
    silent: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A `Simulator` served over TCP.
pub struct SimulatedDevice {
    address: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SimulatedDevice {
    /// Serve on an ephemeral loopback port.
    pub async fn spawn(simulator: Simulator) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Self::serve(listener, simulator)
    }

    pub fn serve(listener: TcpListener, simulator: Simulator) -> io::Result<Self> {
        let address = listener.local_addr()?;
        let shared = Arc::new(Shared {
            simulator: Mutex::new(simulator),
            commands: Mutex::new(Vec::new()),
            silent: AtomicBool::new(false),
        });

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        info!(%address, "Simulated device listening");
        Ok(Self { address, shared, task })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Every command line received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.shared.commands).clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.shared.commands).clear();
    }

    /// Stop answering, while still recording commands.
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::Relaxed);
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut Simulator) -> R) -> R {
        f(&mut lock(&self.shared.simulator))
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "Client connected to simulated device");
                tokio::spawn(serve_client(stream, Arc::clone(&shared)));
            }
            Err(e) => {
                warn!(error = %e, "Simulated device accept failed");
                return;
            }
        }
    }
}

async fn serve_client(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut pending = String::new();
    let mut buffer = [0u8; 256];
    loop {
        let n = match stream.read(&mut buffer).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Simulated device read failed");
                return;
            }
        };
        pending.push_str(&String::from_utf8_lossy(&buffer[..n]));

        while let Some(end) = pending.find("\r\n") {
            let line: String = pending.drain(..end + 2).collect();
            let line = line.trim_end().to_string();
            lock(&shared.commands).push(line.clone());
            if shared.silent.load(Ordering::Relaxed) {
                continue;
            }
            let reply = lock(&shared.simulator).handle(&line);
            debug!(command = %line, %reply, "Simulated device");
            if stream.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                return;
            }
        }
    }
}
