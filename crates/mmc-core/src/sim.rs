//! Simulated controller chain
//!
//! Stands in for MMC hardware in tests and in the CLI's `--simulate` mode.
//! Moves complete instantly; the encoder reading carries a little seeded
//! noise so that theoretical and measured positions differ like on a real
//! stage.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::{
    codec::decode_command, Command, CommunicationChannel, DeviceError, ErrorCode, Mnemonic,
    StatusFlags,
};

/// Firmware string reported by default
pub const DEFAULT_VERSION: &str = "v1.2.3";

/// Default soft travel limits in millimetres
pub const DEFAULT_TRAVEL: (f64, f64) = (-50.0, 50.0);

struct SimAxis {
    position: f64,
    limits: (f64, f64),
    params: HashMap<Mnemonic, f64>,
    errors: Vec<DeviceError>,
}

impl SimAxis {
    fn new() -> Self {
        let params = HashMap::from([
            (Mnemonic::Acc, 200.0),
            (Mnemonic::Dec, 200.0),
            (Mnemonic::Vel, 1.0),
            (Mnemonic::Vmx, 2.0),
            (Mnemonic::Fbk, 3.0),
            (Mnemonic::Mot, 1.0),
        ]);
        Self {
            position: 0.0,
            limits: DEFAULT_TRAVEL,
            params,
            errors: Vec::new(),
        }
    }

    fn push_error(&mut self, code: ErrorCode, mnemonic: &str, message: &str) {
        self.errors.push(DeviceError {
            code,
            mnemonic: mnemonic.to_string(),
            message: message.to_string(),
        });
    }

    fn move_to(&mut self, target: f64, mnemonic: Mnemonic) -> bool {
        if target < self.limits.0 || target > self.limits.1 {
            self.push_error(
                ErrorCode::MoveOutsideSoftLimits,
                mnemonic.as_str(),
                "Move Outside Soft Limits",
            );
            return false;
        }
        self.position = target;
        true
    }

    fn status(&self) -> StatusFlags {
        let mut bits = StatusFlags::STAGE_STOPPED;
        if self.position <= self.limits.0 {
            bits |= StatusFlags::NEGATIVE_SWITCH;
        }
        if self.position >= self.limits.1 {
            bits |= StatusFlags::POSITIVE_SWITCH;
        }
        if !self.errors.is_empty() {
            bits |= StatusFlags::ERRORS_PENDING;
        }
        StatusFlags::from_bits(bits)
    }
}

struct SimState {
    axes: BTreeMap<u8, SimAxis>,
    version: String,
    reply_to_writes: bool,
    silent: bool,
    latency: Duration,
    encoder_noise: f64,
    rng: StdRng,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    ready_at: Instant,
    writes: Vec<Vec<u8>>,
}

/// Simulated controller chain. Clones share the same controllers, so a test
/// can keep one clone to inspect what the connection did with the other.
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedController {
    /// Chain of `axes` controllers numbered from 1
    pub fn new(axes: u8) -> Self {
        let axes = (1..=axes).map(|n| (n, SimAxis::new())).collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                axes,
                version: DEFAULT_VERSION.to_string(),
                reply_to_writes: false,
                silent: false,
                latency: Duration::ZERO,
                encoder_noise: 0.0002,
                rng: StdRng::seed_from_u64(0x4d4d43),
                inbound: Vec::new(),
                outbound: VecDeque::new(),
                ready_at: Instant::now(),
                writes: Vec::new(),
            })),
        }
    }

    /// Report this firmware string for `VER?`
    pub fn with_version(self, version: &str) -> Self {
        self.state.lock().version = version.to_string();
        self
    }

    /// Answer write-form commands with `#` (or an error frame)
    pub fn replying_to_writes(self) -> Self {
        self.state.lock().reply_to_writes = true;
        self
    }

    /// Hold every reply back for `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Peak encoder noise in millimetres
    pub fn with_encoder_noise(self, noise: f64) -> Self {
        self.state.lock().encoder_noise = noise;
        self
    }

    /// Stop (or resume) answering anything
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Theoretical position of an axis
    pub fn position(&self, axis: u8) -> Option<f64> {
        self.state.lock().axes.get(&axis).map(|a| a.position)
    }

    /// Queue an error on an axis as if the controller had raised it
    pub fn inject_error(&self, axis: u8, code: ErrorCode, mnemonic: &str, message: &str) {
        if let Some(a) = self.state.lock().axes.get_mut(&axis) {
            a.push_error(code, mnemonic, message);
        }
    }

    /// Every buffer passed to `write`, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Received command lines, terminators stripped
    pub fn received_lines(&self) -> Vec<String> {
        let state = self.state.lock();
        let all: Vec<u8> = state.writes.iter().flatten().copied().collect();
        String::from_utf8_lossy(&all)
            .split('\n')
            .map(|l| l.trim_matches(['\r', '\n']).to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

impl SimState {
    fn process_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_matches(['\r', '\n', ' ']);
        if text.is_empty() {
            return;
        }

        let command = match decode_command(text.as_bytes()) {
            Ok(command) => command,
            Err(_) => {
                self.reject(text);
                return;
            }
        };

        if command.axis().is_global() {
            self.apply_global(&command);
            return;
        }

        let reply_to_writes = self.reply_to_writes;
        let noise = self.encoder_noise;
        let jitter = if noise > 0.0 {
            self.rng.gen_range(-noise..=noise)
        } else {
            0.0
        };
        let version = self.version.clone();

        let Some(axis) = self.axes.get_mut(&command.axis().number()) else {
            // Nobody on the chain answers to this address
            return;
        };

        let reply = if command.is_query() {
            Some(match command.mnemonic() {
                Mnemonic::Ver => format!("#{}", version),
                Mnemonic::Pos => format!("#{:.6},{:.6}", axis.position, axis.position + jitter),
                Mnemonic::Sta => format!("#{}", axis.status().bits()),
                Mnemonic::Err => {
                    let report: String = axis
                        .errors
                        .drain(..)
                        .map(|e| format!("#Error {} - {} - {}", e.code.code(), e.mnemonic, e.message))
                        .collect();
                    if report.is_empty() {
                        "#".to_string()
                    } else {
                        report
                    }
                }
                other => format!("#{}", axis.params.get(&other).copied().unwrap_or(0.0)),
            })
        } else {
            let before = axis.errors.len();
            apply_write(axis, &command);
            if reply_to_writes {
                Some(match axis.errors.get(before) {
                    Some(e) => format!("#Error {} - {} - {}", e.code.code(), e.mnemonic, e.message),
                    None => "#".to_string(),
                })
            } else {
                None
            }
        };

        if let Some(reply) = reply {
            self.queue_reply(&reply);
        }
    }

    fn apply_global(&mut self, command: &Command) {
        if command.is_query() {
            for axis in self.axes.values_mut() {
                axis.push_error(
                    ErrorCode::GlobalReadOperationRequest,
                    command.mnemonic().as_str(),
                    "Global Read Operation Request",
                );
            }
            return;
        }
        for axis in self.axes.values_mut() {
            apply_write(axis, command);
        }
    }

    /// Record a parse failure against the addressed axis (or the first one)
    fn reject(&mut self, text: &str) {
        let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
        let (code, message) = if digits.is_empty() {
            (ErrorCode::MissingAxisNumber, "Missing Axis Number")
        } else {
            (ErrorCode::InvalidCommand, "Invalid Command")
        };
        let mnemonic: String = text[digits.len()..]
            .chars()
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase();
        let number = digits.parse::<u8>().unwrap_or(1);
        let reply_to_writes = self.reply_to_writes;
        if let Some(axis) = self.axes.get_mut(&number) {
            axis.push_error(code, &mnemonic, message);
            if reply_to_writes {
                let reply = format!("#Error {} - {} - {}", code.code(), mnemonic, message);
                self.queue_reply(&reply);
            }
        }
    }

    fn queue_reply(&mut self, reply: &str) {
        if self.silent {
            return;
        }
        self.outbound.extend(reply.as_bytes());
        self.outbound.extend(b"\r\n");
        self.ready_at = Instant::now() + self.latency;
    }

    fn readable(&self) -> usize {
        if Instant::now() >= self.ready_at {
            self.outbound.len()
        } else {
            0
        }
    }
}

fn apply_write(axis: &mut SimAxis, command: &Command) {
    let mnemonic = command.mnemonic();
    let arg = command.argument();
    match (mnemonic, arg) {
        (Mnemonic::Mva, Some(target)) => {
            axis.move_to(target, mnemonic);
        }
        (Mnemonic::Mvr, Some(delta)) => {
            let target = axis.position + delta;
            axis.move_to(target, mnemonic);
        }
        (Mnemonic::Hom | Mnemonic::Zro, _) => axis.position = 0.0,
        (Mnemonic::Mln, _) => axis.position = axis.limits.0,
        (Mnemonic::Mlp, _) => axis.position = axis.limits.1,
        (Mnemonic::Tln, Some(limit)) => axis.limits.0 = limit,
        (Mnemonic::Tlp, Some(limit)) => axis.limits.1 = limit,
        (Mnemonic::Rst | Mnemonic::Def, _) => *axis = SimAxis::new(),
        (other, Some(value)) => {
            axis.params.insert(other, value);
        }
        _ => {}
    }
}

impl Read for SimulatedController {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let n = state.readable().min(buf.len());
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply pending"));
        }
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedController {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.writes.push(buf.to_vec());
        state.inbound.extend_from_slice(buf);
        while let Some(end) = state.inbound.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = state.inbound.drain(..=end).collect();
            state.process_line(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for SimulatedController {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.state.lock().outbound.clear();
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.state.lock().inbound.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.state.lock().readable() as u32)
    }
}
