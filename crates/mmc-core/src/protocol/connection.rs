//! Connection management
//!
//! Owns one controller chain and runs command/reply transactions on it.
//! Transactions on a connection never overlap: callers take a ticket and are
//! served strictly in the order they arrived.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    codec::{self, LineAccumulator, Response},
    commands::{Axis, Command, Mnemonic},
    device_error::{contains_errors, parse_errors, DeviceError},
    serial::{open_port, PortSettings},
    status::{Position, StatusFlags},
    stream::{CommunicationChannel, SerialChannel},
    ProtocolError, DEFAULT_TIMEOUT_MS, MAX_FRAME_LEN,
};

/// How a non-query command is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// The controller answers every line; any non-error reply acknowledges
    Reply,
    /// The controller is silent after writes; follow each write with
    /// `<axis>ERR?` and treat an empty error report as the acknowledgement
    ErrorQuery,
}

/// Phase of the transaction currently running on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// No transaction in flight
    Idle,
    /// Command bytes written
    Sent,
    /// Polling for the reply frame
    AwaitingReply,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Line settings
    pub settings: PortSettings,
    /// Reply timeout in milliseconds
    pub timeout_ms: u64,
    /// How writes are acknowledged
    pub ack_policy: AckPolicy,
    /// Extra attempts for a query that timed out. Writes are never retried.
    pub query_retries: u8,
    /// Longest reply line accepted
    pub max_frame_len: usize,
    /// Sleep between polls of the input buffer, in milliseconds
    pub poll_interval_ms: u64,
    /// Sleep between status/position checks while waiting on a move, in
    /// milliseconds
    pub motion_poll_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            settings: PortSettings::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ack_policy: AckPolicy::ErrorQuery,
            query_retries: 0,
            max_frame_len: MAX_FRAME_LEN,
            poll_interval_ms: 2,
            motion_poll_ms: 100,
        }
    }
}

impl ConnectionConfig {
    /// Default settings for the named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Reply timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// FIFO admission for transactions
struct TicketQueue {
    next: AtomicU64,
    serving: Mutex<u64>,
    turn: Condvar,
}

struct Turn<'a> {
    queue: &'a TicketQueue,
}

impl TicketQueue {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            serving: Mutex::new(0),
            turn: Condvar::new(),
        }
    }

    /// Block until every earlier caller has finished
    fn enter(&self) -> Turn<'_> {
        let ticket = self.next.fetch_add(1, Ordering::SeqCst);
        let mut serving = self.serving.lock();
        while *serving != ticket {
            self.turn.wait(&mut serving);
        }
        Turn { queue: self }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut serving = self.queue.serving.lock();
        *serving += 1;
        self.queue.turn.notify_all();
    }
}

/// Transport plus the receive-side state that belongs with it
struct Link {
    channel: Option<Box<dyn CommunicationChannel>>,
    accumulator: LineAccumulator,
    tx_bytes: u64,
    rx_bytes: u64,
    tx_frames: u64,
    rx_frames: u64,
}

/// Open handle to a controller chain
pub struct Connection {
    config: ConnectionConfig,
    queue: TicketQueue,
    link: Mutex<Link>,
    state: Mutex<TransactionState>,
}

impl Connection {
    /// Open the configured serial port
    pub fn open(config: ConnectionConfig) -> Result<Self, ProtocolError> {
        Self::open_with(config, |name, settings| {
            let port = open_port(name, settings)?;
            Ok(Box::new(SerialChannel::new(port)) as Box<dyn CommunicationChannel>)
        })
    }

    /// Open the configured port through a caller-supplied opener
    pub fn open_with<F>(config: ConnectionConfig, opener: F) -> Result<Self, ProtocolError>
    where
        F: FnOnce(&str, &PortSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError>,
    {
        if config.port_name.trim().is_empty() {
            return Err(ProtocolError::PortUnavailable {
                port: config.port_name.clone(),
                reason: "no port name given".to_string(),
            });
        }
        let channel = opener(&config.port_name, &config.settings).inspect_err(|e| {
            warn!(port = %config.port_name, error = %e, "failed to open port");
        })?;
        info!(
            port = %config.port_name,
            baud = config.settings.baud_rate,
            "connection opened"
        );
        Ok(Self::with_channel(config, channel))
    }

    /// Wrap an already open channel
    pub fn with_channel(config: ConnectionConfig, channel: Box<dyn CommunicationChannel>) -> Self {
        let accumulator = LineAccumulator::new(config.max_frame_len);
        Self {
            config,
            queue: TicketQueue::new(),
            link: Mutex::new(Link {
                channel: Some(channel),
                accumulator,
                tx_bytes: 0,
                rx_bytes: 0,
                tx_frames: 0,
                rx_frames: 0,
            }),
            state: Mutex::new(TransactionState::Idle),
        }
    }

    /// Name of the port this connection was opened on
    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    /// Settings the connection was opened with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether `close` has not been called yet
    pub fn is_open(&self) -> bool {
        self.link.lock().channel.is_some()
    }

    /// Phase of the transaction in flight, `Idle` between transactions
    pub fn transaction_state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Get cumulative tx/rx bytes and frame counters
    pub fn get_counters(&self) -> (u64, u64, u64, u64) {
        let link = self.link.lock();
        (link.tx_bytes, link.rx_bytes, link.tx_frames, link.rx_frames)
    }

    /// Release the port. Closing an already closed connection does nothing.
    pub fn close(&self) {
        let _turn = self.queue.enter();
        let mut link = self.link.lock();
        match link.channel.take() {
            Some(_) => {
                link.accumulator.clear();
                info!(port = %self.config.port_name, "connection closed");
            }
            None => debug!(port = %self.config.port_name, "close on closed connection ignored"),
        }
    }

    /// Send a write-form command given as text (e.g. `MVA-5`) and wait for
    /// its acknowledgement. Queries are rejected; use [`poll_values`].
    ///
    /// Under [`AckPolicy::ErrorQuery`] the acknowledgement reads the whole
    /// error queue of the axis, so errors raised before this write are
    /// reported with it.
    ///
    /// [`poll_values`]: Connection::poll_values
    pub fn write_command(&self, axis: Axis, text: &str) -> Result<(), ProtocolError> {
        let command = Command::parse(axis, text)?;
        if command.is_query() {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} is a query; poll it instead of writing it",
                command
            )));
        }
        self.send(&command).map(|_| ())
    }

    /// Send the read form of a mnemonic (`VER`, `pos?`, ...) and return the
    /// reply payload
    pub fn poll_values(&self, axis: Axis, mnemonic: &str) -> Result<String, ProtocolError> {
        let mnemonic: Mnemonic = mnemonic.trim().trim_end_matches('?').parse()?;
        let command = Command::query(axis, mnemonic)?;
        match self.send(&command)? {
            Response::QueryResult(payload) => Ok(payload),
            Response::Acknowledgement => Err(ProtocolError::MalformedResponse(format!(
                "no payload in reply to {}",
                command
            ))),
        }
    }

    /// Run one command as a single transaction
    pub fn send(&self, command: &Command) -> Result<Response, ProtocolError> {
        if command.is_query() && command.axis().is_global() {
            return Err(ProtocolError::InvalidCommand(format!(
                "{}: axis 0 cannot be read",
                command
            )));
        }

        let _turn = self.queue.enter();
        let mut link = self.link.lock();

        let attempts = if command.is_query() {
            1 + u32::from(self.config.query_retries)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            let result = self.exchange(&mut link, command);
            self.set_state(TransactionState::Idle);
            match result {
                Err(ProtocolError::Timeout) if attempt < attempts => {
                    warn!(command = %command, attempt, "query timed out, retrying");
                    attempt += 1;
                }
                Err(ProtocolError::Timeout) if command.mnemonic().is_motion() => {
                    warn!(command = %command, "motion command unconfirmed, not resending");
                    return Err(ProtocolError::Timeout);
                }
                other => return other,
            }
        }
    }

    /// Current theoretical and encoder position
    pub fn read_position(&self, axis: Axis) -> Result<Position, ProtocolError> {
        Position::parse(&self.poll_values(axis, "POS")?)
    }

    /// Status byte of an axis
    pub fn read_status(&self, axis: Axis) -> Result<StatusFlags, ProtocolError> {
        StatusFlags::parse(&self.poll_values(axis, "STA")?)
    }

    /// Firmware version string
    pub fn read_version(&self, axis: Axis) -> Result<String, ProtocolError> {
        self.poll_values(axis, "VER")
    }

    /// Read and clear the error queue of an axis
    pub fn read_errors(&self, axis: Axis) -> Result<Vec<DeviceError>, ProtocolError> {
        let _turn = self.queue.enter();
        let mut link = self.link.lock();
        let result = self.error_report(&mut link, axis);
        self.set_state(TransactionState::Idle);
        result
    }

    /// Poll `POS?` until the encoder reading is within `tolerance` of
    /// `target`, or fail with `Timeout` once `timeout` has passed. Each check
    /// is its own transaction, so other callers are served in between.
    pub fn wait_for_position(
        &self,
        axis: Axis,
        target: f64,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<Position, ProtocolError> {
        if !target.is_finite() || !(tolerance >= 0.0 && tolerance.is_finite()) {
            return Err(ProtocolError::InvalidCommand(format!(
                "cannot wait for position {} with tolerance {}",
                target, tolerance
            )));
        }
        self.poll_until(timeout, || {
            let position = self.read_position(axis)?;
            debug!(axis = %axis, target, encoder = position.encoder, "position check");
            Ok(((position.encoder - target).abs() <= tolerance).then_some(position))
        })
    }

    /// Poll `STA?` until the stage reports stopped
    pub fn wait_for_stop(&self, axis: Axis, timeout: Duration) -> Result<StatusFlags, ProtocolError> {
        self.poll_until(timeout, || {
            let status = self.read_status(axis)?;
            Ok(status.is_stopped().then_some(status))
        })
    }

    /// Stop every axis on the chain (`0STP`). Global commands draw no reply,
    /// so this returns once the line is transmitted.
    pub fn stop_all(&self) -> Result<(), ProtocolError> {
        let command = Command::write(Axis::GLOBAL, Mnemonic::Stp, None)?;
        self.send(&command).map(|_| ())
    }

    fn poll_until<T, F>(&self, timeout: Duration, mut check: F) -> Result<T, ProtocolError>
    where
        F: FnMut() -> Result<Option<T>, ProtocolError>,
    {
        let interval = Duration::from_millis(self.config.motion_poll_ms);
        let start = Instant::now();
        loop {
            if let Some(value) = check()? {
                return Ok(value);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(
                    port = %self.config.port_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "axis did not settle before deadline"
                );
                return Err(ProtocolError::Timeout);
            }
            std::thread::sleep(interval.min(timeout - elapsed));
        }
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Write, then collect and classify the reply
    fn exchange(&self, link: &mut Link, command: &Command) -> Result<Response, ProtocolError> {
        self.transmit(link, command)?;

        if command.axis().is_global() && !command.is_query() {
            debug!(command = %command, "global write, no reply expected");
            return Ok(Response::Acknowledgement);
        }

        if !command.is_query() && self.config.ack_policy == AckPolicy::ErrorQuery {
            return match self.error_report(link, command.axis())? {
                errors if errors.is_empty() => Ok(Response::Acknowledgement),
                errors => Err(ProtocolError::DeviceError(errors)),
            };
        }

        let frame = self.receive(link)?;
        let response = codec::decode(&frame, command);
        match &response {
            Ok(Response::QueryResult(payload)) => {
                debug!(command = %command, payload = %payload, "query answered")
            }
            Ok(Response::Acknowledgement) => debug!(command = %command, "acknowledged"),
            Err(e) => warn!(command = %command, kind = e.kind(), error = %e, "command failed"),
        }
        response
    }

    /// Send `<axis>ERR?` and parse whatever errors come back
    fn error_report(&self, link: &mut Link, axis: Axis) -> Result<Vec<DeviceError>, ProtocolError> {
        let query = Command::query(axis, Mnemonic::Err)?;
        self.transmit(link, &query)?;
        let frame = self.receive(link)?;
        let text = codec::frame_text(&frame)?;
        if contains_errors(text) {
            let errors = parse_errors(text);
            if errors.is_empty() {
                return Err(ProtocolError::MalformedResponse(format!(
                    "unparseable error report '{}'",
                    text
                )));
            }
            for error in &errors {
                warn!(
                    axis = %axis,
                    code = error.code.code(),
                    mnemonic = %error.mnemonic,
                    message = %error.message,
                    resend = error.code.should_resend(),
                    "controller error"
                );
            }
            return Ok(errors);
        }
        Ok(Vec::new())
    }

    fn transmit(&self, link: &mut Link, command: &Command) -> Result<(), ProtocolError> {
        let bytes = codec::encode(command);
        let channel = link.channel.as_mut().ok_or(ProtocolError::NotConnected)?;

        // Stale bytes would be mistaken for this command's reply
        if let Err(e) = channel.clear_input_buffer() {
            debug!(error = %e, "failed to clear input before send");
        }
        link.accumulator.clear();

        channel.write_all(&bytes)?;
        channel.flush()?;
        link.tx_bytes = link.tx_bytes.saturating_add(bytes.len() as u64);
        link.tx_frames = link.tx_frames.saturating_add(1);
        self.set_state(TransactionState::Sent);
        debug!(port = %self.config.port_name, command = %command, "sent");
        Ok(())
    }

    /// Poll the channel until a full reply frame arrives or the timeout
    /// elapses. On timeout the input side is flushed so a late reply cannot
    /// leak into the next transaction.
    fn receive(&self, link: &mut Link) -> Result<Vec<u8>, ProtocolError> {
        self.set_state(TransactionState::AwaitingReply);
        let timeout = self.config.timeout();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let start = Instant::now();
        let mut buffer = [0u8; 256];

        loop {
            if let Some(frame) = link.accumulator.next_frame()? {
                link.rx_frames = link.rx_frames.saturating_add(1);
                debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    frame = %String::from_utf8_lossy(&frame).trim(),
                    "received"
                );
                return Ok(frame);
            }

            if start.elapsed() >= timeout {
                warn!(
                    port = %self.config.port_name,
                    timeout_ms = self.config.timeout_ms,
                    partial = link.accumulator.pending(),
                    "timed out waiting for reply"
                );
                link.accumulator.clear();
                if let Some(channel) = link.channel.as_mut() {
                    if let Err(e) = channel.clear_input_buffer() {
                        debug!(error = %e, "failed to flush input after timeout");
                    }
                }
                return Err(ProtocolError::Timeout);
            }

            let channel = link.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
            let available = channel
                .bytes_to_read()
                .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
            if available == 0 {
                std::thread::sleep(poll_interval);
                continue;
            }

            let to_read = std::cmp::min(available as usize, buffer.len());
            match channel.read(&mut buffer[..to_read]) {
                Ok(0) => std::thread::sleep(poll_interval),
                Ok(n) => {
                    link.rx_bytes = link.rx_bytes.saturating_add(n as u64);
                    link.accumulator.push(&buffer[..n]);
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(_channel) = self.link.get_mut().channel.take() {
            debug!(port = %self.config.port_name, "connection dropped while open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    /// Replies with canned frames, one per received line
    struct ScriptedChannel {
        replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pending: Vec<u8>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedChannel {
        fn new(replies: &[&[u8]]) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let channel = Self {
                replies: Arc::new(Mutex::new(replies.iter().map(|r| r.to_vec()).collect())),
                pending: Vec::new(),
                written: written.clone(),
            };
            (channel, written)
        }
    }

    impl Read for ScriptedChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().extend_from_slice(buf);
            if buf.contains(&b'\n') {
                if let Some(reply) = self.replies.lock().pop_front() {
                    self.pending.extend_from_slice(&reply);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for ScriptedChannel {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn clear_output_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            Ok(self.pending.len() as u32)
        }
    }

    fn connection(replies: &[&[u8]], policy: AckPolicy) -> (Connection, Arc<Mutex<Vec<u8>>>) {
        let (channel, written) = ScriptedChannel::new(replies);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 50,
            ack_policy: policy,
            ..ConnectionConfig::default()
        };
        (Connection::with_channel(config, Box::new(channel)), written)
    }

    fn axis1() -> Axis {
        Axis::new(1).unwrap()
    }

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.settings.baud_rate, super::super::DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.ack_policy, AckPolicy::ErrorQuery);
    }

    #[test]
    fn test_poll_values() {
        let (conn, written) = connection(&[b"#v1.2.3\r\n"], AckPolicy::Reply);
        assert_eq!(conn.poll_values(axis1(), "VER").unwrap(), "v1.2.3");
        assert_eq!(written.lock().as_slice(), b"1VER?\n\r");
        assert_eq!(conn.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_write_with_reply_ack() {
        let (conn, written) = connection(&[b"#\r\n"], AckPolicy::Reply);
        conn.write_command(axis1(), "MVA-5").unwrap();
        assert_eq!(written.lock().as_slice(), b"1MVA-5\n\r");
    }

    #[test]
    fn test_write_with_error_query_ack() {
        // MVA draws no reply; ERR? answers with an empty report
        let (conn, written) = connection(&[b"", b"#\r\n"], AckPolicy::ErrorQuery);
        conn.write_command(axis1(), "MVA-5").unwrap();
        assert_eq!(written.lock().as_slice(), b"1MVA-5\n\r1ERR?\n\r");
    }

    #[test]
    fn test_write_reports_device_error() {
        let (conn, _) = connection(
            &[b"", b"#Error 37 - MVA - Move Outside Soft Limits\r\n"],
            AckPolicy::ErrorQuery,
        );
        let err = conn.write_command(axis1(), "MVA-500").unwrap_err();
        assert!(matches!(err, ProtocolError::DeviceError(ref e) if e.len() == 1));
    }

    #[test]
    fn test_write_rejects_query() {
        let (conn, written) = connection(&[], AckPolicy::Reply);
        let err = conn.write_command(axis1(), "sta?").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCommand(_)));
        assert!(written.lock().is_empty());
    }

    #[test]
    fn test_poll_timeout() {
        let (conn, _) = connection(&[], AckPolicy::Reply);
        let err = conn.poll_values(axis1(), "POS").unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
        assert_eq!(conn.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_query_retry_after_timeout() {
        let (channel, written) = ScriptedChannel::new(&[b"", b"#8\r\n"]);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 30,
            query_retries: 1,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_channel(config, Box::new(channel));
        assert!(conn.read_status(axis1()).unwrap().is_stopped());
        assert_eq!(written.lock().as_slice(), b"1STA?\n\r1STA?\n\r");
    }

    #[test]
    fn test_motion_never_retried() {
        let (channel, written) = ScriptedChannel::new(&[b"", b"#\r\n"]);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 30,
            ack_policy: AckPolicy::Reply,
            query_retries: 3,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_channel(config, Box::new(channel));
        assert!(matches!(
            conn.write_command(axis1(), "MVR1"),
            Err(ProtocolError::Timeout)
        ));
        assert_eq!(written.lock().as_slice(), b"1MVR1\n\r");
    }

    #[test]
    fn test_stop_all_does_not_wait() {
        let (conn, written) = connection(&[], AckPolicy::ErrorQuery);
        conn.stop_all().unwrap();
        assert_eq!(written.lock().as_slice(), b"0STP\n\r");
    }

    #[test]
    fn test_partial_reply_discarded_after_timeout() {
        let (conn, _) = connection(&[b"#v1.", b"#v1.2.3\r\n"], AckPolicy::Reply);
        assert!(matches!(
            conn.poll_values(axis1(), "VER"),
            Err(ProtocolError::Timeout)
        ));
        assert_eq!(conn.link.lock().accumulator.pending(), 0);
        assert_eq!(conn.poll_values(axis1(), "VER").unwrap(), "v1.2.3");
    }

    #[test]
    fn test_oversized_reply_is_malformed() {
        let (channel, _) = ScriptedChannel::new(&[b"#0123456789abcdef\r\n"]);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 50,
            max_frame_len: 8,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_channel(config, Box::new(channel));
        assert!(matches!(
            conn.poll_values(axis1(), "VER"),
            Err(ProtocolError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_wait_for_stop() {
        let (channel, written) = ScriptedChannel::new(&[b"#32\r\n", b"#16\r\n", b"#8\r\n"]);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 50,
            motion_poll_ms: 1,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_channel(config, Box::new(channel));
        let status = conn.wait_for_stop(axis1(), Duration::from_secs(2)).unwrap();
        assert!(status.is_stopped());
        assert_eq!(written.lock().as_slice(), b"1STA?\n\r1STA?\n\r1STA?\n\r");
    }

    #[test]
    fn test_wait_for_stop_deadline() {
        let busy: Vec<&[u8]> = vec![&b"#32\r\n"[..]; 500];
        let (channel, _) = ScriptedChannel::new(&busy);
        let config = ConnectionConfig {
            port_name: "mock".to_string(),
            timeout_ms: 50,
            motion_poll_ms: 5,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_channel(config, Box::new(channel));
        assert!(matches!(
            conn.wait_for_stop(axis1(), Duration::from_millis(40)),
            Err(ProtocolError::Timeout)
        ));
        assert_eq!(conn.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_wait_for_position_rejects_bad_tolerance() {
        let (conn, written) = connection(&[], AckPolicy::Reply);
        assert!(matches!(
            conn.wait_for_position(axis1(), 1.0, -0.1, Duration::from_millis(10)),
            Err(ProtocolError::InvalidCommand(_))
        ));
        assert!(written.lock().is_empty());
    }

    #[test]
    fn test_global_query_rejected() {
        let (conn, written) = connection(&[], AckPolicy::Reply);
        assert!(matches!(
            conn.poll_values(Axis::GLOBAL, "VER"),
            Err(ProtocolError::InvalidCommand(_))
        ));
        assert!(written.lock().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (conn, _) = connection(&[], AckPolicy::Reply);
        assert!(conn.is_open());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(matches!(
            conn.poll_values(axis1(), "VER"),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_open_with_empty_name() {
        let result = Connection::open_with(ConnectionConfig::default(), |_, _| {
            panic!("opener must not run without a port name")
        });
        assert!(matches!(result, Err(ProtocolError::PortUnavailable { .. })));
    }

    #[test]
    fn test_counters() {
        let (conn, _) = connection(&[b"#v1\r\n"], AckPolicy::Reply);
        conn.poll_values(axis1(), "VER").unwrap();
        let (tx_bytes, rx_bytes, tx_frames, rx_frames) = conn.get_counters();
        assert_eq!(tx_bytes, 7);
        assert_eq!(rx_bytes, 5);
        assert_eq!(tx_frames, 1);
        assert_eq!(rx_frames, 1);
    }
}
