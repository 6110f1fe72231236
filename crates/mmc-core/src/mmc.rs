//! Tolerant caller surface
//!
//! [`Mmc`] mirrors the call pattern of the vendor example programs: open a
//! port, fire writes that report plain success, poll values as strings,
//! close. Failures never propagate out of `write_command`/`poll_values`;
//! they degrade to `false`/empty string and are logged with their kind.
//!
//! ```rust,ignore
//! let mmc = Mmc::open("COM4")?;
//! let version = mmc.poll_values("1", "VER");
//! let moved = mmc.write_command("1", "MVA-5");
//! mmc.close();
//! ```

use tracing::{error, warn};

use crate::protocol::{
    Axis, CommunicationChannel, Connection, ConnectionConfig, PortSettings, ProtocolError,
};

/// Explicitly owned handle to one controller chain
pub struct Mmc {
    connection: Connection,
}

impl Mmc {
    /// Open a port with default MMC settings
    pub fn open(port_name: &str) -> Result<Self, ProtocolError> {
        Self::open_with_config(ConnectionConfig::for_port(port_name))
    }

    /// Open a port with explicit settings
    pub fn open_with_config(config: ConnectionConfig) -> Result<Self, ProtocolError> {
        Connection::open(config).map(Self::from_connection)
    }

    /// Open through a caller-supplied transport opener (simulators, bridges)
    pub fn open_with<F>(config: ConnectionConfig, opener: F) -> Result<Self, ProtocolError>
    where
        F: FnOnce(&str, &PortSettings) -> Result<Box<dyn CommunicationChannel>, ProtocolError>,
    {
        Connection::open_with(config, opener).map(Self::from_connection)
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying connection, for typed queries
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a write-form command. `true` only when the controller accepted it.
    pub fn write_command(&self, axis: &str, command: &str) -> bool {
        let result = axis
            .parse::<Axis>()
            .and_then(|axis| self.connection.write_command(axis, command));
        match result {
            Ok(()) => true,
            Err(e) => {
                log_failure("write_command", axis, command, &e);
                false
            }
        }
    }

    /// Poll a value. Empty string when the controller did not answer.
    pub fn poll_values(&self, axis: &str, mnemonic: &str) -> String {
        let result = axis
            .parse::<Axis>()
            .and_then(|axis| self.connection.poll_values(axis, mnemonic));
        match result {
            Ok(payload) => payload,
            Err(e) => {
                log_failure("poll_values", axis, mnemonic, &e);
                String::new()
            }
        }
    }

    /// Release the port. Safe to call more than once.
    pub fn close(&self) {
        self.connection.close();
    }
}

fn log_failure(operation: &str, axis: &str, command: &str, e: &ProtocolError) {
    match e {
        ProtocolError::Timeout | ProtocolError::DeviceError(_) | ProtocolError::InvalidCommand(_) => {
            warn!(operation, axis, command, kind = e.kind(), error = %e, "controller call failed")
        }
        _ => error!(operation, axis, command, kind = e.kind(), error = %e, "controller call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckPolicy;
    use crate::sim::SimulatedController;

    fn simulated(sim: &SimulatedController) -> Mmc {
        let sim = sim.clone();
        let config = ConnectionConfig {
            timeout_ms: 100,
            ..ConnectionConfig::for_port("SIM")
        };
        Mmc::open_with(config, move |_, _| Ok(Box::new(sim))).unwrap()
    }

    #[test]
    fn test_degrades_to_defaults() {
        let sim = SimulatedController::new(1);
        let mmc = simulated(&sim);
        assert!(!mmc.write_command("x", "MVA1"));
        assert!(!mmc.write_command("1", "QQQ1"));
        assert_eq!(mmc.poll_values("1", "MVA"), "");
        sim.set_silent(true);
        assert_eq!(mmc.poll_values("1", "VER"), "");
    }

    #[test]
    fn test_write_query_rejected() {
        let sim = SimulatedController::new(1);
        let mmc = simulated(&sim);
        assert!(!mmc.write_command("1", "sta?"));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_reply_policy_against_replying_sim() {
        let sim = SimulatedController::new(1).replying_to_writes();
        let sim_for_port = sim.clone();
        let config = ConnectionConfig {
            timeout_ms: 100,
            ack_policy: AckPolicy::Reply,
            ..ConnectionConfig::for_port("SIM")
        };
        let mmc = Mmc::open_with(config, move |_, _| Ok(Box::new(sim_for_port))).unwrap();
        assert!(mmc.write_command("1", "MVR2"));
        assert!(!mmc.write_command("1", "MVA99"));
        assert_eq!(sim.position(1), Some(2.0));
    }
}
