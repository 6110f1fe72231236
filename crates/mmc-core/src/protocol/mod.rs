//! Serial Protocol Communication
//!
//! Implements the line-oriented ASCII protocol spoken by Micronix MMC
//! motion controllers: axis-prefixed commands out, `#`-prefixed replies back.

pub mod codec;
pub mod commands;
mod connection;
pub mod device_error;
mod error;
pub mod serial;
pub mod status;
pub mod stream;

pub use codec::{decode, encode, LineAccumulator, Response};
pub use commands::{Axis, Command, Mnemonic};
pub use connection::{AckPolicy, Connection, ConnectionConfig, TransactionState};
pub use device_error::{DeviceError, ErrorCode};
pub use error::ProtocolError;
pub use serial::{list_ports, open_port, PortInfo, PortSettings};
pub use status::{Position, StatusFlags};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default baud rate of the MMC series
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Default timeout for replies in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Longest reply line accepted before the frame is declared malformed
pub const MAX_FRAME_LEN: usize = 256;

/// Terminator written after every command line
pub const COMMAND_TERMINATOR: &[u8] = b"\n\r";

/// First character of every controller reply
pub const REPLY_MARKER: char = '#';
