//! # MMC Core Library
//!
//! Serial command/response engine for Micronix MMC motion controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port management (enumeration, open/close, line settings)
//! - The MMC command codec (axis-prefixed ASCII lines, `#` replies)
//! - A transaction engine that serializes command/reply exchanges per port
//! - Parsing of controller error, status and position replies
//! - A simulated controller chain for tests and dry runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use mmc_core::protocol::{Axis, Connection, ConnectionConfig};
//!
//! let conn = Connection::open(ConnectionConfig::for_port("COM4"))?;
//! let axis = Axis::new(1)?;
//!
//! println!("firmware: {}", conn.read_version(axis)?);
//! conn.write_command(axis, "MVA-5")?;
//! println!("position: {:?}", conn.read_position(axis)?);
//! conn.close();
//! ```

pub mod config;
pub mod mmc;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ConfigError;
    pub use crate::mmc::Mmc;
    pub use crate::protocol::{
        AckPolicy, Axis, Command, Connection, ConnectionConfig, Mnemonic, Position,
        ProtocolError, Response, StatusFlags,
    };
    pub use crate::sim::SimulatedController;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
