//! Typed views over `STA?` and `POS?` replies

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// Status byte reported by `STA?`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusFlags(u8);

impl StatusFlags {
    /// Negative limit switch active
    pub const NEGATIVE_SWITCH: u8 = 1 << 0;
    /// Positive limit switch active
    pub const POSITIVE_SWITCH: u8 = 1 << 1;
    /// A stored program is executing
    pub const PROGRAM_RUNNING: u8 = 1 << 2;
    /// Stage is not moving
    pub const STAGE_STOPPED: u8 = 1 << 3;
    /// Decelerating
    pub const DECELERATING: u8 = 1 << 4;
    /// Cruising at constant velocity
    pub const CONSTANT_VELOCITY: u8 = 1 << 5;
    /// Accelerating
    pub const ACCELERATING: u8 = 1 << 6;
    /// Errors are queued; read them with `ERR?`
    pub const ERRORS_PENDING: u8 = 1 << 7;

    /// Wrap a raw status byte
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw status byte
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Parse the decimal status byte payload (e.g. `"8"`)
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        payload
            .trim()
            .trim_start_matches('#')
            .parse::<u8>()
            .map(Self)
            .map_err(|_| ProtocolError::MalformedResponse(format!("invalid status byte '{}'", payload)))
    }

    fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Negative limit switch tripped
    pub fn negative_limit(&self) -> bool {
        self.has(Self::NEGATIVE_SWITCH)
    }

    /// Positive limit switch tripped
    pub fn positive_limit(&self) -> bool {
        self.has(Self::POSITIVE_SWITCH)
    }

    /// A stored program is executing
    pub fn program_running(&self) -> bool {
        self.has(Self::PROGRAM_RUNNING)
    }

    /// Stage reports stopped
    pub fn is_stopped(&self) -> bool {
        self.has(Self::STAGE_STOPPED)
    }

    /// In any of the accelerating, cruising or decelerating phases
    pub fn is_moving(&self) -> bool {
        self.has(Self::ACCELERATING) || self.has(Self::CONSTANT_VELOCITY) || self.has(Self::DECELERATING)
    }

    /// Errors are waiting in the controller's queue
    pub fn has_errors(&self) -> bool {
        self.has(Self::ERRORS_PENDING)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08b}", self.0)
    }
}

/// Position reported by `POS?`: commanded and encoder-measured
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Commanded position
    pub theoretical: f64,
    /// Encoder reading
    pub encoder: f64,
}

impl Position {
    /// Parse `"<theoretical>,<encoder>"`. A single value sets both fields.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedResponse(format!("invalid position '{}'", payload));
        let mut parts = payload.trim().trim_start_matches('#').split(',');

        let theoretical = parts
            .next()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(malformed)?;
        let encoder = match parts.next() {
            Some(s) => s.trim().parse::<f64>().map_err(|_| malformed())?,
            None => theoretical,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            theoretical,
            encoder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let status = StatusFlags::parse("8").unwrap();
        assert!(status.is_stopped());
        assert!(!status.is_moving());
        assert!(!status.has_errors());

        let status = StatusFlags::parse("#160").unwrap();
        assert!(status.has_errors());
        assert!(status.is_moving());
        assert_eq!(status.to_string(), "10100000");
    }

    #[test]
    fn test_status_invalid() {
        assert!(StatusFlags::parse("abc").is_err());
        assert!(StatusFlags::parse("256").is_err());
    }

    #[test]
    fn test_position_parse() {
        let pos = Position::parse("-5.000000,-4.999800").unwrap();
        assert_eq!(pos.theoretical, -5.0);
        assert_eq!(pos.encoder, -4.9998);

        let pos = Position::parse("12.5").unwrap();
        assert_eq!(pos.encoder, 12.5);

        assert!(Position::parse("").is_err());
        assert!(Position::parse("1,2,3").is_err());
        assert!(Position::parse("1,x").is_err());
    }
}
