//! Protocol commands
//!
//! Defines the axis identifiers, mnemonics and command values understood by
//! the MMC controller family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// Highest axis number addressable on one serial chain
pub const MAX_AXIS: u8 = 99;

/// Axis identifier. Axis `0` addresses every controller on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Axis(u8);

impl Axis {
    /// The global (broadcast) axis
    pub const GLOBAL: Axis = Axis(0);

    /// Axis `number`, failing with `InvalidCommand` above 99
    pub fn new(number: u8) -> Result<Self, ProtocolError> {
        if number > MAX_AXIS {
            return Err(ProtocolError::InvalidCommand(format!(
                "axis {} out of range 0..={}",
                number, MAX_AXIS
            )));
        }
        Ok(Self(number))
    }

    /// Numeric address on the chain
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Axis 0 addresses every controller
    pub fn is_global(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Axis {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidCommand(format!("invalid axis '{}'", s)));
        }
        let number = trimmed
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidCommand(format!("invalid axis '{}'", s)))?;
        Axis::new(number)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command mnemonics supported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    /// Acceleration
    Acc,
    /// Deceleration
    Dec,
    /// Restore factory defaults
    Def,
    /// Erase program
    Era,
    /// Read and clear errors
    Err,
    /// Emergency stop
    Est,
    /// Execute program
    Exc,
    /// Feedback mode
    Fbk,
    /// Home to index
    Hom,
    /// Jog
    Jog,
    /// Move to negative limit
    Mln,
    /// Move to positive limit
    Mlp,
    /// Motor enable
    Mot,
    /// Move absolute
    Mva,
    /// Move relative
    Mvr,
    /// Begin program recording
    Pgm,
    /// End program recording
    End,
    /// Read position
    Pos,
    /// Reset controller
    Rst,
    /// Save settings
    Sav,
    /// Status byte
    Sta,
    /// Stop motion
    Stp,
    /// Soft limit, negative
    Tln,
    /// Soft limit, positive
    Tlp,
    /// Velocity
    Vel,
    /// Firmware version
    Ver,
    /// Maximum velocity
    Vmx,
    /// Wait for stop
    Wst,
    /// Wait for time
    Wtm,
    /// Zero position
    Zro,
}

impl Mnemonic {
    /// Every known mnemonic
    pub const ALL: [Mnemonic; 30] = [
        Mnemonic::Acc,
        Mnemonic::Dec,
        Mnemonic::Def,
        Mnemonic::Era,
        Mnemonic::Err,
        Mnemonic::Est,
        Mnemonic::Exc,
        Mnemonic::Fbk,
        Mnemonic::Hom,
        Mnemonic::Jog,
        Mnemonic::Mln,
        Mnemonic::Mlp,
        Mnemonic::Mot,
        Mnemonic::Mva,
        Mnemonic::Mvr,
        Mnemonic::Pgm,
        Mnemonic::End,
        Mnemonic::Pos,
        Mnemonic::Rst,
        Mnemonic::Sav,
        Mnemonic::Sta,
        Mnemonic::Stp,
        Mnemonic::Tln,
        Mnemonic::Tlp,
        Mnemonic::Vel,
        Mnemonic::Ver,
        Mnemonic::Vmx,
        Mnemonic::Wst,
        Mnemonic::Wtm,
        Mnemonic::Zro,
    ];

    /// Three-letter wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Mnemonic::Acc => "ACC",
            Mnemonic::Dec => "DEC",
            Mnemonic::Def => "DEF",
            Mnemonic::Era => "ERA",
            Mnemonic::Err => "ERR",
            Mnemonic::Est => "EST",
            Mnemonic::Exc => "EXC",
            Mnemonic::Fbk => "FBK",
            Mnemonic::Hom => "HOM",
            Mnemonic::Jog => "JOG",
            Mnemonic::Mln => "MLN",
            Mnemonic::Mlp => "MLP",
            Mnemonic::Mot => "MOT",
            Mnemonic::Mva => "MVA",
            Mnemonic::Mvr => "MVR",
            Mnemonic::Pgm => "PGM",
            Mnemonic::End => "END",
            Mnemonic::Pos => "POS",
            Mnemonic::Rst => "RST",
            Mnemonic::Sav => "SAV",
            Mnemonic::Sta => "STA",
            Mnemonic::Stp => "STP",
            Mnemonic::Tln => "TLN",
            Mnemonic::Tlp => "TLP",
            Mnemonic::Vel => "VEL",
            Mnemonic::Ver => "VER",
            Mnemonic::Vmx => "VMX",
            Mnemonic::Wst => "WST",
            Mnemonic::Wtm => "WTM",
            Mnemonic::Zro => "ZRO",
        }
    }

    /// Mnemonics that only exist in read form
    pub fn is_query_only(&self) -> bool {
        matches!(
            self,
            Mnemonic::Err | Mnemonic::Pos | Mnemonic::Sta | Mnemonic::Ver
        )
    }

    /// Whether the `?` read form is accepted
    pub fn is_readable(&self) -> bool {
        self.is_query_only()
            || matches!(
                self,
                Mnemonic::Acc
                    | Mnemonic::Dec
                    | Mnemonic::Fbk
                    | Mnemonic::Mot
                    | Mnemonic::Tln
                    | Mnemonic::Tlp
                    | Mnemonic::Vel
                    | Mnemonic::Vmx
            )
    }

    /// Commands that physically move the stage
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Mnemonic::Mva
                | Mnemonic::Mvr
                | Mnemonic::Mln
                | Mnemonic::Mlp
                | Mnemonic::Hom
                | Mnemonic::Jog
                | Mnemonic::Exc
        )
    }

    /// Whether the command needs a numeric argument in write form
    pub fn requires_argument(&self) -> bool {
        matches!(
            self,
            Mnemonic::Acc
                | Mnemonic::Dec
                | Mnemonic::Fbk
                | Mnemonic::Jog
                | Mnemonic::Mva
                | Mnemonic::Mvr
                | Mnemonic::Tln
                | Mnemonic::Tlp
                | Mnemonic::Vel
                | Mnemonic::Vmx
                | Mnemonic::Wtm
        )
    }
}

impl FromStr for Mnemonic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, ProtocolError> {
        let upper = s.trim().to_ascii_uppercase();
        Mnemonic::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| ProtocolError::InvalidCommand(format!("unknown mnemonic '{}'", s)))
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single addressed controller command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    axis: Axis,
    mnemonic: Mnemonic,
    argument: Option<f64>,
    query: bool,
}

impl Command {
    /// Build a write-form command
    pub fn write(axis: Axis, mnemonic: Mnemonic, argument: Option<f64>) -> Result<Self, ProtocolError> {
        if mnemonic.is_query_only() {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} is read-only",
                mnemonic
            )));
        }
        match argument {
            None if mnemonic.requires_argument() => {
                return Err(ProtocolError::InvalidCommand(format!(
                    "{} requires an argument",
                    mnemonic
                )));
            }
            Some(value) if !value.is_finite() => {
                return Err(ProtocolError::InvalidCommand(format!(
                    "{} argument must be finite",
                    mnemonic
                )));
            }
            _ => {}
        }
        Ok(Self {
            axis,
            mnemonic,
            argument,
            query: false,
        })
    }

    /// Build the read form of a mnemonic
    pub fn query(axis: Axis, mnemonic: Mnemonic) -> Result<Self, ProtocolError> {
        if !mnemonic.is_readable() {
            return Err(ProtocolError::InvalidCommand(format!(
                "{} has no read form",
                mnemonic
            )));
        }
        Ok(Self {
            axis,
            mnemonic,
            argument: None,
            query: true,
        })
    }

    /// Parse caller text such as `MVA-5`, `sta?` or `VER` for an axis.
    ///
    /// Query-only mnemonics are treated as queries with or without the `?`.
    pub fn parse(axis: Axis, text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text.len() < 3 || !text.is_char_boundary(3) {
            return Err(ProtocolError::InvalidCommand(format!(
                "command '{}' is too short",
                text
            )));
        }
        let (head, rest) = text.split_at(3);
        let mnemonic: Mnemonic = head.parse()?;

        let (rest, has_marker) = match rest.strip_suffix('?') {
            Some(stripped) => (stripped.trim(), true),
            None => (rest.trim(), false),
        };

        if has_marker || mnemonic.is_query_only() {
            if !rest.is_empty() {
                return Err(ProtocolError::InvalidCommand(format!(
                    "query '{}' cannot carry an argument",
                    text
                )));
            }
            return Command::query(axis, mnemonic);
        }

        let argument = if rest.is_empty() {
            None
        } else {
            Some(rest.parse::<f64>().map_err(|_| {
                ProtocolError::InvalidCommand(format!("invalid argument '{}' in '{}'", rest, text))
            })?)
        };
        Command::write(axis, mnemonic, argument)
    }

    /// Addressed axis
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Operation
    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// Numeric argument of a write, if any
    pub fn argument(&self) -> Option<f64> {
        self.argument
    }

    /// Whether the controller answers this command with a query result
    pub fn is_query(&self) -> bool {
        self.query
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.axis, self.mnemonic)?;
        if let Some(arg) = self.argument {
            write!(f, "{}", arg)?;
        }
        if self.query {
            f.write_str("?")?;
        }
        Ok(())
    }
}
