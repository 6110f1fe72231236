//! Controller error frames
//!
//! The MMC reports failures as text frames of the form
//! `#Error 26 - XYZ - Invalid Command`. Several frames may arrive on one
//! line (for example as the reply to `ERR?`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Splits a reply into individual `#Error` entries.
static ERROR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#error\b").expect("Invalid error marker regex"));

/// Body of a single entry: code, optional mnemonic, message.
static ERROR_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(\d+)\s*-\s*(?:([A-Za-z]{3})\s*-\s*)?(.*?)\s*$")
        .expect("Invalid error body regex")
});

/// Error codes documented for the MMC series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 10
    ReceiveBufferOverrun,
    /// 11
    MotorDisabled,
    /// 12
    NoEncoderDetected,
    /// 13
    IndexNotFound,
    /// 14
    HomeRequiresEncoder,
    /// 15
    MoveLimitRequiresEncoder,
    /// 20
    CommandIsReadOnly,
    /// 21
    OneReadOperationPerLine,
    /// 22
    TooManyCommandsOnLine,
    /// 23
    LineCharacterLimitExceeded,
    /// 24
    MissingAxisNumber,
    /// 25
    MalformedCommand,
    /// 26
    InvalidCommand,
    /// 27
    GlobalReadOperationRequest,
    /// 28
    InvalidParameterType,
    /// 29
    InvalidCharacterInParameter,
    /// 30
    CommandCannotBeUsedInGlobalContext,
    /// 31
    ParameterOutOfBounds,
    /// 32
    IncorrectJogVelocityRequest,
    /// 33
    NotInJogMode,
    /// 34
    TraceAlreadyInProgress,
    /// 35
    TraceDidNotComplete,
    /// 36
    CommandCannotBeExecutedDuringMotion,
    /// 37
    MoveOutsideSoftLimits,
    /// 38
    ReadNotAvailableForThisCommand,
    /// 39
    ProgramNumberOutOfRange,
    /// 40
    ProgramSizeLimitExceeded,
    /// 41
    ProgramFailedToRecord,
    /// 42
    EndCommandMustBeOnItsOwnLine,
    /// 43
    FailedToReadProgram,
    /// 44
    CommandOnlyValidWithinProgram,
    /// 45
    ProgramAlreadyExists,
    /// 46
    ProgramDoesNotExist,
    /// 47
    ReadOperationsNotAllowedInsideProgram,
    /// 48
    CommandNotAllowedWhileProgramInProgress,
    /// 50
    LimitActivated,
    /// 51
    EndOfTravelLimit,
    /// 52
    HomeInProgress,
    /// 53
    IoFunctionAlreadyInUse,
    /// 54
    InvalidResolution,
    /// 55
    LimitsAreNotConfiguredProperly,
    /// 80
    CommandNotAvailableInThisVersion,
    /// 81
    AnalogEncoderNotAvailableInThisVersion,
    /// A code outside the documented table
    Unknown(u16),
}

impl ErrorCode {
    /// Map a numeric code from the wire
    pub fn from_code(code: u16) -> Self {
        use ErrorCode::*;
        match code {
            10 => ReceiveBufferOverrun,
            11 => MotorDisabled,
            12 => NoEncoderDetected,
            13 => IndexNotFound,
            14 => HomeRequiresEncoder,
            15 => MoveLimitRequiresEncoder,
            20 => CommandIsReadOnly,
            21 => OneReadOperationPerLine,
            22 => TooManyCommandsOnLine,
            23 => LineCharacterLimitExceeded,
            24 => MissingAxisNumber,
            25 => MalformedCommand,
            26 => InvalidCommand,
            27 => GlobalReadOperationRequest,
            28 => InvalidParameterType,
            29 => InvalidCharacterInParameter,
            30 => CommandCannotBeUsedInGlobalContext,
            31 => ParameterOutOfBounds,
            32 => IncorrectJogVelocityRequest,
            33 => NotInJogMode,
            34 => TraceAlreadyInProgress,
            35 => TraceDidNotComplete,
            36 => CommandCannotBeExecutedDuringMotion,
            37 => MoveOutsideSoftLimits,
            38 => ReadNotAvailableForThisCommand,
            39 => ProgramNumberOutOfRange,
            40 => ProgramSizeLimitExceeded,
            41 => ProgramFailedToRecord,
            42 => EndCommandMustBeOnItsOwnLine,
            43 => FailedToReadProgram,
            44 => CommandOnlyValidWithinProgram,
            45 => ProgramAlreadyExists,
            46 => ProgramDoesNotExist,
            47 => ReadOperationsNotAllowedInsideProgram,
            48 => CommandNotAllowedWhileProgramInProgress,
            50 => LimitActivated,
            51 => EndOfTravelLimit,
            52 => HomeInProgress,
            53 => IoFunctionAlreadyInUse,
            54 => InvalidResolution,
            55 => LimitsAreNotConfiguredProperly,
            80 => CommandNotAvailableInThisVersion,
            81 => AnalogEncoderNotAvailableInThisVersion,
            other => Unknown(other),
        }
    }

    /// Numeric code as sent by the controller
    pub fn code(&self) -> u16 {
        use ErrorCode::*;
        match self {
            ReceiveBufferOverrun => 10,
            MotorDisabled => 11,
            NoEncoderDetected => 12,
            IndexNotFound => 13,
            HomeRequiresEncoder => 14,
            MoveLimitRequiresEncoder => 15,
            CommandIsReadOnly => 20,
            OneReadOperationPerLine => 21,
            TooManyCommandsOnLine => 22,
            LineCharacterLimitExceeded => 23,
            MissingAxisNumber => 24,
            MalformedCommand => 25,
            InvalidCommand => 26,
            GlobalReadOperationRequest => 27,
            InvalidParameterType => 28,
            InvalidCharacterInParameter => 29,
            CommandCannotBeUsedInGlobalContext => 30,
            ParameterOutOfBounds => 31,
            IncorrectJogVelocityRequest => 32,
            NotInJogMode => 33,
            TraceAlreadyInProgress => 34,
            TraceDidNotComplete => 35,
            CommandCannotBeExecutedDuringMotion => 36,
            MoveOutsideSoftLimits => 37,
            ReadNotAvailableForThisCommand => 38,
            ProgramNumberOutOfRange => 39,
            ProgramSizeLimitExceeded => 40,
            ProgramFailedToRecord => 41,
            EndCommandMustBeOnItsOwnLine => 42,
            FailedToReadProgram => 43,
            CommandOnlyValidWithinProgram => 44,
            ProgramAlreadyExists => 45,
            ProgramDoesNotExist => 46,
            ReadOperationsNotAllowedInsideProgram => 47,
            CommandNotAllowedWhileProgramInProgress => 48,
            LimitActivated => 50,
            EndOfTravelLimit => 51,
            HomeInProgress => 52,
            IoFunctionAlreadyInUse => 53,
            InvalidResolution => 54,
            LimitsAreNotConfiguredProperly => 55,
            CommandNotAvailableInThisVersion => 80,
            AnalogEncoderNotAvailableInThisVersion => 81,
            Unknown(code) => *code,
        }
    }

    /// Whether the controller documentation says to resend the line
    pub fn should_resend(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProgramFailedToRecord | ErrorCode::EndCommandMustBeOnItsOwnLine
        )
    }
}

/// One `#Error` entry reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    /// Numeric error code
    pub code: ErrorCode,
    /// Mnemonic the controller blamed (empty when not reported)
    pub mnemonic: String,
    /// Human-readable text as sent by the controller
    pub message: String,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mnemonic.is_empty() {
            write!(f, "error {}: {}", self.code.code(), self.message)
        } else {
            write!(
                f,
                "error {} ({}): {}",
                self.code.code(),
                self.mnemonic,
                self.message
            )
        }
    }
}

/// Whether the text carries at least one `#Error` marker
pub fn contains_errors(text: &str) -> bool {
    ERROR_MARKER.is_match(text)
}

/// Parse every `#Error` entry in a reply, in order of appearance.
///
/// Entries whose body does not match the documented layout are skipped.
pub fn parse_errors(text: &str) -> Vec<DeviceError> {
    let starts: Vec<(usize, usize)> = ERROR_MARKER
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut errors = Vec::with_capacity(starts.len());
    for (i, &(_, body_start)) in starts.iter().enumerate() {
        let body_end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(text.len());
        let body = &text[body_start..body_end];

        let Some(caps) = ERROR_BODY.captures(body) else {
            continue;
        };
        let Ok(code) = caps[1].parse::<u16>() else {
            continue;
        };
        errors.push(DeviceError {
            code: ErrorCode::from_code(code),
            mnemonic: caps
                .get(2)
                .map(|m| m.as_str().to_ascii_uppercase())
                .unwrap_or_default(),
            message: caps[3].trim().to_string(),
        });
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_single_error() {
        let errors = parse_errors("#Error 48 - ERA - Command Not Allowed While Program Is In Progress");
        assert_eq!(
            errors,
            vec![DeviceError {
                code: ErrorCode::CommandNotAllowedWhileProgramInProgress,
                mnemonic: "ERA".to_string(),
                message: "Command Not Allowed While Program Is In Progress".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_multiple_errors() {
        let errors = parse_errors("#Error 26 - XYZ - Invalid Command#Error 37 - MVA - Move Outside Soft Limits\n");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, ErrorCode::InvalidCommand);
        assert_eq!(errors[1].code, ErrorCode::MoveOutsideSoftLimits);
        assert_eq!(errors[1].mnemonic, "MVA");
    }

    #[test]
    fn test_parse_error_without_mnemonic() {
        let errors = parse_errors("#Error 24 - Missing Axis Number");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::MissingAxisNumber);
        assert_eq!(errors[0].mnemonic, "");
        assert_eq!(errors[0].message, "Missing Axis Number");
    }

    #[test]
    fn test_unknown_code() {
        let errors = parse_errors("#ERROR 99 - ABC - Something new");
        assert_eq!(errors[0].code, ErrorCode::Unknown(99));
        assert_eq!(errors[0].code.code(), 99);
    }

    #[test]
    fn test_code_table_roundtrip() {
        for code in [10u16, 26, 41, 48, 54, 81] {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_no_errors() {
        assert!(parse_errors("#").is_empty());
        assert!(!contains_errors("#0"));
        assert!(contains_errors("#Error 10 - Receive Buffer Overrun"));
    }

    #[test]
    fn test_should_resend() {
        assert!(ErrorCode::ProgramFailedToRecord.should_resend());
        assert!(!ErrorCode::InvalidCommand.should_resend());
    }
}
