//! Protocol errors

use thiserror::Error;

use super::device_error::DeviceError;

/// Errors that can occur while talking to the controller
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port is missing, busy or could not be configured
    #[error("Port unavailable: {port} ({reason})")]
    PortUnavailable {
        /// Port name as given by the caller
        port: String,
        /// OS or driver message
        reason: String,
    },

    /// No complete reply within the configured bound
    #[error("Timed out waiting for reply")]
    Timeout,

    /// Reply frame was corrupt, oversized, non-ASCII or empty
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Command text, axis or argument rejected before transmission
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The controller answered with `#Error` entries
    #[error("Controller reported {}", format_device_errors(.0))]
    DeviceError(Vec<DeviceError>),

    /// The handle was closed
    #[error("Not connected to controller")]
    NotConnected,

    /// Transport-level failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Short stable name of the failure kind, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::PortUnavailable { .. } => "port_unavailable",
            ProtocolError::Timeout => "timeout",
            ProtocolError::MalformedResponse(_) => "malformed_response",
            ProtocolError::InvalidCommand(_) => "invalid_command",
            ProtocolError::DeviceError(_) => "device_error",
            ProtocolError::NotConnected => "not_connected",
            ProtocolError::SerialError(_) => "serial_error",
            ProtocolError::IoError(_) => "io_error",
        }
    }
}

fn format_device_errors(errors: &[DeviceError]) -> String {
    match errors {
        [] => "an unspecified error".to_string(),
        [single] => single.to_string(),
        many => many
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::device_error::ErrorCode;

    #[test]
    fn test_kind_names() {
        assert_eq!(ProtocolError::Timeout.kind(), "timeout");
        assert_eq!(
            ProtocolError::InvalidCommand("x".into()).kind(),
            "invalid_command"
        );
    }

    #[test]
    fn test_device_error_display() {
        let err = ProtocolError::DeviceError(vec![DeviceError {
            code: ErrorCode::InvalidCommand,
            mnemonic: "XYZ".to_string(),
            message: "Invalid Command".to_string(),
        }]);
        let text = err.to_string();
        assert!(text.contains("26"));
        assert!(text.contains("XYZ"));
    }
}
