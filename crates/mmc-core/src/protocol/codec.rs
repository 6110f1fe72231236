//! Line codec
//!
//! Commands go out as `<axis><MNEMONIC>[arg][?]` followed by `\n\r`.
//! Replies come back as ASCII lines beginning with `#` and ending in `\n`;
//! a stray `\r` on either side of the line feed is tolerated.

use super::{
    commands::{Axis, Command},
    device_error::{contains_errors, parse_errors},
    ProtocolError, COMMAND_TERMINATOR, MAX_FRAME_LEN, REPLY_MARKER,
};

/// Classified controller reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The command was accepted
    Acknowledgement,
    /// Payload of a query, without the leading `#`
    QueryResult(String),
}

impl Response {
    /// Payload of a query result, if any
    pub fn payload(&self) -> Option<&str> {
        match self {
            Response::Acknowledgement => None,
            Response::QueryResult(payload) => Some(payload),
        }
    }
}

/// Encode a command into its wire bytes, terminator included
pub fn encode(command: &Command) -> Vec<u8> {
    let mut bytes = command.to_string().into_bytes();
    bytes.extend_from_slice(COMMAND_TERMINATOR);
    bytes
}

/// Decode a wire command line back into a [`Command`]
pub fn decode_command(line: &[u8]) -> Result<Command, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::InvalidCommand("command line is not ASCII".to_string()))?;
    let text = text.trim_end_matches(['\r', '\n']);

    let digits = text.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(ProtocolError::InvalidCommand(format!(
            "missing axis number in '{}'",
            text
        )));
    }
    let axis: Axis = text[..digits].parse()?;
    Command::parse(axis, &text[digits..])
}

/// Validate a reply frame and return its trimmed text, `#` marker included.
///
/// Fails with `MalformedResponse` when no line feed terminates the frame or
/// the bytes are not ASCII.
pub fn frame_text(frame: &[u8]) -> Result<&str, ProtocolError> {
    let end = frame
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ProtocolError::MalformedResponse("unterminated frame".to_string()))?;
    let line = &frame[..end];
    if !line.is_ascii() {
        return Err(ProtocolError::MalformedResponse(
            "frame contains non-ASCII bytes".to_string(),
        ));
    }
    // ASCII was checked above
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::MalformedResponse("frame is not valid text".to_string()))?;
    Ok(text.trim())
}

/// Decode a reply frame produced in answer to `command`
pub fn decode(frame: &[u8], command: &Command) -> Result<Response, ProtocolError> {
    let text = frame_text(frame)?;

    if contains_errors(text) {
        let errors = parse_errors(text);
        if errors.is_empty() {
            return Err(ProtocolError::MalformedResponse(format!(
                "unparseable error frame '{}'",
                text
            )));
        }
        return Err(ProtocolError::DeviceError(errors));
    }

    if !command.is_query() {
        return Ok(Response::Acknowledgement);
    }

    let payload = text
        .strip_prefix(REPLY_MARKER)
        .unwrap_or(text)
        .trim()
        .to_string();
    if payload.is_empty() {
        return Err(ProtocolError::MalformedResponse(format!(
            "empty reply to {}",
            command
        )));
    }
    Ok(Response::QueryResult(payload))
}

/// Collects bytes from partial reads and yields complete reply frames
#[derive(Debug)]
pub struct LineAccumulator {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl LineAccumulator {
    /// Accumulator rejecting frames longer than `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            max_len,
        }
    }

    /// Append freshly read bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete frame (line feed included), if one is buffered.
    ///
    /// Blank lines left over from `\n\r` pairs are skipped. Fails when a
    /// frame, terminated or still partial, is longer than the configured
    /// maximum; the offending bytes are discarded.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            let leading = self
                .buffer
                .iter()
                .take_while(|&&b| b == b'\r' || b == b'\n')
                .count();
            self.buffer.drain(..leading);

            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    let frame: Vec<u8> = self.buffer.drain(..=end).collect();
                    if frame.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    if frame.len() > self.max_len {
                        return Err(ProtocolError::MalformedResponse(format!(
                            "frame of {} bytes exceeds limit of {}",
                            frame.len(),
                            self.max_len
                        )));
                    }
                    return Ok(Some(frame));
                }
                None if self.buffer.len() > self.max_len => {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Err(ProtocolError::MalformedResponse(format!(
                        "no terminator within {} bytes (got {})",
                        self.max_len, len
                    )));
                }
                None => return Ok(None),
            }
        }
    }

    /// Bytes of the pending partial frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
