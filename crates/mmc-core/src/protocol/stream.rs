//! Transport abstraction
//!
//! The transaction engine talks to a [`CommunicationChannel`] rather than to
//! `serialport` directly so that a simulated controller can stand in for
//! hardware.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte channel to a controller chain
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for a single blocking read or write
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop any bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Drop any bytes queued but not yet transmitted
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name reported by the OS, if any
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(io::Error::other)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}
