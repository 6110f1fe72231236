//! Serial port handling
//!
//! Port enumeration, settings, and low-level open/configure helpers.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Read timeout applied at the OS level. Transactions poll with their own
/// overall deadline, so this only bounds a single blocking read.
const PORT_READ_TIMEOUT_MS: u64 = 50;

/// Information about an available serial port
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM4")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Parity bit setting
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Handshake setting
pub enum FlowControl {
    /// No handshake
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Line settings used when opening a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Line speed
    pub baud_rate: u32,
    /// 5 to 8
    pub data_bits: u8,
    /// Parity bit
    pub parity: Parity,
    /// 1 or 2
    pub stop_bits: u8,
    /// Handshake
    pub flow_control: FlowControl,
}

impl Default for PortSettings {
    /// MMC factory settings: 38400 8N1, no handshake
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

impl PortSettings {
    fn data_bits(&self) -> Result<serialport::DataBits, ProtocolError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(ProtocolError::SerialError(format!(
                "unsupported data bits: {}",
                other
            ))),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, ProtocolError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(ProtocolError::SerialError(format!(
                "unsupported stop bits: {}",
                other
            ))),
        }
    }

    fn parity(&self) -> serialport::Parity {
        match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn flow_control(&self) -> serialport::FlowControl {
        match self.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Sort key so that Windows COM ports order numerically, then ttyUSB*,
/// then ttyACM*, then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let upper = basename.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("COM") {
        if let Ok(num) = rest.parse::<usize>() {
            return (0, num, basename.to_string());
        }
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (2, num, basename.to_string());
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!(error = %e, "port enumeration failed"),
    }

    // USB-serial adapters sometimes do not show up through udev
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open and configure a serial port.
///
/// The OS grants exclusive access while the returned handle lives. Any
/// failure to open maps to `PortUnavailable`.
pub fn open_port(name: &str, settings: &PortSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    if settings.baud_rate == 0 {
        return Err(ProtocolError::SerialError("baud rate must be non-zero".to_string()));
    }

    debug!(port = name, baud = settings.baud_rate, "opening serial port");
    let mut port = serialport::new(name, settings.baud_rate)
        .data_bits(settings.data_bits()?)
        .parity(settings.parity())
        .stop_bits(settings.stop_bits()?)
        .flow_control(settings.flow_control())
        .timeout(Duration::from_millis(PORT_READ_TIMEOUT_MS))
        .open()
        .map_err(|e| ProtocolError::PortUnavailable {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

    configure_port(port.as_mut());
    clear_buffers(port.as_mut())?;
    Ok(port)
}

/// Assert the modem control lines. Failures are logged and ignored since
/// many USB adapters do not wire them.
fn configure_port(port: &mut dyn SerialPort) {
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!(error = %e, "failed to set DTR high (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        debug!(error = %e, "failed to set RTS high (continuing)");
    }
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}
