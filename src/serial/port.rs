//! Serial port access
//!
//! [`SerialConnector`] is the seam between the ingestor state machine and the
//! OS. [`SystemSerial`] talks to real ports through the `serialport` crate;
//! tests substitute scripted connectors.

use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPortType, StopBits};
use tracing::debug;

use crate::catalog::SerialDeviceRecord;

/// Baud rate of the controller link
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Wait between failed connection attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Read timeout; bounds how long a stop request can go unnoticed while connected
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial link parameters. Always 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// MIDI channel every ingested event is sent on
    pub channel: u8,
    pub backoff: Duration,
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            channel: 0,
            backoff: DEFAULT_BACKOFF,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Opens serial connections for the ingestor
pub trait SerialConnector: Send + 'static {
    /// OS-reported device strings, in enumeration order
    fn available_ports(&mut self) -> io::Result<Vec<String>>;

    /// Open `path` with `settings`. Reads must time out after `settings.read_timeout`
    /// with [`io::ErrorKind::TimedOut`].
    fn open(&mut self, path: &str, settings: &SerialSettings) -> io::Result<Box<dyn Read>>;
}

/// Real serial ports via the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SerialConnector for SystemSerial {
    fn available_ports(&mut self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&mut self, path: &str, settings: &SerialSettings) -> io::Result<Box<dyn Read>> {
        debug!("Opening serial port {} at {} baud", path, settings.baud_rate);
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(settings.read_timeout)
            .open()?;
        Ok(Box::new(port))
    }
}

/// Enumerate serial devices for the catalog file.
///
/// USB devices are named by their product string when the OS reports one;
/// everything else falls back to the last path component.
pub fn list_serial_devices() -> io::Result<Vec<SerialDeviceRecord>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let fallback = Path::new(&info.port_name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| info.port_name.clone());
            let name = match info.port_type {
                SerialPortType::UsbPort(usb) => usb.product.filter(|p| !p.trim().is_empty()),
                _ => None,
            }
            .unwrap_or(fallback);
            SerialDeviceRecord {
                name,
                device_path: info.port_name,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_parameters() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.channel, 0);
        assert_eq!(settings.backoff, Duration::from_secs(5));
    }
}
