//! Serial transport backed by the `serialport` crate.
//!
//! Compiled only with the `instrument_serial` feature. Without it, opening a port
//! or listing ports returns [`DaqError::FeatureNotEnabled`].

use super::{Connector, PortInfo, Transport};
use crate::error::{AppResult, DaqError};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Opens serial ports with fixed line settings.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialConnector {
    /// Create a connector for `baud_rate`, 8N1.
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout,
        }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(9600, Duration::from_secs(1))
    }
}

#[cfg(feature = "instrument_serial")]
impl Connector for SerialConnector {
    fn open(&self, port: &str) -> AppResult<Box<dyn Transport>> {
        let handle = serialport::new(port, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| DaqError::Connect {
                port: port.to_string(),
                message: e.to_string(),
            })?;

        debug!("Serial port '{}' opened at {} baud", port, self.baud_rate);

        Ok(Box::new(SerialTransport {
            port_name: port.to_string(),
            port: handle,
            pending: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Connector for SerialConnector {
    fn open(&self, _port: &str) -> AppResult<Box<dyn Transport>> {
        Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

/// One handle onto an open serial port.
///
/// Clones made with [`Transport::try_clone_reader`] share the `closed` flag, so closing
/// the controller's handle makes the scanner's next read fail.
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
    /// Bytes read past the last returned line.
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DaqError::Transport(format!("port '{}' is closed", self.port_name)))
        } else {
            Ok(())
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        use std::io::Write;

        self.ensure_open()?;
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| DaqError::Transport(format!("write failed: {e}")))
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>> {
        use std::io::{ErrorKind, Read};

        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let deadline = std::time::Instant::now() + timeout;
        let mut buffer = [0u8; 256];
        loop {
            self.ensure_open()?;
            match self.port.read(&mut buffer) {
                Ok(0) => {
                    return Err(DaqError::Transport(format!(
                        "port '{}' reached end of stream",
                        self.port_name
                    )));
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buffer[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(DaqError::Transport(format!("read failed: {e}"))),
            }

            if std::time::Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn bytes_available(&mut self) -> AppResult<usize> {
        self.ensure_open()?;
        let queued = self
            .port
            .bytes_to_read()
            .map_err(|e| DaqError::Transport(e.to_string()))?;
        Ok(queued as usize + self.pending.len())
    }

    fn flush_input(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.pending.clear();
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| DaqError::Transport(e.to_string()))
    }

    fn try_clone_reader(&self) -> AppResult<Box<dyn Transport>> {
        self.ensure_open()?;
        let port = self
            .port
            .try_clone()
            .map_err(|e| DaqError::Transport(format!("could not clone port: {e}")))?;
        Ok(Box::new(SerialTransport {
            port_name: self.port_name.clone(),
            port,
            pending: Vec::new(),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn close(&mut self) -> AppResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "instrument_serial")]
pub(crate) fn available_ports() -> AppResult<Vec<PortInfo>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports()
        .map_err(|e| DaqError::Transport(format!("could not enumerate ports: {e}")))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::Unknown => String::new(),
            };
            PortInfo {
                device: port.port_name,
                description,
            }
        })
        .collect())
}

#[cfg(not(feature = "instrument_serial"))]
pub(crate) fn available_ports() -> AppResult<Vec<PortInfo>> {
    Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_line_settings() {
        let connector = SerialConnector::default();
        assert_eq!(connector.baud_rate, 9600);
        assert_eq!(connector.read_timeout, Duration::from_secs(1));
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn missing_port_is_a_connect_error() {
        let connector = SerialConnector::default();
        match connector.open("/dev/this-port-does-not-exist") {
            Err(DaqError::Connect { port, .. }) => {
                assert_eq!(port, "/dev/this-port-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
