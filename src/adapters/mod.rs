//! Byte transports between the host and a rig's microcontroller.
//!
//! The session controller never touches a serial port directly. It talks to a
//! [`Transport`] obtained from a [`Connector`], which lets the same controller run
//! against real hardware ([`serial::SerialConnector`]) or a scripted device
//! ([`mock_adapter::MockConnector`]).
//!
//! Transports are blocking. Long reads happen on a `spawn_blocking` thread owned by
//! the event scanner, through a reader obtained with [`Transport::try_clone_reader`].

use crate::error::AppResult;
use std::time::Duration;

pub mod mock_adapter;
pub mod serial;

pub use mock_adapter::{MockConnector, MockDevice};
pub use serial::SerialConnector;

/// Blocking, line-oriented byte transport to one device.
pub trait Transport: Send {
    /// Identifier of the underlying port.
    fn port_name(&self) -> &str;

    /// Write all of `bytes` and flush.
    fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Read one line, without its terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`, and an error
    /// once the transport has been closed or the device went away.
    fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>>;

    /// Number of bytes received and not yet read.
    fn bytes_available(&mut self) -> AppResult<usize>;

    /// Discard everything received and not yet read.
    fn flush_input(&mut self) -> AppResult<()>;

    /// A second handle reading from the same port.
    ///
    /// Closing either handle closes both.
    fn try_clone_reader(&self) -> AppResult<Box<dyn Transport>>;

    /// Close the port. Idempotent.
    fn close(&mut self) -> AppResult<()>;

    /// Whether the port is still open.
    fn is_open(&self) -> bool;
}

/// Opens transports by port identifier.
pub trait Connector: Send + Sync {
    /// Open `port`.
    ///
    /// Fails with [`crate::error::DaqError::Connect`] when the port is missing, busy or
    /// already open.
    fn open(&self, port: &str) -> AppResult<Box<dyn Transport>>;
}

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS device identifier (`/dev/ttyACM0`, `COM3`).
    pub device: String,
    /// Human-readable description, empty when the OS reports none.
    pub description: String,
}

/// Enumerate serial ports currently visible to the host.
pub fn list_ports() -> AppResult<Vec<PortInfo>> {
    serial::available_ports()
}
