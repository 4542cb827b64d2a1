//! Byte transports.
//!
//! The controller only needs a handful of blocking primitives from the link;
//! [`Transport`] names them so a real serial port and the in-memory
//! [`SimulatedBus`](crate::SimulatedBus) are interchangeable.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::error::{TransportError, TransportResult};

/// Blocking byte link to the bus.
pub trait Transport: Send {
    /// Open the named port at `baud_rate`. Reopening closes the old link first.
    fn open(&mut self, name: &str, baud_rate: u32) -> TransportResult<()>;

    /// Close the link. Closing a closed link is a no-op.
    fn close(&mut self);

    /// Whether the link is open.
    fn is_open(&self) -> bool;

    /// Read one byte, waiting at most `timeout`. `Ok(None)` means the wait timed out.
    fn read_byte(&mut self, timeout: Duration) -> TransportResult<Option<u8>>;

    /// Write all bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Discard any bytes received but not yet read.
    fn flush_input(&mut self) -> TransportResult<()>;
}

// ============================================================================
// Serial Port
// ============================================================================

/// [`Transport`] over a local serial port.
#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    /// Timeout currently configured on the port.
    timeout: Option<Duration>,
}

impl SerialTransport {
    /// Create a closed transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the serial ports present on this machine.
    pub fn available_ports() -> TransportResult<Vec<String>> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }

    fn port_mut(&mut self) -> TransportResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port.as_ref().and_then(|p| p.name()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, name: &str, baud_rate: u32) -> TransportResult<()> {
        self.close();
        let port = serialport::new(name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::Open {
                port: name.to_string(),
                reason: e.to_string(),
            })?;
        self.timeout = Some(port.timeout());
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
        self.timeout = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_byte(&mut self, timeout: Duration) -> TransportResult<Option<u8>> {
        if self.timeout != Some(timeout) {
            self.port_mut()?.set_timeout(timeout)?;
            self.timeout = Some(timeout);
        }

        let mut buf = [0u8; 1];
        match self.port_mut()?.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn flush_input(&mut self) -> TransportResult<()> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_port() {
        let mut transport = SerialTransport::new();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.read_byte(Duration::from_millis(1)),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(transport.write_bytes(&[1]), Err(TransportError::NotOpen)));
        transport.close();
    }

    #[test]
    fn test_open_missing_port() {
        let mut transport = SerialTransport::new();
        let err = transport.open("/dev/servobus-does-not-exist", 1_000_000).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(!transport.is_open());
    }
}
