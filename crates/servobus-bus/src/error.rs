//! Error types for the bus crate.

use servobus_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is not open.
    #[error("transport is not open")]
    NotOpen,

    /// Opening the port failed.
    #[error("cannot open {port} (maybe it is already in use): {reason}")]
    Open {
        /// Port name as given.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// Read or write failure on an open link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port configuration failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the bus controller.
#[derive(Debug, Error)]
pub enum BusError {
    /// Encoding, lookup or schema failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Link failure. The link is closed when this is returned.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Write requested on a field the host may not modify.
    #[error("field {0} is read-only")]
    ReadOnlyField(String),

    /// New device id already belongs to another discovered device.
    #[error("device id {0} is already in use")]
    DuplicateDeviceId(u8),

    /// Write requested while the controller only listens.
    #[error("controller is in listen-only mode")]
    ListenOnly,

    /// Memory range outside what one frame can address.
    #[error("address range {address}+{length} exceeds the addressable range")]
    AddressOutOfRange {
        /// First byte address.
        address: u16,
        /// Number of bytes.
        length: usize,
    },

    /// Hand-entered payload is not valid hex.
    #[error("payload is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    ConfigIo(#[source] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::from(ProtocolError::UnknownVariant("Stepper".to_string()));
        assert_eq!(err.to_string(), "unknown protocol variant \"Stepper\"");

        let err = BusError::from(TransportError::NotOpen);
        assert_eq!(err.to_string(), "transport is not open");

        let err = BusError::AddressOutOfRange { address: 250, length: 10 };
        assert!(err.to_string().contains("250+10"));
    }
}
