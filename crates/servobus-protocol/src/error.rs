//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding, decoding or describing bus traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame window is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Length byte disagrees with the size of the frame window.
    #[error("length byte {declared} does not match a {actual}-byte frame")]
    LengthMismatch {
        /// Value of the length byte.
        declared: u8,
        /// Bytes in the window.
        actual: usize,
    },

    /// Device id 0xFF can never be addressed.
    #[error("invalid device id 0x{0:02X}")]
    InvalidDeviceId(u8),

    /// Payload does not fit the one-byte length field.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Symbolic instruction name not present in the active table.
    #[error("unknown instruction \"{0}\"")]
    UnknownInstruction(String),

    /// Instruction table would not be a bijection.
    #[error("duplicate instruction {name} (0x{opcode:02X})")]
    DuplicateInstruction {
        /// Instruction name.
        name: String,
        /// Instruction opcode.
        opcode: u8,
    },

    /// Protocol variant name not known.
    #[error("unknown protocol variant \"{0}\"")]
    UnknownVariant(String),

    /// Primitive type name not known.
    #[error("unknown field type \"{0}\"")]
    UnknownType(String),

    /// Schema does not fit the 16-bit address space.
    #[error("field \"{0}\" ends beyond the 16-bit address space")]
    SchemaTooLarge(String),

    /// Two fields in one schema share a name.
    #[error("duplicate field name \"{0}\"")]
    DuplicateField(String),

    /// Not enough bytes to decode a value.
    #[error("cannot decode {type_name}: need {needed} bytes, got {available}")]
    DecodeError {
        /// Primitive type being decoded.
        type_name: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Value does not fit the target type.
    #[error("value {value} out of range for {type_name}")]
    ValueOutOfRange {
        /// Rendered value.
        value: String,
        /// Primitive type being encoded.
        type_name: &'static str,
    },

    /// Fractional value for an integer type.
    #[error("value {value} is not valid for {type_name}")]
    TypeMismatch {
        /// Rendered value.
        value: String,
        /// Primitive type being encoded.
        type_name: &'static str,
    },

    /// Array-valued field decode requested.
    #[error("field {field} has {element_count} elements; array fields are not supported")]
    UnsupportedFeature {
        /// Field name.
        field: String,
        /// Declared element count.
        element_count: u16,
    },

    /// No field starts at this address.
    #[error("no field at address {0}")]
    UnknownAddress(u16),

    /// No field with this name.
    #[error("unknown field \"{0}\"")]
    UnknownField(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
