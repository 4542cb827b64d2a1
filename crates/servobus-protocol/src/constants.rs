//! Protocol constants
//!
//! Wire-level values shared by every protocol variant.

// ============================================================================
// Framing
// ============================================================================

/// Marker byte; every frame starts with two of them.
pub const FRAME_MARKER: u8 = 0xFF;
/// The two-byte frame header.
pub const FRAME_HEADER: [u8; 2] = [FRAME_MARKER, FRAME_MARKER];
/// Smallest complete frame: header(2) + id + length + instruction + checksum.
pub const MIN_FRAME_LEN: usize = 6;
/// Smallest legal value of the length byte (instruction + checksum).
pub const MIN_DECLARED_LEN: u8 = 2;
/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - MIN_DECLARED_LEN as usize;
/// Largest complete frame.
pub const MAX_FRAME_LEN: usize = MIN_FRAME_LEN + MAX_PAYLOAD_LEN;

// ============================================================================
// Addressing
// ============================================================================

/// Request target meaning "every device on the bus".
pub const BROADCAST_ID: u8 = 0xFE;
/// Reserved id; never valid as a sender or target.
pub const INVALID_ID: u8 = 0xFF;
/// Memory-map field holding a device's own id.
pub const ID_FIELD: &str = "servoId";

// ============================================================================
// Instruction names with special meaning for correlation
// ============================================================================

/// Presence probe.
pub const INSTR_PING: &str = "PING";
/// Memory read: `[address, length]`.
pub const INSTR_READ: &str = "READ";
/// Memory write: `[address, data..]`.
pub const INSTR_WRITE: &str = "WRITE";
/// Deferred memory write, committed by `ACTION`.
pub const INSTR_REG_WRITE: &str = "REG_WRITE";
/// Commit registered writes.
pub const INSTR_ACTION: &str = "ACTION";
/// Factory reset.
pub const INSTR_RESET: &str = "RESET";

/// Instructions whose first payload byte is a memory address.
pub const ADDRESSED_INSTRUCTIONS: [&str; 3] = [INSTR_READ, INSTR_WRITE, INSTR_REG_WRITE];

/// Returns true if the named instruction carries a memory address in its first payload byte.
pub fn is_addressed_instruction(name: &str) -> bool {
    ADDRESSED_INSTRUCTIONS.contains(&name)
}
