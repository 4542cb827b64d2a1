//! Packet encoding and decoding.
//!
//! ```text
//! +------+------+----+-----+-------------+-------------------+----------+
//! | 0xFF | 0xFF | id | len | instruction | payload[len - 2]  | checksum |
//! +------+------+----+-----+-------------+-------------------+----------+
//! ```
//!
//! The checksum is the inverted low byte of the sum of every byte from `id`
//! through the last payload byte.

use bytes::BufMut;

use crate::constants::{FRAME_HEADER, INVALID_ID, MAX_PAYLOAD_LEN, MIN_DECLARED_LEN, MIN_FRAME_LEN};
use crate::error::{ProtocolError, ProtocolResult};

/// One delimited message recovered from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender (answers) or target (requests).
    pub device_id: u8,
    /// Length byte as received: payload length plus two.
    pub declared_len: u8,
    /// Instruction opcode for requests, status byte for answers.
    pub instruction: u8,
    /// Parameter bytes.
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
    /// Whether the checksum matches the frame contents.
    pub checksum_valid: bool,
    /// The complete frame as seen on the wire.
    pub raw: Vec<u8>,
}

/// Inverted low byte of the byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

/// Build the wire bytes of a frame.
pub fn encode_frame(device_id: u8, opcode: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    if device_id == INVALID_ID {
        return Err(ProtocolError::InvalidDeviceId(device_id));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong {
            max: MAX_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let mut buf = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    buf.put_slice(&FRAME_HEADER);
    buf.put_u8(device_id);
    buf.put_u8(payload.len() as u8 + MIN_DECLARED_LEN);
    buf.put_u8(opcode);
    buf.put_slice(payload);
    let sum = checksum(&buf[FRAME_HEADER.len()..]);
    buf.put_u8(sum);

    Ok(buf)
}

/// Decode a window holding exactly one frame.
///
/// The window is trusted to be aligned on the header; no resynchronization
/// is attempted. The length byte must account for every byte of the window.
/// A checksum mismatch still yields a frame, flagged invalid.
pub fn decode_frame(window: &[u8]) -> ProtocolResult<Frame> {
    if window.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: MIN_FRAME_LEN,
            actual: window.len(),
        });
    }
    let declared_len = window[3];
    if declared_len < MIN_DECLARED_LEN || declared_len as usize + 4 != window.len() {
        return Err(ProtocolError::LengthMismatch {
            declared: declared_len,
            actual: window.len(),
        });
    }

    let last = window.len() - 1;
    let received = window[last];
    let computed = checksum(&window[FRAME_HEADER.len()..last]);

    Ok(Frame {
        device_id: window[2],
        declared_len,
        instruction: window[4],
        payload: window[5..last].to_vec(),
        checksum: received,
        checksum_valid: received == computed,
        raw: window.to_vec(),
    })
}
