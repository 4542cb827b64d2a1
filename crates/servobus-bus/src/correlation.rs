//! Request/answer correlation.
//!
//! Answers carry no request tag, so the tracker keeps a single slot holding
//! the most recent request and the id an answer is expected from. Every
//! frame is classified against that slot as either a request (ours or
//! another controller's) or an answer.

use servobus_protocol::{
    checksum, is_addressed_instruction, Frame, ProtocolVariant, BROADCAST_ID, INSTR_PING,
};

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written by this controller.
    Outbound,
    /// Read from the bus.
    Inbound,
}

/// The request answers are currently attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Device the request was addressed to.
    pub target_id: u8,
    /// Resolved instruction name, or `? 0xNN ?`.
    pub instruction_name: String,
    /// First payload byte for addressed instructions, else 0.
    pub address: u16,
}

/// How a frame was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// A request; it now occupies the pending slot.
    Request {
        /// The recorded request.
        request: PendingRequest,
        /// Whether this controller sent it.
        outbound: bool,
    },
    /// A valid answer to a pending ping.
    DeviceDiscovered {
        /// Answering device.
        device_id: u8,
    },
    /// A valid answer to a pending read or write.
    FieldData {
        /// Target of the pending request.
        device_id: u8,
        /// Address of the pending request.
        address: u16,
        /// Raw answer payload.
        payload: Vec<u8>,
    },
    /// A valid answer to any other request.
    Status {
        /// Answering device.
        device_id: u8,
        /// Status byte.
        status: u8,
    },
    /// An answer whose checksum did not match.
    ChecksumError {
        /// Sender id as received.
        device_id: u8,
        /// Checksum byte as received.
        received: u8,
        /// Checksum computed over the frame.
        computed: u8,
    },
}

/// Single-slot request tracker.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    expected: Option<u8>,
    pending: Option<PendingRequest>,
}

impl CorrelationTracker {
    /// Create a tracker expecting nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next answer is expected from; the broadcast id accepts any sender.
    pub fn expected_answer_from(&self) -> Option<u8> {
        self.expected
    }

    /// The request answers are attributed to.
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Forget the pending request.
    pub fn reset(&mut self) {
        self.expected = None;
        self.pending = None;
    }

    /// Classify a frame and update the slot.
    pub fn observe(
        &mut self,
        frame: &Frame,
        direction: Direction,
        variant: &ProtocolVariant,
    ) -> Observation {
        let sender = frame.device_id;
        let is_request = match (direction, self.expected) {
            (Direction::Outbound, _) | (_, None) => true,
            (Direction::Inbound, Some(expected)) => sender != expected && expected != BROADCAST_ID,
        };

        if is_request {
            self.record_request(frame, direction, variant)
        } else {
            self.classify_answer(frame)
        }
    }

    fn record_request(
        &mut self,
        frame: &Frame,
        direction: Direction,
        variant: &ProtocolVariant,
    ) -> Observation {
        let instruction_name = variant.instructions.display_name(frame.instruction);
        let (address, field_name) = if is_addressed_instruction(&instruction_name) {
            match frame.payload.first() {
                Some(&address) => (address as u16, variant.field_name_at(address as u16)),
                None => (0, "UnknownAddress"),
            }
        } else {
            (0, "")
        };

        tracing::debug!(
            "Request id {:3} {:>9} {:<18} {}{}",
            frame.device_id,
            instruction_name,
            field_name,
            hex::encode(&frame.payload),
            if frame.checksum_valid { "" } else { " (checksum error)" },
        );

        let request = PendingRequest {
            target_id: frame.device_id,
            instruction_name,
            address,
        };
        self.expected = Some(frame.device_id);
        self.pending = Some(request.clone());

        Observation::Request {
            request,
            outbound: direction == Direction::Outbound,
        }
    }

    fn classify_answer(&self, frame: &Frame) -> Observation {
        tracing::debug!(
            "Answer  id {:3} status {:02x} {}{}",
            frame.device_id,
            frame.instruction,
            hex::encode(&frame.payload),
            if frame.checksum_valid { "" } else { " (checksum error)" },
        );

        if !frame.checksum_valid {
            let body_end = frame.raw.len().saturating_sub(1);
            return Observation::ChecksumError {
                device_id: frame.device_id,
                received: frame.checksum,
                computed: checksum(frame.raw.get(2..body_end).unwrap_or_default()),
            };
        }

        match self.pending.as_ref() {
            Some(pending) if pending.instruction_name == INSTR_PING => {
                Observation::DeviceDiscovered {
                    device_id: frame.device_id,
                }
            }
            Some(pending) if is_addressed_instruction(&pending.instruction_name) => {
                Observation::FieldData {
                    device_id: pending.target_id,
                    address: pending.address,
                    payload: frame.payload.clone(),
                }
            }
            _ => Observation::Status {
                device_id: frame.device_id,
                status: frame.instruction,
            },
        }
    }
}
