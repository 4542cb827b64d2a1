//! Streaming frame recovery.
//!
//! [`FrameReader`] is fed one byte at a time and hands back a [`Frame`]
//! whenever a complete one has accumulated. Bytes that cannot start or
//! continue a frame are dropped from the front of the buffer, so the reader
//! resynchronizes on its own after line noise or a partial frame.

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::{FRAME_MARKER, MIN_DECLARED_LEN};
use crate::packet::{decode_frame, Frame};

/// Header (2) + id + length byte.
const PREFIX_LEN: usize = 4;
/// Largest possible frame: prefix plus the largest declared length.
const MAX_FRAME_LEN: usize = PREFIX_LEN + u8::MAX as usize;

/// Where the reader is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Waiting for the first marker byte.
    SeekHeader,
    /// One marker byte seen.
    HaveFirstFF,
    /// Both marker bytes seen.
    HaveHeader,
    /// Device id received.
    HaveDeviceId,
    /// Length byte received.
    HaveLength,
    /// Collecting instruction, payload and checksum.
    Accumulating,
    /// A frame was emitted by the last push.
    FrameComplete,
}

/// Byte-at-a-time frame recovery state machine.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    state: ReaderState,
    discarded: u64,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        FrameReader {
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
            state: ReaderState::SeekHeader,
            discarded: 0,
        }
    }

    /// Append one byte; returns a frame if it completed one.
    ///
    /// Frames with a bad checksum are returned too, flagged invalid.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame> {
        self.buffer.put_u8(byte);

        loop {
            if self.misaligned() {
                self.drop_oldest("not a frame header");
                continue;
            }
            let len = self.buffer.len();
            if len == 3 && self.buffer[2] == FRAME_MARKER {
                self.drop_oldest("marker byte in id position");
                continue;
            }
            if len >= PREFIX_LEN && self.buffer[3] < MIN_DECLARED_LEN {
                self.drop_oldest("declared length too small");
                continue;
            }
            if len >= PREFIX_LEN && len == PREFIX_LEN + self.buffer[3] as usize {
                return self.complete();
            }
            break;
        }

        self.state = self.buffered_state();
        None
    }

    /// Append several bytes, collecting every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Abandon any partial frame.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            log::trace!("reader reset with {} bytes buffered", self.buffer.len());
        }
        self.buffer.clear();
        self.state = ReaderState::SeekHeader;
    }

    /// Current state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Bytes of the partial frame held so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// The buffer does not start with (a prefix of) the two-byte header.
    fn misaligned(&self) -> bool {
        match self.buffer.len() {
            0 => false,
            1 => self.buffer[0] != FRAME_MARKER,
            _ => self.buffer[0] != FRAME_MARKER || self.buffer[1] != FRAME_MARKER,
        }
    }

    fn drop_oldest(&mut self, reason: &str) {
        log::trace!("dropping byte 0x{:02X}: {}", self.buffer[0], reason);
        self.buffer.advance(1);
        self.discarded += 1;
    }

    fn complete(&mut self) -> Option<Frame> {
        let window = self.buffer.split();
        match decode_frame(&window) {
            Ok(frame) => {
                self.state = ReaderState::FrameComplete;
                Some(frame)
            }
            Err(e) => {
                log::warn!("discarding undecodable frame: {}", e);
                self.discarded += window.len() as u64;
                self.state = ReaderState::SeekHeader;
                None
            }
        }
    }

    fn buffered_state(&self) -> ReaderState {
        match self.buffer.len() {
            0 => ReaderState::SeekHeader,
            1 => ReaderState::HaveFirstFF,
            2 => ReaderState::HaveHeader,
            3 => ReaderState::HaveDeviceId,
            4 => ReaderState::HaveLength,
            _ => ReaderState::Accumulating,
        }
    }
}
