//! Servo Bus Protocol
//!
//! Pure, synchronous building blocks for half-duplex, multi-drop serial buses
//! of addressable actuators: frame encoding and recovery, per-variant memory
//! maps of typed fields, and instruction tables. Nothing here performs I/O.
//!
//! # Protocol Overview
//!
//! Every message on the wire has the same shape:
//!
//! ```text
//! FF FF | id | len | instruction | payload (len - 2) | checksum
//! ```
//!
//! - **Requests** (host → device): `instruction` is an opcode of the active variant
//! - **Answers** (device → host): `instruction` carries the device status byte
//! - Id `0xFE` addresses every device; id `0xFF` is reserved
//!
//! # Example
//!
//! ```rust,ignore
//! use servobus_protocol::{FrameReader, ProtocolVariant, VariantKind};
//!
//! let variant = ProtocolVariant::select(VariantKind::RobotisServo)?;
//! let request = variant.encode_request(1, &"PING".into(), &[])?;
//!
//! let mut reader = FrameReader::new();
//! for frame in reader.push(&received_bytes) {
//!     println!("{} -> {:?}", frame.device_id, frame.payload);
//! }
//! ```

mod constants;
mod error;
mod field;
mod instruction;
mod memory_map;
mod packet;
mod reader;
mod variant;
mod variants;

pub use constants::*;
pub use error::*;
pub use field::*;
pub use instruction::*;
pub use memory_map::*;
pub use packet::*;
pub use reader::*;
pub use variant::*;
pub use variants::*;
