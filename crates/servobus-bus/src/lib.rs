//! Servo Bus Controller
//!
//! Drives a half-duplex servo bus over a [`Transport`]: sends requests built
//! from the active [`ProtocolVariant`](servobus_protocol::ProtocolVariant),
//! recovers frames from the returning byte stream, attributes answers to the
//! request they belong to and reports what happened as [`BusEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use servobus_bus::{BusConfig, BusController, BusEvent};
//!
//! let config = BusConfig::from_file("bus.yaml")?;
//! let bus = BusController::serial(config)?;
//! bus.open_configured()?;
//!
//! for device_id in bus.scan_bus()? {
//!     let position = bus.read_field(device_id, "PresentPosition")?;
//!     println!("{}: {:?}", device_id, position);
//! }
//!
//! let listener = bus.start_listening()?;
//! for event in bus.events() {
//!     if let BusEvent::FieldData { device_id, address, payload } = event {
//!         println!("{} @{}: {:02x?}", device_id, address, payload);
//!     }
//! }
//! listener.stop();
//! ```

pub mod config;
pub mod controller;
pub mod correlation;
pub mod error;
pub mod events;
pub mod listener;
pub mod metrics;
pub mod scan;
pub mod sim;
pub mod transport;

pub use config::BusConfig;
pub use controller::{parse_hex_payload, BusController};
pub use correlation::{CorrelationTracker, Direction, Observation, PendingRequest};
pub use error::{BusError, BusResult, TransportError, TransportResult};
pub use events::{BusEvent, EventSink, Severity};
pub use listener::Listener;
pub use scan::AdaptiveScan;
pub use sim::SimulatedBus;
pub use transport::{SerialTransport, Transport};
