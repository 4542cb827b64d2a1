//! Events delivered to observers of the bus.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Operation failed.
    Error,
    /// Something on the bus looked wrong.
    Warn,
    /// Notable state change.
    Info,
    /// Per-frame detail.
    Debug,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Something that happened on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusEvent {
    /// A device answered a ping.
    DeviceDiscovered {
        /// Answering device.
        device_id: u8,
    },
    /// A device answered a read or write.
    ///
    /// `device_id` and `address` come from the request the answer was
    /// correlated with; `payload` is the raw answer payload.
    FieldData {
        /// Device the request was addressed to.
        device_id: u8,
        /// First memory address of the request.
        address: u16,
        /// Raw answer payload.
        payload: Vec<u8>,
    },
    /// Bytes written to the bus.
    FrameSent {
        /// The complete frame.
        bytes: Vec<u8>,
    },
    /// A frame recovered from the bus.
    FrameReceived {
        /// The complete frame.
        bytes: Vec<u8>,
    },
    /// A problem or notice worth surfacing.
    Diagnostic {
        /// How serious it is.
        severity: Severity,
        /// Human-readable text.
        message: String,
    },
}

/// Bounded fan-in of bus events.
///
/// Every receiver handed out shares one queue; each event is taken by
/// exactly one of them. When the queue is full new events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<BusEvent>,
    receiver: Receiver<BusEvent>,
}

impl EventSink {
    /// Create a sink holding at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        EventSink { sender, receiver }
    }

    /// A receiving end of the queue.
    pub fn subscribe(&self) -> Receiver<BusEvent> {
        self.receiver.clone()
    }

    /// Queue an event, dropping it if the queue is full.
    pub fn emit(&self, event: BusEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Log a diagnostic at its severity and queue it.
    pub fn diagnostic(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Error => tracing::error!("{}", message),
            Severity::Warn => tracing::warn!("{}", message),
            Severity::Info => tracing::info!("{}", message),
            Severity::Debug => tracing::debug!("{}", message),
        }
        self.emit(BusEvent::Diagnostic { severity, message });
    }

    /// Number of undelivered events.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
