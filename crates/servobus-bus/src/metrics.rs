//! Metric definitions.
//!
//! Counters are recorded through the `metrics` facade; nothing is collected
//! unless the application installs a recorder.
//!
//! ```rust,ignore
//! servobus_bus::metrics::describe_metrics();
//! metrics::counter!(metric_defs::FRAMES_SENT.name).increment(1);
//! ```

use metrics::{describe_counter, Unit};

/// A counter declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
}

impl Metric {
    /// Declare a counter of events.
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            unit: Unit::Count,
        }
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        describe_counter!(self.name, self.unit, self.description);
    }

    /// Add `value` to the counter.
    pub fn increment(&self, value: u64) {
        metrics::counter!(self.name).increment(value);
    }
}

/// All metrics recorded by the bus.
pub mod metric_defs {
    use super::Metric;

    /// Frames written to the bus.
    pub const FRAMES_SENT: Metric =
        Metric::counter("servobus.frames.sent", "Frames written to the bus");

    /// Frames recovered from the bus, valid or not.
    pub const FRAMES_RECEIVED: Metric =
        Metric::counter("servobus.frames.received", "Frames recovered from the bus");

    /// Frames whose checksum did not match.
    pub const CHECKSUM_ERRORS: Metric = Metric::counter(
        "servobus.frames.checksum_errors",
        "Received frames with a checksum mismatch",
    );

    /// Receive cycles that ended without a frame.
    pub const READER_TIMEOUTS: Metric = Metric::counter(
        "servobus.reader.timeouts",
        "Receive cycles that timed out before a frame completed",
    );

    /// Devices that answered a ping.
    pub const DEVICES_DISCOVERED: Metric = Metric::counter(
        "servobus.devices.discovered",
        "Ping answers received from devices",
    );

    /// Every metric, for registration.
    pub const ALL: &[Metric] = &[
        FRAMES_SENT,
        FRAMES_RECEIVED,
        CHECKSUM_ERRORS,
        READER_TIMEOUTS,
        DEVICES_DISCOVERED,
    ];
}

/// Describe every bus metric to the installed recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
