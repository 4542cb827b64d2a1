//! Bus configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use servobus_protocol::{Endian, VariantKind};

use crate::error::{BusError, BusResult};

/// Settings for a [`BusController`](crate::BusController).
///
/// Every field has a default, so a YAML file only needs the keys it changes:
///
/// ```yaml
/// port: /dev/ttyUSB0
/// variant: DDServo
/// max_device_id: 30
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Serial port name used by [`BusController::open_configured`](crate::BusController::open_configured).
    pub port: String,
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Active protocol variant.
    pub variant: VariantKind,
    /// How long a receive cycle waits for each byte.
    pub byte_timeout_ms: u64,
    /// Approximate time one device needs to answer a broadcast ping, in microseconds.
    /// Sets how many silent receive cycles the adaptive scan tolerates.
    pub probe_unit_us: u64,
    /// Lowest id probed by the exhaustive scan.
    pub min_device_id: u8,
    /// Highest device id in use on the bus.
    pub max_device_id: u8,
    /// Byte order of multi-byte fields.
    pub endian: Endian,
    /// Never write to the bus; only observe traffic.
    pub listen_only: bool,
    /// Undelivered events kept before new ones are dropped.
    pub event_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            port: String::new(),
            baud_rate: 1_000_000,
            variant: VariantKind::RobotisServo,
            byte_timeout_ms: 100,
            probe_unit_us: 1200,
            min_device_id: 0,
            max_device_id: 253,
            endian: Endian::Little,
            listen_only: false,
            event_capacity: 1024,
        }
    }
}

impl BusConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> BusResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> BusResult<Self> {
        let text = std::fs::read_to_string(path).map_err(BusError::ConfigIo)?;
        Self::from_yaml_str(&text)
    }

    /// Render as YAML.
    pub fn to_yaml_string(&self) -> BusResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Per-byte receive timeout.
    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }

    /// Time one device needs to answer a broadcast ping.
    pub fn probe_unit(&self) -> Duration {
        Duration::from_micros(self.probe_unit_us)
    }

    /// Set the serial port name.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the line speed.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the protocol variant.
    pub fn with_variant(mut self, variant: VariantKind) -> Self {
        self.variant = variant;
        self
    }

    /// Set the per-byte receive timeout.
    pub fn with_byte_timeout_ms(mut self, byte_timeout_ms: u64) -> Self {
        self.byte_timeout_ms = byte_timeout_ms;
        self
    }

    /// Set the per-device answer time used by the adaptive scan.
    pub fn with_probe_unit_us(mut self, probe_unit_us: u64) -> Self {
        self.probe_unit_us = probe_unit_us;
        self
    }

    /// Set the id range probed by scans.
    pub fn with_device_range(mut self, min_device_id: u8, max_device_id: u8) -> Self {
        self.min_device_id = min_device_id;
        self.max_device_id = max_device_id;
        self
    }

    /// Set the byte order of multi-byte fields.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Enable or disable listen-only mode.
    pub fn with_listen_only(mut self, listen_only: bool) -> Self {
        self.listen_only = listen_only;
        self
    }

    /// Set the event queue capacity.
    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }
}
