//! Bus scanning strategy.
//!
//! After a broadcast ping every device answers in turn, lower ids tending to
//! answer first. The adaptive scan keeps listening while silence could still
//! be explained by devices with higher ids that have not answered yet: each
//! silent receive cycle covers `byte_timeout / probe_unit` ids, and the scan
//! stops once the silence covers every id above the last device found.

use std::time::Duration;

/// Floor for the ids covered per silent cycle, so a zero timeout still terminates.
const MIN_IDS_PER_TIMEOUT: f64 = 0.01;
/// Smallest probe unit used as a divisor.
const MIN_PROBE_UNIT: Duration = Duration::from_micros(1);

/// Stopping rule of the broadcast scan.
#[derive(Debug, Clone)]
pub struct AdaptiveScan {
    ids_per_timeout: f64,
    max_device_id: u8,
    last_found: i32,
    failures: u32,
    found: Vec<u8>,
}

impl AdaptiveScan {
    /// Start a scan with nothing found yet.
    pub fn new(byte_timeout: Duration, probe_unit: Duration, max_device_id: u8) -> Self {
        let probe = probe_unit.max(MIN_PROBE_UNIT).as_secs_f64();
        AdaptiveScan {
            ids_per_timeout: (byte_timeout.as_secs_f64() / probe).max(MIN_IDS_PER_TIMEOUT),
            max_device_id,
            last_found: -1,
            failures: 0,
            found: Vec::new(),
        }
    }

    /// Whether enough silence has passed to stop listening.
    pub fn is_finished(&self) -> bool {
        let remaining = self.max_device_id as f64 - self.last_found as f64;
        self.failures as f64 * self.ids_per_timeout >= remaining
    }

    /// A device answered the ping.
    pub fn record_device(&mut self, device_id: u8) {
        if !self.found.contains(&device_id) {
            self.found.push(device_id);
        }
        self.last_found = self.last_found.max(device_id as i32);
        self.failures = 0;
    }

    /// Some other frame arrived; the bus is not silent.
    pub fn record_activity(&mut self) {
        self.failures = 0;
    }

    /// A receive cycle timed out.
    pub fn record_timeout(&mut self) {
        self.failures += 1;
    }

    /// Silent cycles so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Devices found so far, in answer order.
    pub fn found(&self) -> &[u8] {
        &self.found
    }

    /// Finish the scan.
    pub fn into_found(self) -> Vec<u8> {
        self.found
    }
}
