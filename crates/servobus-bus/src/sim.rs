//! In-memory simulated bus.
//!
//! [`SimulatedBus`] implements [`Transport`] over a set of simulated devices.
//! Frames written to it are parsed and answered from each device's memory
//! image, following the opcodes of the simulator's protocol variant. Extra
//! bytes can be injected to model line noise or another controller's traffic.
//!
//! The handle is cheap to clone; clones share one bus, so a test can keep a
//! handle while the controller owns another.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servobus_protocol::{
    encode_frame, Endian, FieldValue, Frame, FrameReader, ProtocolError, ProtocolResult,
    ProtocolVariant, VariantKind, BROADCAST_ID, ID_FIELD, INSTR_ACTION, INSTR_PING, INSTR_READ,
    INSTR_REG_WRITE, INSTR_RESET, INSTR_WRITE,
};

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;

/// Status byte of a successful answer.
const STATUS_OK: u8 = 0x00;
/// Status bit reporting an out-of-range parameter.
const STATUS_RANGE_ERROR: u8 = 0x08;

/// One simulated device.
#[derive(Debug, Clone)]
struct SimDevice {
    memory: Vec<u8>,
    registered: Vec<(usize, Vec<u8>)>,
}

impl SimDevice {
    fn write(&mut self, address: usize, data: &[u8]) -> bool {
        match self.memory.get_mut(address..address + data.len()) {
            Some(target) => {
                target.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

struct SimState {
    variant: ProtocolVariant,
    endian: Endian,
    devices: BTreeMap<u8, SimDevice>,
    open: bool,
    unplugged: bool,
    rx: VecDeque<u8>,
    reader: FrameReader,
    written: Vec<Vec<u8>>,
    noise: Vec<u8>,
    corrupt_next: bool,
    max_idle: Duration,
}

impl SimState {
    fn new_device(&self, device_id: u8) -> SimDevice {
        let mut device = SimDevice {
            memory: vec![0; self.variant.memory_map.total_memory_size() as usize],
            registered: Vec::new(),
        };
        if let Some(field) = self.variant.memory_map.field_named(ID_FIELD) {
            device.write(field.address as usize, &[device_id]);
        }
        device
    }

    fn targets(&self, device_id: u8) -> Vec<u8> {
        if device_id == BROADCAST_ID {
            self.devices.keys().copied().collect()
        } else if self.devices.contains_key(&device_id) {
            vec![device_id]
        } else {
            Vec::new()
        }
    }

    fn answer(&mut self, device_id: u8, status: u8, payload: &[u8]) {
        let Ok(mut bytes) = encode_frame(device_id, status, payload) else {
            return;
        };
        if self.corrupt_next {
            self.corrupt_next = false;
            if let Some(last) = bytes.last_mut() {
                *last ^= 0x5A;
            }
        }
        let noise = std::mem::take(&mut self.noise);
        self.rx.extend(noise);
        self.rx.extend(bytes);
    }

    fn handle(&mut self, frame: &Frame) {
        if !frame.checksum_valid {
            return;
        }
        let Some(name) = self.variant.instructions.name_of(frame.instruction) else {
            return;
        };
        let name = name.to_string();
        let broadcast = frame.device_id == BROADCAST_ID;

        for id in self.targets(frame.device_id) {
            let reply = self.execute(id, &name, &frame.payload, broadcast);
            if let Some((status, payload)) = reply {
                self.answer(id, status, &payload);
            }
        }
    }

    /// Run one instruction on one device; returns the answer to send, if any.
    fn execute(
        &mut self,
        id: u8,
        instruction: &str,
        payload: &[u8],
        broadcast: bool,
    ) -> Option<(u8, Vec<u8>)> {
        let fresh = self.new_device(id);
        let device = self.devices.get_mut(&id)?;

        let status = match instruction {
            INSTR_PING => return Some((STATUS_OK, Vec::new())),
            INSTR_READ if !broadcast => {
                let (address, length) = match payload {
                    [address, length, ..] => (*address as usize, *length as usize),
                    _ => return Some((STATUS_RANGE_ERROR, Vec::new())),
                };
                return match device.memory.get(address..address + length) {
                    Some(data) => Some((STATUS_OK, data.to_vec())),
                    None => Some((STATUS_RANGE_ERROR, Vec::new())),
                };
            }
            INSTR_WRITE => match payload.split_first() {
                Some((&address, data)) if device.write(address as usize, data) => STATUS_OK,
                _ => STATUS_RANGE_ERROR,
            },
            INSTR_REG_WRITE => match payload.split_first() {
                Some((&address, data)) if address as usize + data.len() <= device.memory.len() => {
                    device.registered.push((address as usize, data.to_vec()));
                    STATUS_OK
                }
                _ => STATUS_RANGE_ERROR,
            },
            INSTR_ACTION => {
                for (address, data) in std::mem::take(&mut device.registered) {
                    device.write(address, &data);
                }
                STATUS_OK
            }
            INSTR_RESET => {
                *device = fresh;
                STATUS_OK
            }
            _ => return None,
        };

        self.rekey(id);
        if broadcast {
            None
        } else {
            Some((status, Vec::new()))
        }
    }

    /// Move a device whose id field was rewritten.
    fn rekey(&mut self, id: u8) {
        let Some(field) = self.variant.memory_map.field_named(ID_FIELD) else {
            return;
        };
        let address = field.address as usize;
        let new_id = match self.devices.get(&id).and_then(|d| d.memory.get(address)) {
            Some(&new_id) if new_id != id && new_id != BROADCAST_ID => new_id,
            _ => return,
        };
        if let Some(device) = self.devices.remove(&id) {
            self.devices.insert(new_id, device);
        }
    }
}

/// Shared handle to a simulated bus.
#[derive(Clone)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimulatedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedBus")
            .field("variant", &state.variant.kind)
            .field("devices", &state.devices.keys().collect::<Vec<_>>())
            .field("open", &state.open)
            .finish()
    }
}

impl SimulatedBus {
    /// Create an empty bus speaking `kind`.
    pub fn new(kind: VariantKind) -> ProtocolResult<Self> {
        let state = SimState {
            variant: ProtocolVariant::select(kind)?,
            endian: Endian::Little,
            devices: BTreeMap::new(),
            open: false,
            unplugged: false,
            rx: VecDeque::new(),
            reader: FrameReader::new(),
            written: Vec::new(),
            noise: Vec::new(),
            corrupt_next: false,
            max_idle: Duration::from_millis(1),
        };
        Ok(SimulatedBus {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Add devices with zeroed memory and their id field set.
    pub fn with_devices(self, ids: impl IntoIterator<Item = u8>) -> Self {
        for id in ids {
            self.add_device(id);
        }
        self
    }

    /// Cap how long an idle read really waits, regardless of the requested timeout.
    pub fn with_max_idle(self, max_idle: Duration) -> Self {
        self.state.lock().max_idle = max_idle;
        self
    }

    /// Set the byte order used by [`set_field`](Self::set_field) and [`field`](Self::field).
    pub fn with_endian(self, endian: Endian) -> Self {
        self.state.lock().endian = endian;
        self
    }

    /// Add or replace a device.
    pub fn add_device(&self, device_id: u8) {
        let mut state = self.state.lock();
        let device = state.new_device(device_id);
        state.devices.insert(device_id, device);
    }

    /// Remove a device.
    pub fn remove_device(&self, device_id: u8) {
        self.state.lock().devices.remove(&device_id);
    }

    /// Ids of the devices on the bus.
    pub fn device_ids(&self) -> Vec<u8> {
        self.state.lock().devices.keys().copied().collect()
    }

    /// Switch the variant devices speak. Existing memory images are rebuilt.
    pub fn set_variant(&self, kind: VariantKind) -> ProtocolResult<()> {
        let variant = ProtocolVariant::select(kind)?;
        let mut state = self.state.lock();
        state.variant = variant;
        let ids: Vec<u8> = state.devices.keys().copied().collect();
        for id in ids {
            let device = state.new_device(id);
            state.devices.insert(id, device);
        }
        Ok(())
    }

    /// Store a value in a device's memory image.
    pub fn set_field(&self, device_id: u8, name: &str, value: impl Into<FieldValue>) -> ProtocolResult<()> {
        let mut state = self.state.lock();
        let field = state
            .variant
            .memory_map
            .field_named(name)
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))?;
        let bytes = field.encode(&value.into(), state.endian)?;
        let address = field.address as usize;
        if let Some(device) = state.devices.get_mut(&device_id) {
            device.write(address, &bytes);
        }
        Ok(())
    }

    /// Read a value from a device's memory image.
    pub fn field(&self, device_id: u8, name: &str) -> Option<FieldValue> {
        let state = self.state.lock();
        let field = state.variant.memory_map.field_named(name)?;
        let device = state.devices.get(&device_id)?;
        field
            .decode(&device.memory[field.address as usize..], state.endian)
            .ok()
    }

    /// Copy of a device's memory image.
    pub fn memory(&self, device_id: u8) -> Option<Vec<u8>> {
        self.state.lock().devices.get(&device_id).map(|d| d.memory.clone())
    }

    /// Put raw bytes on the line, ahead of anything not yet read.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Put a frame from another party on the line.
    pub fn inject_frame(&self, device_id: u8, instruction: u8, payload: &[u8]) -> ProtocolResult<()> {
        let bytes = encode_frame(device_id, instruction, payload)?;
        self.inject(&bytes);
        Ok(())
    }

    /// Emit `bytes` immediately before the next answer.
    pub fn queue_noise(&self, bytes: &[u8]) {
        self.state.lock().noise.extend_from_slice(bytes);
    }

    /// Damage the checksum of the next answer.
    pub fn corrupt_next_reply(&self) {
        self.state.lock().corrupt_next = true;
    }

    /// Make every later read and write fail, as if the adapter was removed.
    pub fn unplug(&self) {
        self.state.lock().unplugged = true;
    }

    /// Every chunk written to the bus so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Bytes waiting to be read.
    pub fn pending_input(&self) -> usize {
        self.state.lock().rx.len()
    }
}

fn unplugged_error() -> TransportError {
    TransportError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "simulated adapter removed"))
}

impl Transport for SimulatedBus {
    fn open(&mut self, name: &str, baud_rate: u32) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.unplugged {
            return Err(TransportError::Open {
                port: name.to_string(),
                reason: "simulated adapter removed".to_string(),
            });
        }
        tracing::trace!("simulated bus opened as {} at {} baud", name, baud_rate);
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn read_byte(&mut self, timeout: Duration) -> TransportResult<Option<u8>> {
        let idle = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            if state.unplugged {
                return Err(unplugged_error());
            }
            if let Some(byte) = state.rx.pop_front() {
                return Ok(Some(byte));
            }
            timeout.min(state.max_idle)
        };
        std::thread::sleep(idle);
        Ok(None)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.unplugged {
            return Err(unplugged_error());
        }
        state.written.push(bytes.to_vec());
        let frames = state.reader.push(bytes);
        for frame in &frames {
            state.handle(frame);
        }
        Ok(())
    }

    fn flush_input(&mut self) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servobus_protocol::FrameReader;

    fn opened(bus: &SimulatedBus) -> SimulatedBus {
        let mut handle = bus.clone();
        handle.open("sim", 1_000_000).unwrap();
        handle
    }

    fn drain(bus: &mut SimulatedBus) -> Vec<Frame> {
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        while let Some(byte) = bus.read_byte(Duration::ZERO).unwrap() {
            frames.extend(reader.push_byte(byte));
        }
        frames
    }

    #[test]
    fn test_ping_answers() {
        let bus = SimulatedBus::new(VariantKind::RobotisServo).unwrap().with_devices([1, 4]);
        let mut handle = opened(&bus);

        handle.write_bytes(&encode_frame(4, 0x01, &[]).unwrap()).unwrap();
        let frames = drain(&mut handle);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].device_id, 4);

        handle.write_bytes(&encode_frame(BROADCAST_ID, 0x01, &[]).unwrap()).unwrap();
        let ids: Vec<u8> = drain(&mut handle).iter().map(|f| f.device_id).collect();
        assert_eq!(ids, vec![1, 4]);

        handle.write_bytes(&encode_frame(9, 0x01, &[]).unwrap()).unwrap();
        assert!(drain(&mut handle).is_empty());
    }

    #[test]
    fn test_read_write_memory() {
        let bus = SimulatedBus::new(VariantKind::RobotisServo).unwrap().with_devices([2]);
        bus.set_field(2, "GoalPosition", 512i64).unwrap();
        let mut handle = opened(&bus);

        handle.write_bytes(&encode_frame(2, 0x02, &[30, 2]).unwrap()).unwrap();
        let frames = drain(&mut handle);
        assert_eq!(frames[0].payload, vec![0x00, 0x02]);

        handle.write_bytes(&encode_frame(2, 0x03, &[30, 0x10, 0x00]).unwrap()).unwrap();
        assert_eq!(drain(&mut handle).len(), 1);
        assert_eq!(bus.field(2, "GoalPosition"), Some(FieldValue::Int(16)));
    }

    #[test]
    fn test_registered_write_waits_for_action() {
        let bus = SimulatedBus::new(VariantKind::RobotisServo).unwrap().with_devices([1]);
        let mut handle = opened(&bus);

        handle.write_bytes(&encode_frame(1, 0x04, &[25, 1]).unwrap()).unwrap();
        drain(&mut handle);
        assert_eq!(bus.field(1, "LED"), Some(FieldValue::Int(0)));

        handle.write_bytes(&encode_frame(BROADCAST_ID, 0x05, &[]).unwrap()).unwrap();
        assert!(drain(&mut handle).is_empty());
        assert_eq!(bus.field(1, "LED"), Some(FieldValue::Int(1)));
    }

    #[test]
    fn test_id_write_moves_device() {
        let bus = SimulatedBus::new(VariantKind::RobotisServo).unwrap().with_devices([1]);
        let mut handle = opened(&bus);

        handle.write_bytes(&encode_frame(1, 0x03, &[3, 7]).unwrap()).unwrap();
        assert_eq!(bus.device_ids(), vec![7]);
    }

    #[test]
    fn test_unplugged() {
        let bus = SimulatedBus::new(VariantKind::RobotisServo).unwrap();
        let mut handle = opened(&bus);
        bus.unplug();
        assert!(matches!(handle.read_byte(Duration::ZERO), Err(TransportError::Io(_))));
        assert!(matches!(handle.write_bytes(&[0]), Err(TransportError::Io(_))));
    }
}
