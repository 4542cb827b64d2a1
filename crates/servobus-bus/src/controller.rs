//! Bus controller.
//!
//! [`BusController`] owns the link to the bus: the transport, the single
//! [`FrameReader`] and the [`CorrelationTracker`]. A mutex guards all three
//! for the whole of a send-then-receive exchange, so the background
//! [`Listener`] and foreground requests never interleave on the wire.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use servobus_protocol::{
    DecodedField, FieldDescriptor, FieldValue, Frame, FrameReader, InstructionRef, ProtocolError,
    ProtocolVariant, VariantKind, BROADCAST_ID, ID_FIELD, INSTR_ACTION, INSTR_PING, INSTR_READ,
    INSTR_REG_WRITE, INSTR_RESET, INSTR_WRITE, MAX_FRAME_LEN, MAX_PAYLOAD_LEN,
};

use crate::config::BusConfig;
use crate::correlation::{CorrelationTracker, Direction, Observation};
use crate::error::{BusError, BusResult, TransportError};
use crate::events::{BusEvent, EventSink, Severity};
use crate::listener::Listener;
use crate::metrics::metric_defs;
use crate::scan::AdaptiveScan;
use crate::transport::{SerialTransport, Transport};

/// Largest memory address a request can carry.
const MAX_ADDRESS: u16 = u8::MAX as u16;

// ============================================================================
// Link
// ============================================================================

/// Everything that must change together under the bus lock.
struct Link {
    transport: Box<dyn Transport>,
    reader: FrameReader,
    tracker: CorrelationTracker,
    variant: Arc<ProtocolVariant>,
}

struct Shared {
    link: Mutex<Link>,
    config: BusConfig,
    events: EventSink,
    discovered: Mutex<BTreeSet<u8>>,
}

/// Shared handle to one bus.
///
/// Cloning is cheap; clones drive the same link.
#[derive(Clone)]
pub struct BusController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BusController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusController")
            .field("config", &self.shared.config)
            .field("discovered", &self.discovered_devices())
            .finish()
    }
}

impl BusController {
    /// Create a controller over `transport`. The link starts closed.
    pub fn new(config: BusConfig, transport: impl Transport + 'static) -> BusResult<Self> {
        let variant = ProtocolVariant::select(config.variant)?;
        let link = Link {
            transport: Box::new(transport),
            reader: FrameReader::new(),
            tracker: CorrelationTracker::new(),
            variant: Arc::new(variant),
        };
        Ok(BusController {
            shared: Arc::new(Shared {
                link: Mutex::new(link),
                events: EventSink::new(config.event_capacity),
                config,
                discovered: Mutex::new(BTreeSet::new()),
            }),
        })
    }

    /// Create a controller over a local serial port.
    pub fn serial(config: BusConfig) -> BusResult<Self> {
        Self::new(config, SerialTransport::new())
    }

    /// The configuration the controller was built with.
    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// The active protocol variant.
    pub fn variant(&self) -> Arc<ProtocolVariant> {
        self.shared.link.lock().variant.clone()
    }

    /// A receiving end of the event queue.
    pub fn events(&self) -> Receiver<BusEvent> {
        self.shared.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Open the link.
    pub fn open(&self, name: &str, baud_rate: u32) -> BusResult<()> {
        let mut link = self.shared.link.lock();
        if let Err(e) = link.transport.open(name, baud_rate) {
            self.shared.events.diagnostic(Severity::Error, e.to_string());
            return Err(e.into());
        }
        link.reader.reset();
        link.tracker.reset();
        self.shared.events.diagnostic(
            Severity::Info,
            format!("connected to {} with {} baud", name, baud_rate),
        );
        Ok(())
    }

    /// Open the port named in the configuration.
    pub fn open_configured(&self) -> BusResult<()> {
        let config = &self.shared.config;
        self.open(&config.port, config.baud_rate)
    }

    /// Close the link. A running listener stops at its next receive cycle.
    pub fn close(&self) {
        let mut link = self.shared.link.lock();
        if link.transport.is_open() {
            link.transport.close();
            self.shared.events.diagnostic(Severity::Info, "connection closed");
        }
        link.reader.reset();
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.shared.link.lock().transport.is_open()
    }

    /// Switch the protocol variant.
    ///
    /// The new variant is built before taking the lock; an exchange in
    /// progress completes under the old one.
    pub fn select_variant(&self, kind: VariantKind) -> BusResult<()> {
        let variant = Arc::new(ProtocolVariant::select(kind)?);
        let mut link = self.shared.link.lock();
        link.variant = variant;
        link.tracker.reset();
        link.reader.reset();
        drop(link);
        self.shared
            .events
            .diagnostic(Severity::Info, format!("protocol variant set to {}", kind));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Exchanges
    // ------------------------------------------------------------------------

    /// Send a request and run one receive cycle for its answer.
    pub fn send_request(
        &self,
        device_id: u8,
        instruction: impl Into<InstructionRef>,
        payload: &[u8],
    ) -> BusResult<Option<Observation>> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        self.exchange(&mut link, device_id, &instruction.into(), payload)
    }

    /// Run one receive cycle: the next frame, or `None` on timeout.
    pub fn receive(&self) -> BusResult<Option<Observation>> {
        let mut link = self.shared.link.lock();
        self.receive_cycle(&mut link)
    }

    /// Write caller-supplied bytes as-is, then run one receive cycle.
    pub fn send_raw(&self, bytes: &[u8]) -> BusResult<Option<Observation>> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        self.transmit(&mut link, bytes)?;
        self.receive_cycle(&mut link)
    }

    fn exchange(
        &self,
        link: &mut Link,
        device_id: u8,
        instruction: &InstructionRef,
        payload: &[u8],
    ) -> BusResult<Option<Observation>> {
        let bytes = link.variant.encode_request(device_id, instruction, payload)?;
        self.transmit(link, &bytes)?;
        self.receive_cycle(link)
    }

    fn ensure_may_transmit(&self) -> BusResult<()> {
        if self.shared.config.listen_only {
            return Err(BusError::ListenOnly);
        }
        Ok(())
    }

    fn transmit(&self, link: &mut Link, bytes: &[u8]) -> BusResult<()> {
        if !link.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        tracing::trace!("sending {}", hex::encode(bytes));
        let variant = link.variant.clone();
        for frame in FrameReader::new().push(bytes) {
            link.tracker.observe(&frame, Direction::Outbound, &variant);
        }

        let written = link
            .transport
            .flush_input()
            .and_then(|_| link.transport.write_bytes(bytes));
        if let Err(e) = written {
            self.fail_link(link, &e);
            return Err(e.into());
        }
        link.reader.reset();

        metric_defs::FRAMES_SENT.increment(1);
        self.shared.events.emit(BusEvent::FrameSent {
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn receive_cycle(&self, link: &mut Link) -> BusResult<Option<Observation>> {
        if !link.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }
        let timeout = self.shared.config.byte_timeout();
        let discarded_before = link.reader.discarded();

        loop {
            match link.transport.read_byte(timeout) {
                Ok(Some(byte)) => {
                    if let Some(frame) = link.reader.push_byte(byte) {
                        return Ok(Some(self.handle_frame(link, frame)));
                    }
                    // A stream that never frames, e.g. at the wrong baud rate.
                    if link.reader.discarded() - discarded_before > MAX_FRAME_LEN as u64 {
                        link.reader.reset();
                        metric_defs::READER_TIMEOUTS.increment(1);
                        self.shared.events.diagnostic(
                            Severity::Warn,
                            format!("no frame in {} received bytes", MAX_FRAME_LEN),
                        );
                        return Ok(None);
                    }
                }
                Ok(None) => {
                    if link.reader.buffered_len() > 0 {
                        tracing::debug!(
                            "receive timed out after {:?} with a partial frame",
                            timeout
                        );
                    }
                    link.reader.reset();
                    metric_defs::READER_TIMEOUTS.increment(1);
                    return Ok(None);
                }
                Err(e) => {
                    self.fail_link(link, &e);
                    return Err(e.into());
                }
            }
        }
    }

    fn fail_link(&self, link: &mut Link, error: &TransportError) {
        link.transport.close();
        link.reader.reset();
        self.shared
            .events
            .diagnostic(Severity::Error, format!("connection lost: {}", error));
    }

    fn handle_frame(&self, link: &mut Link, frame: Frame) -> Observation {
        tracing::trace!("received {}", hex::encode(&frame.raw));
        metric_defs::FRAMES_RECEIVED.increment(1);

        let variant = link.variant.clone();
        let observation = link.tracker.observe(&frame, Direction::Inbound, &variant);
        self.shared.events.emit(BusEvent::FrameReceived { bytes: frame.raw });

        match &observation {
            Observation::DeviceDiscovered { device_id } if *device_id != BROADCAST_ID => {
                self.register(*device_id);
                metric_defs::DEVICES_DISCOVERED.increment(1);
                self.shared.events.emit(BusEvent::DeviceDiscovered {
                    device_id: *device_id,
                });
            }
            Observation::FieldData {
                device_id,
                address,
                payload,
            } => {
                if self.register(*device_id) {
                    self.shared.events.emit(BusEvent::DeviceDiscovered {
                        device_id: *device_id,
                    });
                }
                self.shared.events.emit(BusEvent::FieldData {
                    device_id: *device_id,
                    address: *address,
                    payload: payload.clone(),
                });
            }
            Observation::ChecksumError {
                device_id,
                received,
                computed,
            } => {
                metric_defs::CHECKSUM_ERRORS.increment(1);
                self.shared.events.diagnostic(
                    Severity::Warn,
                    format!(
                        "checksum error in answer from id {}: {:02x} != {:02x}",
                        device_id, received, computed
                    ),
                );
            }
            Observation::DeviceDiscovered { .. }
            | Observation::Request { .. }
            | Observation::Status { .. } => {}
        }

        observation
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Adaptive broadcast scan; returns the ids that answered.
    pub fn scan_bus(&self) -> BusResult<Vec<u8>> {
        self.ensure_may_transmit()?;
        let config = &self.shared.config;
        self.shared
            .events
            .diagnostic(Severity::Info, "start scanning for devices");

        let mut scan = AdaptiveScan::new(
            config.byte_timeout(),
            config.probe_unit(),
            config.max_device_id,
        );

        let mut link = self.shared.link.lock();
        let bytes = link
            .variant
            .encode_request(BROADCAST_ID, &INSTR_PING.into(), &[])?;
        self.transmit(&mut link, &bytes)?;

        let mut observation = self.receive_cycle(&mut link)?;
        loop {
            match observation {
                Some(Observation::DeviceDiscovered { device_id }) if device_id != BROADCAST_ID => {
                    scan.record_device(device_id)
                }
                Some(_) => scan.record_activity(),
                None => scan.record_timeout(),
            }
            if scan.is_finished() {
                break;
            }
            observation = self.receive_cycle(&mut link)?;
        }
        drop(link);

        let found = scan.into_found();
        self.shared.events.diagnostic(
            Severity::Info,
            format!("scan finished, {} device(s) found", found.len()),
        );
        Ok(found)
    }

    /// Ping every id in the configured range one at a time.
    pub fn scan_bus_exhaustive(&self) -> BusResult<Vec<u8>> {
        let config = &self.shared.config;
        let last = config.max_device_id.min(BROADCAST_ID - 1);
        self.ping_devices(config.min_device_id..=last)
    }

    /// Ping one device.
    pub fn ping(&self, device_id: u8) -> BusResult<bool> {
        let observation = self.send_request(device_id, INSTR_PING, &[])?;
        Ok(matches!(
            observation,
            Some(Observation::DeviceDiscovered { device_id: id }) if id == device_id
        ))
    }

    /// Ping several devices; returns those that answered.
    pub fn ping_devices(&self, device_ids: impl IntoIterator<Item = u8>) -> BusResult<Vec<u8>> {
        let mut found = Vec::new();
        for device_id in device_ids {
            if self.ping(device_id)? {
                found.push(device_id);
            }
        }
        Ok(found)
    }

    /// Ids that answered a ping or a read since they were last forgotten.
    pub fn discovered_devices(&self) -> Vec<u8> {
        self.shared.discovered.lock().iter().copied().collect()
    }

    /// Remove a device from the registry.
    pub fn forget_device(&self, device_id: u8) -> bool {
        self.shared.discovered.lock().remove(&device_id)
    }

    /// Add a device to the registry; the broadcast id is never a device.
    fn register(&self, device_id: u8) -> bool {
        if device_id == BROADCAST_ID {
            return false;
        }
        let added = self.shared.discovered.lock().insert(device_id);
        if added {
            self.shared.events.diagnostic(
                Severity::Info,
                format!("found device with id {}", device_id),
            );
        }
        added
    }

    // ------------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------------

    /// Read `length` bytes of device memory. `None` if no data answer arrived.
    pub fn read_memory(&self, device_id: u8, address: u16, length: usize) -> BusResult<Option<Vec<u8>>> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        self.read_locked(&mut link, device_id, address, length)
    }

    /// Read one scalar field.
    ///
    /// The field is resolved under the same lock as the exchange, so a
    /// concurrent variant switch cannot pair its address with another table.
    pub fn read_field(&self, device_id: u8, name: &str) -> BusResult<Option<FieldValue>> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        let variant = link.variant.clone();
        let field = lookup(&variant, name)?;
        if !field.is_scalar() {
            return Err(ProtocolError::UnsupportedFeature {
                field: field.name.clone(),
                element_count: field.element_count,
            }
            .into());
        }

        match self.read_locked(&mut link, device_id, field.address, field.size() as usize)? {
            Some(payload) => Ok(Some(field.decode(&payload, self.shared.config.endian)?)),
            None => Ok(None),
        }
    }

    /// Read the whole memory map, split at field boundaries so every answer
    /// fits in one frame. Chunks that get no answer are left out.
    pub fn read_all_fields(&self, device_id: u8) -> BusResult<Vec<DecodedField>> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        let variant = link.variant.clone();
        let mut decoded = Vec::new();

        for (address, length) in field_chunks(variant.memory_map.fields(), MAX_PAYLOAD_LEN) {
            match self.read_locked(&mut link, device_id, address, length)? {
                Some(payload) => decoded.extend(variant.memory_map.decode_block(
                    address,
                    &payload,
                    self.shared.config.endian,
                )),
                None => self.shared.events.diagnostic(
                    Severity::Warn,
                    format!("no answer from id {} reading {} bytes at {}", device_id, length, address),
                ),
            }
        }

        Ok(decoded)
    }

    /// Read the whole memory map of several devices.
    pub fn read_all_devices(
        &self,
        device_ids: impl IntoIterator<Item = u8>,
    ) -> BusResult<BTreeMap<u8, Vec<DecodedField>>> {
        let mut all = BTreeMap::new();
        for device_id in device_ids {
            all.insert(device_id, self.read_all_fields(device_id)?);
        }
        Ok(all)
    }

    /// Read the same memory range from several devices; only answers are returned.
    pub fn read_memory_devices(
        &self,
        device_ids: impl IntoIterator<Item = u8>,
        address: u16,
        length: usize,
    ) -> BusResult<BTreeMap<u8, Vec<u8>>> {
        let mut all = BTreeMap::new();
        for device_id in device_ids {
            if let Some(payload) = self.read_memory(device_id, address, length)? {
                all.insert(device_id, payload);
            }
        }
        Ok(all)
    }

    /// Write bytes to device memory; true if the device acknowledged.
    pub fn write_memory(&self, device_id: u8, address: u16, bytes: &[u8]) -> BusResult<bool> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        self.write_locked(&mut link, INSTR_WRITE, device_id, address, bytes)
    }

    /// Write the same bytes to several devices; returns those that acknowledged.
    pub fn write_memory_devices(
        &self,
        device_ids: impl IntoIterator<Item = u8>,
        address: u16,
        bytes: &[u8],
    ) -> BusResult<Vec<u8>> {
        let mut acknowledged = Vec::new();
        for device_id in device_ids {
            if self.write_memory(device_id, address, bytes)? {
                acknowledged.push(device_id);
            }
        }
        Ok(acknowledged)
    }

    /// Write one writable field.
    ///
    /// Writing the id field is refused when the new id already belongs to
    /// another discovered device. An acknowledged id change moves the device
    /// in the registry.
    pub fn write_field(&self, device_id: u8, name: &str, value: &FieldValue) -> BusResult<bool> {
        self.write_field_with(INSTR_WRITE, device_id, name, value)
    }

    /// Register a field write, applied when [`action`](Self::action) is sent.
    pub fn write_field_registered(&self, device_id: u8, name: &str, value: &FieldValue) -> BusResult<bool> {
        self.write_field_with(INSTR_REG_WRITE, device_id, name, value)
    }

    /// Broadcast `ACTION`, committing every registered write.
    pub fn action(&self) -> BusResult<()> {
        self.send_request(BROADCAST_ID, INSTR_ACTION, &[])?;
        Ok(())
    }

    /// Factory-reset a device; true if it acknowledged.
    pub fn reset_device(&self, device_id: u8) -> BusResult<bool> {
        self.shared
            .events
            .diagnostic(Severity::Info, format!("resetting device id {}", device_id));
        let observation = self.send_request(device_id, INSTR_RESET, &[])?;
        Ok(acknowledged(&observation, device_id))
    }

    /// Reset several devices; returns those that acknowledged.
    pub fn reset_devices(&self, device_ids: impl IntoIterator<Item = u8>) -> BusResult<Vec<u8>> {
        let mut acknowledged = Vec::new();
        for device_id in device_ids {
            if self.reset_device(device_id)? {
                acknowledged.push(device_id);
            }
        }
        Ok(acknowledged)
    }

    fn write_field_with(
        &self,
        instruction: &str,
        device_id: u8,
        name: &str,
        value: &FieldValue,
    ) -> BusResult<bool> {
        self.ensure_may_transmit()?;
        let mut link = self.shared.link.lock();
        let variant = link.variant.clone();
        let field = lookup(&variant, name)?;
        if !field.writable {
            return Err(BusError::ReadOnlyField(field.name.clone()));
        }
        let bytes = field.encode(value, self.shared.config.endian)?;

        let new_id = match value.as_i64().and_then(|v| u8::try_from(v).ok()) {
            Some(new_id) if field.name == ID_FIELD && new_id != device_id => Some(new_id),
            _ => None,
        };
        if let Some(new_id) = new_id {
            if self.shared.discovered.lock().contains(&new_id) {
                return Err(BusError::DuplicateDeviceId(new_id));
            }
        }

        let acknowledged = self.write_locked(&mut link, instruction, device_id, field.address, &bytes)?;
        drop(link);

        if acknowledged && instruction == INSTR_WRITE {
            if let Some(new_id) = new_id {
                self.forget_device(device_id);
                self.register(new_id);
            }
        }
        Ok(acknowledged)
    }

    fn read_locked(
        &self,
        link: &mut Link,
        device_id: u8,
        address: u16,
        length: usize,
    ) -> BusResult<Option<Vec<u8>>> {
        if address > MAX_ADDRESS || length > MAX_PAYLOAD_LEN {
            return Err(BusError::AddressOutOfRange { address, length });
        }
        tracing::debug!("reading {} bytes at {} from id {}", length, address, device_id);

        let payload = [address as u8, length as u8];
        let observation = self.exchange(link, device_id, &INSTR_READ.into(), &payload)?;
        match observation {
            Some(Observation::FieldData {
                device_id: id,
                address: at,
                payload,
            }) if id == device_id && at == address => Ok(Some(payload)),
            _ => Ok(None),
        }
    }

    fn write_locked(
        &self,
        link: &mut Link,
        instruction: &str,
        device_id: u8,
        address: u16,
        bytes: &[u8],
    ) -> BusResult<bool> {
        if address > MAX_ADDRESS || bytes.len() >= MAX_PAYLOAD_LEN {
            return Err(BusError::AddressOutOfRange {
                address,
                length: bytes.len(),
            });
        }
        tracing::debug!("writing {} bytes at {} to id {}", bytes.len(), address, device_id);

        let mut payload = Vec::with_capacity(bytes.len() + 1);
        payload.push(address as u8);
        payload.extend_from_slice(bytes);
        let observation = self.exchange(link, device_id, &instruction.into(), &payload)?;
        Ok(acknowledged(&observation, device_id))
    }

    // ------------------------------------------------------------------------
    // Background listening
    // ------------------------------------------------------------------------

    /// Start a thread that runs receive cycles until stopped or the link fails.
    pub fn start_listening(&self) -> BusResult<Listener> {
        Listener::spawn(self.clone())
    }

    pub(crate) fn report(&self, severity: Severity, message: String) {
        self.shared.events.diagnostic(severity, message);
    }
}

fn lookup<'a>(variant: &'a ProtocolVariant, name: &str) -> BusResult<&'a FieldDescriptor> {
    variant
        .memory_map
        .field_named(name)
        .ok_or_else(|| ProtocolError::UnknownField(name.to_string()).into())
}

/// Whether an observation acknowledges a request addressed to `device_id`.
fn acknowledged(observation: &Option<Observation>, device_id: u8) -> bool {
    match observation {
        Some(Observation::FieldData { device_id: id, .. }) => *id == device_id,
        Some(Observation::Status { device_id: id, status }) => *id == device_id && *status == 0,
        _ => false,
    }
}

/// Split a memory map into `(address, length)` reads of at most `max_len`
/// bytes, each starting and ending on a field boundary.
fn field_chunks(fields: &[FieldDescriptor], max_len: usize) -> Vec<(u16, usize)> {
    let mut chunks = Vec::new();
    let mut start: Option<(u16, usize)> = None;

    for field in fields {
        let size = field.size() as usize;
        start = match start {
            Some((address, length)) if length + size <= max_len => Some((address, length + size)),
            Some(chunk) => {
                chunks.push(chunk);
                Some((field.address, size))
            }
            None => Some((field.address, size)),
        };
    }
    chunks.extend(start);
    chunks
}

/// Parse hand-entered payload bytes such as `"0a ff 1e # comment"`.
///
/// Whitespace is ignored and everything after `#` is a comment.
pub fn parse_hex_payload(text: &str) -> BusResult<Vec<u8>> {
    let data = text.split('#').next().unwrap_or_default();
    let digits: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(digits)?)
}
