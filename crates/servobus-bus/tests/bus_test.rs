//! Integration tests for the bus controller over a simulated bus.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use servobus_bus::{
    BusConfig, BusController, BusError, BusEvent, Observation, Severity, SimulatedBus,
    TransportError,
};
use servobus_protocol::{encode_frame, FieldValue, ProtocolError, VariantKind, BROADCAST_ID};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A controller with an open link to a simulated bus holding `ids`.
fn setup(kind: VariantKind, ids: &[u8], config: BusConfig) -> (BusController, SimulatedBus) {
    init_tracing();
    let sim = SimulatedBus::new(kind).unwrap().with_devices(ids.iter().copied());
    let bus = BusController::new(config.with_variant(kind), sim.clone()).unwrap();
    bus.open("sim", 1_000_000).unwrap();
    (bus, sim)
}

fn robotis(ids: &[u8]) -> (BusController, SimulatedBus) {
    setup(
        VariantKind::RobotisServo,
        ids,
        BusConfig::default().with_byte_timeout_ms(5),
    )
}

fn drain(events: &Receiver<BusEvent>) -> Vec<BusEvent> {
    events.try_iter().collect()
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_scan_finds_devices() {
    let (bus, _sim) = robotis(&[1, 3, 200]);
    let events = bus.events();

    assert_eq!(bus.scan_bus().unwrap(), vec![1, 3, 200]);
    assert_eq!(bus.discovered_devices(), vec![1, 3, 200]);

    let discovered: Vec<u8> = drain(&events)
        .into_iter()
        .filter_map(|e| match e {
            BusEvent::DeviceDiscovered { device_id } => Some(device_id),
            _ => None,
        })
        .collect();
    assert_eq!(discovered, vec![1, 3, 200]);
}

#[test]
fn test_scan_silent_bus_terminates() {
    let (bus, sim) = setup(VariantKind::RobotisServo, &[], BusConfig::default());

    let started = Instant::now();
    assert!(bus.scan_bus().unwrap().is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sim.written().len(), 1);
}

#[test]
fn test_exhaustive_scan() {
    let (bus, sim) = setup(
        VariantKind::RobotisServo,
        &[2, 7],
        BusConfig::default()
            .with_byte_timeout_ms(2)
            .with_device_range(0, 10),
    );

    assert_eq!(bus.scan_bus_exhaustive().unwrap(), vec![2, 7]);
    assert_eq!(sim.written().len(), 11);
}

#[test]
fn test_ping_and_forget() {
    let (bus, _sim) = robotis(&[4]);

    assert!(bus.ping(4).unwrap());
    assert!(!bus.ping(5).unwrap());
    assert_eq!(bus.ping_devices([3, 4, 5]).unwrap(), vec![4]);

    assert!(bus.forget_device(4));
    assert!(bus.discovered_devices().is_empty());
}

#[test]
fn test_broadcast_id_is_never_registered() {
    let (bus, sim) = robotis(&[]);
    let events = bus.events();

    assert!(!bus.write_memory(BROADCAST_ID, 25, &[1]).unwrap());
    sim.inject_frame(3, 0x00, &[]).unwrap();

    assert!(matches!(
        bus.receive().unwrap(),
        Some(Observation::FieldData { device_id: BROADCAST_ID, address: 25, .. })
    ));
    assert!(bus.discovered_devices().is_empty());
    assert!(!drain(&events)
        .iter()
        .any(|e| matches!(e, BusEvent::DeviceDiscovered { .. })));
}

// ============================================================================
// Memory access
// ============================================================================

#[test]
fn test_read_and_write_fields() {
    let (bus, sim) = robotis(&[1]);
    sim.set_field(1, "PresentPosition", 300i64).unwrap();

    assert_eq!(bus.read_field(1, "PresentPosition").unwrap(), Some(FieldValue::Int(300)));

    assert!(bus.write_field(1, "GoalPosition", &FieldValue::Int(512)).unwrap());
    assert_eq!(sim.field(1, "GoalPosition"), Some(FieldValue::Int(512)));

    assert!(matches!(
        bus.write_field(1, "PresentPosition", &FieldValue::Int(1)),
        Err(BusError::ReadOnlyField(name)) if name == "PresentPosition"
    ));
    assert!(matches!(
        bus.read_field(1, "Altitude"),
        Err(BusError::Protocol(ProtocolError::UnknownField(_)))
    ));
    assert!(matches!(
        bus.write_field(1, "GoalPosition", &FieldValue::Float(1.5)),
        Err(BusError::Protocol(ProtocolError::TypeMismatch { .. }))
    ));
}

#[test]
fn test_read_emits_field_data() {
    let (bus, sim) = robotis(&[1]);
    sim.set_field(1, "GoalPosition", 0x0123i64).unwrap();
    let events = bus.events();

    assert_eq!(bus.read_memory(1, 30, 2).unwrap(), Some(vec![0x23, 0x01]));

    let events = drain(&events);
    assert!(events.contains(&BusEvent::FieldData {
        device_id: 1,
        address: 30,
        payload: vec![0x23, 0x01],
    }));
    assert!(events.iter().any(|e| matches!(e, BusEvent::FrameSent { .. })));
    assert!(events.iter().any(|e| matches!(e, BusEvent::FrameReceived { .. })));
    assert_eq!(bus.discovered_devices(), vec![1]);
}

#[test]
fn test_read_all_fields_fixed_point() {
    let (bus, sim) = setup(
        VariantKind::DdServo,
        &[1],
        BusConfig::default().with_byte_timeout_ms(5),
    );
    sim.set_field(1, "torqueLimit", 1.5f64).unwrap();
    sim.set_field(1, "actualVoltage", 12.25f64).unwrap();

    let decoded = bus.read_all_fields(1).unwrap();
    assert_eq!(decoded.len(), bus.variant().memory_map.fields().len());

    let value = |name: &str| decoded.iter().find(|d| d.name == name).and_then(|d| d.value().copied());
    assert_eq!(value("servoId"), Some(FieldValue::Int(1)));
    assert_eq!(value("torqueLimit"), Some(FieldValue::Float(1.5)));
    assert_eq!(value("actualVoltage"), Some(FieldValue::Float(12.25)));
}

#[test]
fn test_read_all_fields_reports_arrays() {
    let (bus, _sim) = setup(
        VariantKind::SpiConnector,
        &[2],
        BusConfig::default().with_byte_timeout_ms(5),
    );

    let decoded = bus.read_all_fields(2).unwrap();
    let reserved = decoded.iter().find(|d| d.name == "reservedEEPROM").unwrap();
    assert!(matches!(
        reserved.value,
        Err(ProtocolError::UnsupportedFeature { element_count: 10, .. })
    ));
    let status = decoded.iter().find(|d| d.name == "StatusReturnLevel").unwrap();
    assert_eq!(status.value(), Some(&FieldValue::Int(0)));
}

#[test]
fn test_device_id_change() {
    let (bus, sim) = robotis(&[1, 2]);
    assert_eq!(bus.scan_bus().unwrap(), vec![1, 2]);
    let sent = sim.written().len();

    assert!(matches!(
        bus.write_field(1, "servoId", &FieldValue::Int(2)),
        Err(BusError::DuplicateDeviceId(2))
    ));
    assert!(matches!(
        bus.write_field_registered(1, "servoId", &FieldValue::Int(2)),
        Err(BusError::DuplicateDeviceId(2))
    ));
    assert_eq!(sim.written().len(), sent);
    assert_eq!(sim.device_ids(), vec![1, 2]);

    assert!(bus.write_field(1, "servoId", &FieldValue::Int(5)).unwrap());
    assert_eq!(sim.device_ids(), vec![2, 5]);
    assert_eq!(bus.discovered_devices(), vec![2, 5]);

    // Rewriting a device's own id is not a conflict.
    assert!(bus.write_field(5, "servoId", &FieldValue::Int(5)).unwrap());
    assert!(bus.ping(5).unwrap());
}

#[test]
fn test_registered_write_waits_for_action() {
    let (bus, sim) = robotis(&[1, 2]);

    assert!(bus.write_field_registered(1, "LED", &FieldValue::Int(1)).unwrap());
    assert!(bus.write_field_registered(2, "LED", &FieldValue::Int(1)).unwrap());
    assert_eq!(sim.field(1, "LED"), Some(FieldValue::Int(0)));

    bus.action().unwrap();
    assert_eq!(sim.field(1, "LED"), Some(FieldValue::Int(1)));
    assert_eq!(sim.field(2, "LED"), Some(FieldValue::Int(1)));
}

#[test]
fn test_reset_and_bulk_helpers() {
    let (bus, sim) = robotis(&[1, 2]);

    assert_eq!(bus.write_memory_devices([1, 2, 3], 30, &[0x00, 0x02]).unwrap(), vec![1, 2]);
    let read = bus.read_memory_devices([1, 2, 3], 30, 2).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[&2], vec![0x00, 0x02]);

    assert_eq!(bus.reset_devices([2]).unwrap(), vec![2]);
    assert_eq!(sim.field(2, "GoalPosition"), Some(FieldValue::Int(0)));
    assert_eq!(sim.field(1, "GoalPosition"), Some(FieldValue::Int(512)));

    let all = bus.read_all_devices([1, 2]).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_address_range_checked() {
    let (bus, _sim) = robotis(&[1]);
    assert!(matches!(
        bus.write_memory(1, 300, &[1]),
        Err(BusError::AddressOutOfRange { address: 300, .. })
    ));
    assert!(matches!(
        bus.read_memory(1, 0, 254),
        Err(BusError::AddressOutOfRange { length: 254, .. })
    ));
}

// ============================================================================
// Unreliable bus
// ============================================================================

#[test]
fn test_noise_before_answer() {
    let (bus, sim) = robotis(&[1]);
    sim.queue_noise(&[0x00, 0xFF, 0x13, 0xFF, 0xFF, 0xFF]);
    assert!(bus.ping(1).unwrap());
}

#[test]
fn test_random_line_noise() {
    let (bus, sim) = robotis(&[1, 2]);
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..50 {
        let len = rng.gen_range(0..16);
        let noise: Vec<u8> = (0..len).map(|_| rng.gen_range(0x00..0xFF)).collect();
        sim.queue_noise(&noise);
        let id = rng.gen_range(1..=2);
        assert!(bus.ping(id).unwrap(), "noise {:02x?} hid the answer", noise);
    }
}

#[test]
fn test_garbage_stream_ends_receive_cycle() {
    let (bus, sim) = robotis(&[]);
    let events = bus.events();
    sim.inject(&[0x00; 1000]);

    assert_eq!(bus.receive().unwrap(), None);
    assert_eq!(sim.pending_input(), 740);
    assert!(drain(&events).iter().any(|e| matches!(
        e,
        BusEvent::Diagnostic { severity: Severity::Warn, .. }
    )));
}

#[test]
fn test_listener_stops_during_garbage_stream() {
    let (bus, sim) = robotis(&[]);
    sim.inject(&vec![0x55; 2_000_000]);
    let listener = bus.start_listening().unwrap();
    std::thread::sleep(Duration::from_millis(5));

    let started = Instant::now();
    listener.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(sim.pending_input() > 0);
}

#[test]
fn test_checksum_error_is_diagnostic_only() {
    let (bus, sim) = robotis(&[1]);
    let events = bus.events();
    sim.corrupt_next_reply();

    let observation = bus.send_request(1, "PING", &[]).unwrap();
    assert!(matches!(observation, Some(Observation::ChecksumError { device_id: 1, .. })));
    assert!(bus.discovered_devices().is_empty());

    let events = drain(&events);
    assert!(events.iter().any(|e| matches!(
        e,
        BusEvent::Diagnostic { severity: Severity::Warn, .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, BusEvent::DeviceDiscovered { .. })));
}

#[test]
fn test_foreign_traffic_is_attributed() {
    let (bus, sim) = robotis(&[]);
    sim.inject_frame(7, 0x02, &[30, 2]).unwrap();
    sim.inject_frame(7, 0x00, &[0x10, 0x00]).unwrap();

    match bus.receive().unwrap() {
        Some(Observation::Request { request, outbound }) => {
            assert!(!outbound);
            assert_eq!(request.target_id, 7);
            assert_eq!(request.address, 30);
        }
        other => panic!("expected a foreign request, got {:?}", other),
    }
    assert_eq!(
        bus.receive().unwrap(),
        Some(Observation::FieldData {
            device_id: 7,
            address: 30,
            payload: vec![0x10, 0x00]
        })
    );
    assert_eq!(bus.receive().unwrap(), None);
}

#[test]
fn test_send_raw() {
    let (bus, _sim) = robotis(&[1]);

    let frame = encode_frame(1, 0x01, &[]).unwrap();
    assert_eq!(
        bus.send_raw(&frame).unwrap(),
        Some(Observation::DeviceDiscovered { device_id: 1 })
    );
    assert_eq!(bus.send_raw(&[0x12, 0x34]).unwrap(), None);
}

// ============================================================================
// Modes and lifecycle
// ============================================================================

#[test]
fn test_listen_only_rejects_writes() {
    let (bus, sim) = setup(
        VariantKind::RobotisServo,
        &[1],
        BusConfig::default().with_byte_timeout_ms(5).with_listen_only(true),
    );

    assert!(matches!(bus.ping(1), Err(BusError::ListenOnly)));
    assert!(matches!(bus.scan_bus(), Err(BusError::ListenOnly)));
    assert!(matches!(bus.send_raw(&[0xFF]), Err(BusError::ListenOnly)));
    assert!(sim.written().is_empty());
    assert_eq!(bus.receive().unwrap(), None);
}

#[test]
fn test_variant_switch() {
    let (bus, sim) = robotis(&[1]);
    sim.set_variant(VariantKind::DdServo).unwrap();

    assert!(!bus.ping(1).unwrap());

    bus.select_variant(VariantKind::DdServo).unwrap();
    assert_eq!(bus.variant().kind, VariantKind::DdServo);
    assert!(bus.ping(1).unwrap());
    assert!(matches!(
        bus.write_field_registered(1, "desiredPosition", &FieldValue::Float(1.0)),
        Err(BusError::Protocol(ProtocolError::UnknownInstruction(_)))
    ));
}

#[test]
fn test_field_resolved_with_active_variant() {
    let (bus, _sim) = setup(
        VariantKind::DdServo,
        &[1],
        BusConfig::default().with_byte_timeout_ms(2),
    );

    let switcher = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for round in 0..100 {
                let kind = if round % 2 == 0 {
                    VariantKind::RobotisServo
                } else {
                    VariantKind::DdServo
                };
                bus.select_variant(kind).unwrap();
                std::thread::sleep(Duration::from_micros(300));
            }
            bus.select_variant(VariantKind::DdServo).unwrap();
        })
    };

    // Under the Robotis table the DD device stays silent; it never answers
    // with bytes from the wrong address.
    for _ in 0..100 {
        let value = bus.read_field(1, "servoId").unwrap();
        assert!(value.is_none() || value == Some(FieldValue::Int(1)), "read {:?}", value);
    }
    switcher.join().unwrap();
    assert_eq!(bus.read_field(1, "servoId").unwrap(), Some(FieldValue::Int(1)));
}

#[test]
fn test_closed_link() {
    let (bus, _sim) = robotis(&[1]);
    bus.close();
    assert!(!bus.is_open());
    assert!(matches!(
        bus.ping(1),
        Err(BusError::Transport(TransportError::NotOpen))
    ));
}

#[test]
fn test_listener_reports_traffic() {
    let (bus, sim) = robotis(&[]);
    let events = bus.events();
    let listener = bus.start_listening().unwrap();

    sim.inject_frame(9, 0x02, &[36, 2]).unwrap();
    sim.inject_frame(9, 0x00, &[0xFF, 0x03]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut field_data = None;
    while field_data.is_none() && Instant::now() < deadline {
        if let Ok(BusEvent::FieldData { device_id, address, payload }) =
            events.recv_timeout(Duration::from_millis(100))
        {
            field_data = Some((device_id, address, payload));
        }
    }
    assert_eq!(field_data, Some((9, 36, vec![0xFF, 0x03])));

    assert!(listener.is_running());
    listener.stop();
    assert!(bus.is_open());
}

#[test]
fn test_listener_stops_on_transport_error() {
    let (bus, sim) = robotis(&[]);
    let listener = bus.start_listening().unwrap();
    sim.unplug();

    let deadline = Instant::now() + Duration::from_secs(5);
    while listener.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!listener.is_running());
    assert!(!bus.is_open());
    listener.stop();
}
