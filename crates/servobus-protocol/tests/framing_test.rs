//! Property tests for frame encoding and stream recovery.
//!
//! Inputs come from seeded generators so failures reproduce exactly.

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use servobus_protocol::{
    decode, decode_frame, encode, encode_frame, Endian, FieldValue, FrameReader, PrimitiveType,
    ProtocolVariant, VariantKind, MAX_PAYLOAD_LEN,
};

fn random_payload(rng: &mut ChaCha8Rng, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| rng.gen()).collect()
}

/// Noise that can never contain a frame header.
fn random_noise(rng: &mut ChaCha8Rng, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(1..=max_len);
    (0..len).map(|_| rng.gen_range(0..0xFF)).collect()
}

// ============================================================================
// PacketCodec
// ============================================================================

#[test]
fn test_encode_decode_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for device_id in 0..=0xFEu8 {
        let instruction: u8 = rng.gen();
        let payload = random_payload(&mut rng, MAX_PAYLOAD_LEN);

        let bytes = encode_frame(device_id, instruction, &payload).unwrap();
        let frame = decode_frame(&bytes).unwrap();

        assert_eq!(frame.device_id, device_id);
        assert_eq!(frame.instruction, instruction);
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.declared_len as usize, payload.len() + 2);
        assert!(frame.checksum_valid);
        assert_eq!(frame.raw, bytes);
    }
}

#[test]
fn test_ping_scenario() {
    let variant = ProtocolVariant::select(VariantKind::RobotisServo).unwrap();
    let bytes = variant.encode_request(5, &"PING".into(), &[]).unwrap();
    assert_eq!(bytes, vec![0xFF, 0xFF, 0x05, 0x02, 0x01, 0xF7]);
}

#[test]
fn test_single_byte_corruption_detected() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..32 {
        let device_id = rng.gen_range(0..0xFF);
        let payload = random_payload(&mut rng, 16);
        let bytes = encode_frame(device_id, 0x03, &payload).unwrap();

        for index in 2..bytes.len() {
            for replacement in 0..=0xFFu8 {
                if replacement == bytes[index] {
                    continue;
                }
                let mut corrupted = bytes.clone();
                corrupted[index] = replacement;

                match decode_frame(&corrupted) {
                    Ok(frame) => assert!(
                        !frame.checksum_valid,
                        "corruption at {} to 0x{:02X} went undetected",
                        index,
                        replacement
                    ),
                    // A rewritten length byte no longer matches the window.
                    Err(e) => assert_eq!(index, 3, "unexpected {} at {}", e, index),
                }

                let mut reader = FrameReader::new();
                for recovered in reader.push(&corrupted) {
                    let same_content = recovered.device_id == device_id
                        && recovered.instruction == 0x03
                        && recovered.payload == payload;
                    assert!(!(recovered.checksum_valid && same_content));
                }
            }
        }
    }
}

// ============================================================================
// FrameReader
// ============================================================================

#[test]
fn test_noise_around_frame() {
    let mut rng = ChaCha8Rng::seed_from_u64(1234);

    for _ in 0..200 {
        let device_id = rng.gen_range(0..0xFF);
        let payload = random_payload(&mut rng, 32);
        let bytes = encode_frame(device_id, 0x02, &payload).unwrap();

        let mut stream = random_noise(&mut rng, 40);
        stream.extend_from_slice(&bytes);
        stream.extend(random_noise(&mut rng, 40));

        let mut reader = FrameReader::new();
        let frames = reader.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw, bytes);
        assert!(frames[0].checksum_valid);
    }
}

#[test]
fn test_back_to_back_frames() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut stream = Vec::new();
    let mut expected = Vec::new();

    for _ in 0..50 {
        let device_id = rng.gen_range(0..0xFF);
        let payload = random_payload(&mut rng, 12);
        let bytes = encode_frame(device_id, 0x01, &payload).unwrap();
        stream.extend_from_slice(&bytes);
        expected.push(bytes);
    }

    let mut reader = FrameReader::new();
    let frames = reader.push(&stream);
    let raw: Vec<_> = frames.into_iter().map(|f| f.raw).collect();
    assert_eq!(raw, expected);
    assert_eq!(reader.discarded(), 0);
}

#[test]
fn test_truncated_frame_then_timeout() {
    let good = encode_frame(9, 0x01, &[]).unwrap();
    let partial = encode_frame(3, 0x02, &[0x24, 0x02]).unwrap();

    let mut reader = FrameReader::new();
    assert!(reader.push(&partial[..5]).is_empty());
    reader.reset();

    let frames = reader.push(&good);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].device_id, 9);
}

// ============================================================================
// FieldCodec
// ============================================================================

#[test]
fn test_fixed_point_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);

    for endian in [Endian::Little, Endian::Big] {
        for _ in 0..500 {
            let value: f64 = rng.gen_range(-30000.0..30000.0);
            let bytes = encode(&FieldValue::Float(value), PrimitiveType::Fxp32, endian).unwrap();
            let back = decode(&bytes, PrimitiveType::Fxp32, endian).unwrap();
            assert_abs_diff_eq!(back.as_f64(), value, epsilon = 1.0 / 65536.0);

            let value: f64 = rng.gen_range(-500.0..500.0);
            let bytes = encode(&FieldValue::Float(value), PrimitiveType::Fxp16, endian).unwrap();
            let back = decode(&bytes, PrimitiveType::Fxp16, endian).unwrap();
            assert_abs_diff_eq!(back.as_f64(), value, epsilon = 1.0 / 64.0);
        }
    }
}

#[test]
fn test_integer_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let cases: [(PrimitiveType, i64, i64); 6] = [
        (PrimitiveType::I8, i8::MIN as i64, i8::MAX as i64),
        (PrimitiveType::U8, 0, u8::MAX as i64),
        (PrimitiveType::I16, i16::MIN as i64, i16::MAX as i64),
        (PrimitiveType::U16, 0, u16::MAX as i64),
        (PrimitiveType::I32, i32::MIN as i64, i32::MAX as i64),
        (PrimitiveType::U32, 0, u32::MAX as i64),
    ];

    for endian in [Endian::Little, Endian::Big] {
        for (ty, min, max) in cases {
            for value in [min, max, rng.gen_range(min..=max)] {
                let bytes = encode(&FieldValue::Int(value), ty, endian).unwrap();
                assert_eq!(bytes.len(), ty.byte_width() as usize);
                assert_eq!(decode(&bytes, ty, endian).unwrap(), FieldValue::Int(value));
            }
        }
    }
}

#[test]
fn test_float_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(31);

    for endian in [Endian::Little, Endian::Big] {
        for _ in 0..500 {
            // Values already representable as f32 come back unchanged.
            let value = rng.gen_range(-1.0e6f32..1.0e6) as f64;
            let bytes = encode(&FieldValue::Float(value), PrimitiveType::F32, endian).unwrap();
            assert_eq!(bytes.len(), 4);
            assert_eq!(decode(&bytes, PrimitiveType::F32, endian).unwrap(), FieldValue::Float(value));

            let value: f64 = rng.gen_range(-1.0e12..1.0e12);
            let bytes = encode(&FieldValue::Float(value), PrimitiveType::F64, endian).unwrap();
            assert_eq!(bytes.len(), 8);
            assert_eq!(decode(&bytes, PrimitiveType::F64, endian).unwrap(), FieldValue::Float(value));
        }
    }

    // Narrowing to f32 loses precision, not magnitude.
    let value = 0.1f64;
    let bytes = encode(&FieldValue::Float(value), PrimitiveType::F32, Endian::Little).unwrap();
    let back = decode(&bytes, PrimitiveType::F32, Endian::Little).unwrap();
    assert_abs_diff_eq!(back.as_f64(), value, epsilon = 1e-7);
}

#[test]
fn test_float_byte_order() {
    let little = encode(&FieldValue::Float(-2.5), PrimitiveType::F64, Endian::Little).unwrap();
    let mut big = encode(&FieldValue::Float(-2.5), PrimitiveType::F64, Endian::Big).unwrap();
    big.reverse();
    assert_eq!(little, big);
}
