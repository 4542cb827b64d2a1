//! Scalar field encoding and decoding.
//!
//! Every memory-map field holds one value of a [`PrimitiveType`]. Values are
//! stored on the wire as fixed-width binary, little-endian unless the caller
//! selects [`Endian::Big`]. Two fixed-point encodings are supported:
//!
//! | Type    | Wire          | Value          |
//! |---------|---------------|----------------|
//! | `Fxp32` | signed 32-bit | raw / 2^16 (Q16.16) |
//! | `Fxp16` | signed 16-bit | raw / 2^6 (Q10.6)   |

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ProtocolError, ProtocolResult};

/// Width reported for type names that cannot be resolved.
pub const FALLBACK_BYTE_WIDTH: u16 = 4;

/// Fractional bits of the Q16.16 encoding.
pub const FXP32_FRACTION_BITS: u32 = 16;
/// Fractional bits of the Q10.6 encoding.
pub const FXP16_FRACTION_BITS: u32 = 6;

// ============================================================================
// Primitive Types
// ============================================================================

/// The closed set of scalar types a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// IEEE 754 single precision.
    F32,
    /// IEEE 754 double precision.
    F64,
    /// Q16.16 fixed point in a signed 32-bit integer.
    Fxp32,
    /// Q10.6 fixed point in a signed 16-bit integer.
    Fxp16,
}

impl PrimitiveType {
    /// Number of bytes one value occupies on the wire.
    pub const fn byte_width(self) -> u16 {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 | PrimitiveType::Fxp16 => 2,
            PrimitiveType::I32
            | PrimitiveType::U32
            | PrimitiveType::F32
            | PrimitiveType::Fxp32 => 4,
            PrimitiveType::F64 => 8,
        }
    }

    /// Canonical C spelling of the type.
    pub const fn as_str(self) -> &'static str {
        match self {
            PrimitiveType::I8 => "int8_t",
            PrimitiveType::U8 => "uint8_t",
            PrimitiveType::I16 => "int16_t",
            PrimitiveType::U16 => "uint16_t",
            PrimitiveType::I32 => "int32_t",
            PrimitiveType::U32 => "uint32_t",
            PrimitiveType::F32 => "float",
            PrimitiveType::F64 => "double",
            PrimitiveType::Fxp32 => "fxp32_t",
            PrimitiveType::Fxp16 => "fxp16_t",
        }
    }

    /// Whether values of this type decode to [`FieldValue::Float`].
    pub const fn is_real(self) -> bool {
        matches!(
            self,
            PrimitiveType::F32 | PrimitiveType::F64 | PrimitiveType::Fxp32 | PrimitiveType::Fxp16
        )
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimitiveType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        // Pointers are transported as unsigned addresses.
        if name.ends_with('*') {
            return Ok(PrimitiveType::U32);
        }
        let ty = match name {
            "int8_t" | "char" | "signed char" => PrimitiveType::I8,
            "uint8_t" | "uchar" | "unsigned char" => PrimitiveType::U8,
            "int16_t" | "short" | "signed short" | "short int" | "signed short int" => {
                PrimitiveType::I16
            }
            "uint16_t" | "ushort" | "unsigned short" | "short unsigned int" => PrimitiveType::U16,
            "int32_t" | "int" | "signed int" => PrimitiveType::I32,
            "uint32_t" | "uint" | "unsigned int" => PrimitiveType::U32,
            "float" => PrimitiveType::F32,
            "double" => PrimitiveType::F64,
            "fxp32_t" => PrimitiveType::Fxp32,
            "fxp16_t" => PrimitiveType::Fxp16,
            _ => return Err(ProtocolError::UnknownType(name.to_string())),
        };
        Ok(ty)
    }
}

/// Byte width for a type name, or [`FALLBACK_BYTE_WIDTH`] if the name is not recognized.
pub fn byte_width_of_name(name: &str) -> u16 {
    name.parse::<PrimitiveType>()
        .map(PrimitiveType::byte_width)
        .unwrap_or(FALLBACK_BYTE_WIDTH)
}

// ============================================================================
// Byte Order
// ============================================================================

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

// ============================================================================
// Field Values
// ============================================================================

/// A decoded scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Any integer type.
    Int(i64),
    /// Floating or fixed point types.
    Float(f64),
}

impl FieldValue {
    /// The value as f64.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Int(v) => *v as f64,
            FieldValue::Float(v) => *v,
        }
    }

    /// The value as i64, if it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            FieldValue::Float(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => {
                let text = format!("{:.7}", v);
                let trimmed = text.trim_end_matches('0');
                if trimmed.ends_with('.') {
                    write!(f, "{}0", trimmed)
                } else {
                    f.write_str(trimmed)
                }
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Decode one value of `ty` from the start of `bytes`.
///
/// Extra trailing bytes are ignored; fewer bytes than the type's width is an error.
pub fn decode(bytes: &[u8], ty: PrimitiveType, endian: Endian) -> ProtocolResult<FieldValue> {
    let width = ty.byte_width() as usize;
    if bytes.len() < width {
        return Err(ProtocolError::DecodeError {
            type_name: ty.as_str(),
            needed: width,
            available: bytes.len(),
        });
    }

    let mut buf = &bytes[..width];
    let little = endian == Endian::Little;
    let value = match ty {
        PrimitiveType::I8 => FieldValue::Int(buf.get_i8() as i64),
        PrimitiveType::U8 => FieldValue::Int(buf.get_u8() as i64),
        PrimitiveType::I16 => FieldValue::Int(read_i16(&mut buf, little) as i64),
        PrimitiveType::U16 => {
            let v = if little { buf.get_u16_le() } else { buf.get_u16() };
            FieldValue::Int(v as i64)
        }
        PrimitiveType::I32 => FieldValue::Int(read_i32(&mut buf, little) as i64),
        PrimitiveType::U32 => {
            let v = if little { buf.get_u32_le() } else { buf.get_u32() };
            FieldValue::Int(v as i64)
        }
        PrimitiveType::F32 => {
            let v = if little { buf.get_f32_le() } else { buf.get_f32() };
            FieldValue::Float(v as f64)
        }
        PrimitiveType::F64 => {
            FieldValue::Float(if little { buf.get_f64_le() } else { buf.get_f64() })
        }
        PrimitiveType::Fxp32 => {
            let raw = read_i32(&mut buf, little);
            FieldValue::Float(raw as f64 / (1u32 << FXP32_FRACTION_BITS) as f64)
        }
        PrimitiveType::Fxp16 => {
            let raw = read_i16(&mut buf, little);
            FieldValue::Float(raw as f64 / (1u32 << FXP16_FRACTION_BITS) as f64)
        }
    };
    Ok(value)
}

fn read_i16(buf: &mut &[u8], little: bool) -> i16 {
    if little {
        buf.get_i16_le()
    } else {
        buf.get_i16()
    }
}

fn read_i32(buf: &mut &[u8], little: bool) -> i32 {
    if little {
        buf.get_i32_le()
    } else {
        buf.get_i32()
    }
}

/// Encode `value` as `ty`.
///
/// Fixed-point types round to the nearest representable step.
pub fn encode(value: &FieldValue, ty: PrimitiveType, endian: Endian) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(ty.byte_width() as usize);
    let little = endian == Endian::Little;

    match ty {
        PrimitiveType::I8 => buf.put_i8(integral::<i8>(value, ty)?),
        PrimitiveType::U8 => buf.put_u8(integral::<u8>(value, ty)?),
        PrimitiveType::I16 => write_i16(&mut buf, integral::<i16>(value, ty)?, little),
        PrimitiveType::U16 => {
            let v = integral::<u16>(value, ty)?;
            if little {
                buf.put_u16_le(v)
            } else {
                buf.put_u16(v)
            }
        }
        PrimitiveType::I32 => write_i32(&mut buf, integral::<i32>(value, ty)?, little),
        PrimitiveType::U32 => {
            let v = integral::<u32>(value, ty)?;
            if little {
                buf.put_u32_le(v)
            } else {
                buf.put_u32(v)
            }
        }
        PrimitiveType::F32 => {
            let v = value.as_f64() as f32;
            if little {
                buf.put_f32_le(v)
            } else {
                buf.put_f32(v)
            }
        }
        PrimitiveType::F64 => {
            let v = value.as_f64();
            if little {
                buf.put_f64_le(v)
            } else {
                buf.put_f64(v)
            }
        }
        PrimitiveType::Fxp32 => {
            let raw = fixed_point(value, FXP32_FRACTION_BITS, ty)?;
            let raw = i32::try_from(raw).map_err(|_| out_of_range(value, ty))?;
            write_i32(&mut buf, raw, little)
        }
        PrimitiveType::Fxp16 => {
            let raw = fixed_point(value, FXP16_FRACTION_BITS, ty)?;
            let raw = i16::try_from(raw).map_err(|_| out_of_range(value, ty))?;
            write_i16(&mut buf, raw, little)
        }
    }

    Ok(buf)
}

fn write_i16(buf: &mut Vec<u8>, v: i16, little: bool) {
    if little {
        buf.put_i16_le(v)
    } else {
        buf.put_i16(v)
    }
}

fn write_i32(buf: &mut Vec<u8>, v: i32, little: bool) {
    if little {
        buf.put_i32_le(v)
    } else {
        buf.put_i32(v)
    }
}

fn integral<T: TryFrom<i64>>(value: &FieldValue, ty: PrimitiveType) -> ProtocolResult<T> {
    let v = value.as_i64().ok_or_else(|| ProtocolError::TypeMismatch {
        value: value.to_string(),
        type_name: ty.as_str(),
    })?;
    T::try_from(v).map_err(|_| out_of_range(value, ty))
}

fn fixed_point(value: &FieldValue, fraction_bits: u32, ty: PrimitiveType) -> ProtocolResult<i64> {
    let scaled = (value.as_f64() * (1u64 << fraction_bits) as f64).round();
    if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
        return Err(out_of_range(value, ty));
    }
    Ok(scaled as i64)
}

fn out_of_range(value: &FieldValue, ty: PrimitiveType) -> ProtocolError {
    ProtocolError::ValueOutOfRange {
        value: value.to_string(),
        type_name: ty.as_str(),
    }
}
