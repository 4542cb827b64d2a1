//! Device memory maps.
//!
//! A memory map is the ordered list of named fields a device exposes. Fields
//! are packed back to back in declaration order starting at address 0, so a
//! schema only lists names and types; addresses and sizes are derived.

use std::collections::HashMap;

use crate::error::{ProtocolError, ProtocolResult};
use crate::field::{self, Endian, FieldValue, PrimitiveType};
use crate::variants::VariantKind;

// ============================================================================
// Schema Declarations
// ============================================================================

/// How a decoded value is rendered for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Annotation {
    /// The value itself.
    #[default]
    Plain,
    /// One line per flag bit. The list is ordered from the most significant
    /// flag bit down to bit 0.
    Flags(&'static [&'static str]),
}

impl Annotation {
    /// Render `value` according to this annotation.
    pub fn render(&self, value: &FieldValue) -> String {
        match self {
            Annotation::Plain => value.to_string(),
            Annotation::Flags(names) => {
                let bits = value.as_i64().unwrap_or(0) as u64;
                let count = names.len();
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let bit = count - 1 - i;
                        let set = bit < 64 && bits & (1u64 << bit) != 0;
                        format!("{:>5}: {}", set, name)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

/// Declaration of one field in a static schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// C type name, optionally with an `[N]` array suffix.
    pub type_name: &'static str,
    /// Whether the host may write the field.
    pub writable: bool,
    /// Display annotation.
    pub annotation: Annotation,
}

impl FieldSpec {
    /// A read-only, plainly rendered field.
    pub const fn new(name: &'static str, type_name: &'static str) -> Self {
        Self {
            name,
            type_name,
            writable: false,
            annotation: Annotation::Plain,
        }
    }

    /// Mark the field writable.
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Render the field as a set of named flag bits.
    pub const fn flags(mut self, names: &'static [&'static str]) -> Self {
        self.annotation = Annotation::Flags(names);
        self
    }
}

/// Split `"unsigned char[10]"` into the primitive type and element count.
fn parse_type_name(type_name: &str) -> ProtocolResult<(PrimitiveType, u16)> {
    match type_name.split_once('[') {
        Some((base, rest)) => {
            let count = rest
                .strip_suffix(']')
                .and_then(|n| n.trim().parse::<u16>().ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| ProtocolError::UnknownType(type_name.to_string()))?;
            Ok((base.trim().parse()?, count))
        }
        None => Ok((type_name.parse()?, 1)),
    }
}

// ============================================================================
// Field Descriptors
// ============================================================================

/// A field placed in a memory map.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Byte address of the first element.
    pub address: u16,
    /// Width of one element in bytes.
    pub byte_size: u16,
    /// Number of elements (1 for scalars).
    pub element_count: u16,
    /// Whether the host may write the field.
    pub writable: bool,
    /// Element type.
    pub primitive: PrimitiveType,
    /// Display annotation.
    pub annotation: Annotation,
    /// Position in declaration order.
    pub index: usize,
}

impl FieldDescriptor {
    /// Total bytes the field occupies.
    pub fn size(&self) -> u16 {
        self.byte_size.saturating_mul(self.element_count)
    }

    /// Whether the field holds a single element.
    pub fn is_scalar(&self) -> bool {
        self.element_count == 1
    }

    /// Address one past the last byte of the field.
    pub fn end_address(&self) -> u16 {
        self.address.saturating_add(self.size())
    }

    /// Decode the field value from the start of `bytes`.
    pub fn decode(&self, bytes: &[u8], endian: Endian) -> ProtocolResult<FieldValue> {
        if !self.is_scalar() {
            return Err(ProtocolError::UnsupportedFeature {
                field: self.name.clone(),
                element_count: self.element_count,
            });
        }
        field::decode(bytes, self.primitive, endian)
    }

    /// Encode a value for this field.
    pub fn encode(&self, value: &FieldValue, endian: Endian) -> ProtocolResult<Vec<u8>> {
        if !self.is_scalar() {
            return Err(ProtocolError::UnsupportedFeature {
                field: self.name.clone(),
                element_count: self.element_count,
            });
        }
        field::encode(value, self.primitive, endian)
    }

    /// Render a value with the field's annotation.
    pub fn annotate(&self, value: &FieldValue) -> String {
        self.annotation.render(value)
    }
}

/// One entry produced by [`MemoryMap::decode_block`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    /// Field name, or `UnknownAddress` when the walk left the map.
    pub name: String,
    /// Field address.
    pub address: u16,
    /// Decoded value or the reason it was left undecoded.
    pub value: ProtocolResult<FieldValue>,
}

impl DecodedField {
    /// The value, if it decoded.
    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref().ok()
    }
}

// ============================================================================
// Memory Map
// ============================================================================

/// The field layout of one protocol variant.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    fields: Vec<FieldDescriptor>,
    by_address: HashMap<u16, usize>,
    by_name: HashMap<String, usize>,
    total_memory_size: u16,
}

impl MemoryMap {
    /// Build the map of a named variant.
    pub fn for_variant(name: &str) -> ProtocolResult<Self> {
        let kind: VariantKind = name.parse()?;
        Self::from_specs(&kind.field_specs())
    }

    /// Lay out a schema contiguously from address 0.
    pub fn from_specs(specs: &[FieldSpec]) -> ProtocolResult<Self> {
        let mut map = MemoryMap {
            fields: Vec::with_capacity(specs.len()),
            by_address: HashMap::with_capacity(specs.len()),
            by_name: HashMap::with_capacity(specs.len()),
            total_memory_size: 0,
        };

        let mut address: u16 = 0;
        for (index, spec) in specs.iter().enumerate() {
            if map.by_name.contains_key(spec.name) {
                return Err(ProtocolError::DuplicateField(spec.name.to_string()));
            }
            let (primitive, element_count) = parse_type_name(spec.type_name)?;
            let end = primitive
                .byte_width()
                .checked_mul(element_count)
                .and_then(|size| address.checked_add(size))
                .ok_or_else(|| ProtocolError::SchemaTooLarge(spec.name.to_string()))?;
            let descriptor = FieldDescriptor {
                name: spec.name.to_string(),
                address,
                byte_size: primitive.byte_width(),
                element_count,
                writable: spec.writable,
                primitive,
                annotation: spec.annotation,
                index,
            };
            address = end;
            map.by_address.insert(descriptor.address, index);
            map.by_name.insert(descriptor.name.clone(), index);
            map.fields.push(descriptor);
        }
        map.total_memory_size = address;

        Ok(map)
    }

    /// The field starting at `address`.
    pub fn field_at(&self, address: u16) -> Option<&FieldDescriptor> {
        self.by_address.get(&address).map(|&i| &self.fields[i])
    }

    /// The field called `name`.
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Bytes spanned by all fields.
    pub fn total_memory_size(&self) -> u16 {
        self.total_memory_size
    }

    /// Decode a block of memory that starts at `address`, field by field.
    ///
    /// Array fields are reported as [`ProtocolError::UnsupportedFeature`] and
    /// skipped; decoding continues with the next field. The walk stops at the
    /// first offset that is not a field boundary.
    pub fn decode_block(&self, address: u16, payload: &[u8], endian: Endian) -> Vec<DecodedField> {
        let mut decoded = Vec::new();
        let mut offset = 0usize;

        while offset < payload.len() {
            let field_address = address.saturating_add(offset as u16);
            let Some(descriptor) = self.field_at(field_address) else {
                log::warn!("no field at address {} while decoding block", field_address);
                decoded.push(DecodedField {
                    name: "UnknownAddress".to_string(),
                    address: field_address,
                    value: Err(ProtocolError::UnknownAddress(field_address)),
                });
                break;
            };

            let value = descriptor.decode(&payload[offset..], endian);
            if let Err(e) = &value {
                log::warn!("field {} left undecoded: {}", descriptor.name, e);
            }
            decoded.push(DecodedField {
                name: descriptor.name.clone(),
                address: field_address,
                value,
            });
            offset += descriptor.size() as usize;
        }

        decoded
    }
}
