//! A protocol variant: memory map plus instruction set.

use crate::error::ProtocolResult;
use crate::instruction::{InstructionRef, InstructionTable};
use crate::memory_map::MemoryMap;
use crate::packet::encode_frame;
use crate::variants::VariantKind;

/// Immutable description of one device family.
///
/// Built once and shared; switching the active variant means swapping the
/// whole value.
#[derive(Debug, Clone)]
pub struct ProtocolVariant {
    /// Which built-in variant this is.
    pub kind: VariantKind,
    /// Field layout.
    pub memory_map: MemoryMap,
    /// Instruction set.
    pub instructions: InstructionTable,
}

impl ProtocolVariant {
    /// Build a built-in variant.
    pub fn select(kind: VariantKind) -> ProtocolResult<Self> {
        Ok(ProtocolVariant {
            kind,
            memory_map: MemoryMap::from_specs(&kind.field_specs())?,
            instructions: InstructionTable::from_specs(kind.instruction_specs())?,
        })
    }

    /// Build a variant by its configuration name.
    pub fn for_name(name: &str) -> ProtocolResult<Self> {
        Self::select(name.parse()?)
    }

    /// Variant name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Encode a request, resolving symbolic instruction names first.
    pub fn encode_request(
        &self,
        device_id: u8,
        instruction: &InstructionRef,
        payload: &[u8],
    ) -> ProtocolResult<Vec<u8>> {
        let opcode = self.instructions.resolve(instruction)?;
        encode_frame(device_id, opcode, payload)
    }

    /// Name of the field at `address`, or `UnknownAddress`.
    pub fn field_name_at(&self, address: u16) -> &str {
        self.memory_map
            .field_at(address)
            .map(|f| f.name.as_str())
            .unwrap_or("UnknownAddress")
    }
}
