//! Instruction (opcode) tables.
//!
//! Each protocol variant names its instructions; the table maps both ways and
//! keeps a short description used for diagnostics.

use std::collections::HashMap;

use crate::error::{ProtocolError, ProtocolResult};

/// One row of an instruction set: opcode, name, description.
pub type InstructionSpec = (u8, &'static str, &'static str);

/// A single instruction of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Numeric opcode on the wire.
    pub opcode: u8,
    /// Human-readable name.
    pub name: String,
    /// Payload layout and broadcast behaviour.
    pub description: String,
}

/// An instruction given either by opcode or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionRef {
    /// Raw opcode, sent as-is.
    Opcode(u8),
    /// Symbolic name, resolved through the active table.
    Name(String),
}

impl InstructionRef {
    /// Parse user input: decimal or `0x`-prefixed hex becomes an opcode, anything else a name.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let numeric = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16).ok(),
            None => text.parse::<u8>().ok(),
        };
        match numeric {
            Some(opcode) => InstructionRef::Opcode(opcode),
            None => InstructionRef::Name(text.to_string()),
        }
    }
}

impl From<u8> for InstructionRef {
    fn from(opcode: u8) -> Self {
        InstructionRef::Opcode(opcode)
    }
}

impl From<&str> for InstructionRef {
    fn from(name: &str) -> Self {
        InstructionRef::Name(name.to_string())
    }
}

impl From<String> for InstructionRef {
    fn from(name: String) -> Self {
        InstructionRef::Name(name)
    }
}

impl std::fmt::Display for InstructionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionRef::Opcode(op) => write!(f, "0x{:02X}", op),
            InstructionRef::Name(name) => f.write_str(name),
        }
    }
}

/// Bidirectional opcode/name table of one variant.
#[derive(Debug, Clone)]
pub struct InstructionTable {
    entries: Vec<Instruction>,
    by_opcode: HashMap<u8, usize>,
    by_name: HashMap<String, usize>,
}

impl InstructionTable {
    /// Build a table, rejecting duplicate opcodes or names.
    pub fn from_specs(specs: &[InstructionSpec]) -> ProtocolResult<Self> {
        let mut table = InstructionTable {
            entries: Vec::with_capacity(specs.len()),
            by_opcode: HashMap::with_capacity(specs.len()),
            by_name: HashMap::with_capacity(specs.len()),
        };

        for &(opcode, name, description) in specs {
            if table.by_opcode.contains_key(&opcode) || table.by_name.contains_key(name) {
                return Err(ProtocolError::DuplicateInstruction {
                    name: name.to_string(),
                    opcode,
                });
            }
            let index = table.entries.len();
            table.by_opcode.insert(opcode, index);
            table.by_name.insert(name.to_string(), index);
            table.entries.push(Instruction {
                opcode,
                name: name.to_string(),
                description: description.to_string(),
            });
        }

        Ok(table)
    }

    /// Opcode for an instruction name.
    pub fn opcode_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).map(|&i| self.entries[i].opcode)
    }

    /// Name for an opcode.
    pub fn name_of(&self, opcode: u8) -> Option<&str> {
        self.by_opcode.get(&opcode).map(|&i| self.entries[i].name.as_str())
    }

    /// Description for an opcode.
    pub fn description_of(&self, opcode: u8) -> Option<&str> {
        self.by_opcode
            .get(&opcode)
            .map(|&i| self.entries[i].description.as_str())
    }

    /// Name for an opcode, or `? 0xNN ?` if the opcode is not in the table.
    pub fn display_name(&self, opcode: u8) -> String {
        match self.name_of(opcode) {
            Some(name) => name.to_string(),
            None => format!("? 0x{:02x} ?", opcode),
        }
    }

    /// Resolve an instruction reference to an opcode.
    ///
    /// Raw opcodes pass through even if the table does not list them.
    pub fn resolve(&self, instruction: &InstructionRef) -> ProtocolResult<u8> {
        match instruction {
            InstructionRef::Opcode(op) => Ok(*op),
            InstructionRef::Name(name) => self
                .opcode_of(name)
                .ok_or_else(|| ProtocolError::UnknownInstruction(name.clone())),
        }
    }

    /// All instructions in declaration order.
    pub fn entries(&self) -> &[Instruction] {
        &self.entries
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
