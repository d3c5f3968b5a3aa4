//! Instruction decoding and encoding

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::error::{BytecodeError, Result};
use crate::opcode::{MAX_OPERANDS, Opcode};
use crate::operand::{Operand, OperandRole};

/// Operand list of one instruction
pub type Operands = SmallVec<[Operand; MAX_OPERANDS]>;

/// A decoded instruction borrowing its bytes from a bytecode buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    ip: usize,
    opcode: Opcode,
    bytes: &'a [u8],
}

impl<'a> Instruction<'a> {
    /// Decode the instruction starting at `ip`.
    ///
    /// Fails on an unknown opcode byte or when the operands run past the end
    /// of `bytecode`.
    pub fn decode(bytecode: &'a [u8], ip: usize) -> Result<Self> {
        let Some(&byte) = bytecode.get(ip) else {
            return Err(BytecodeError::unexpected_end(ip, 1, bytecode.len()));
        };
        let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode { opcode: byte, ip })?;
        let width = opcode.width();
        let remaining = bytecode.len() - ip;
        if width > remaining {
            return Err(BytecodeError::TruncatedInstruction {
                opcode,
                ip,
                width,
                remaining,
            });
        }
        Ok(Self {
            ip,
            opcode,
            bytes: &bytecode[ip..ip + width],
        })
    }

    /// Byte offset within the bytecode
    #[inline]
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Opcode
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Encoded width in bytes
    #[inline]
    pub fn width(&self) -> usize {
        self.bytes.len()
    }

    /// Offset of the next instruction
    #[inline]
    pub fn next_ip(&self) -> usize {
        self.ip + self.bytes.len()
    }

    /// Raw encoded bytes
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Value of operand `index`. Panics if the opcode has fewer operands.
    pub fn operand(&self, index: usize) -> Operand {
        let kind = self.opcode.operand_kinds()[index];
        kind.read(&self.bytes[self.opcode.operand_offset(index)..])
    }

    /// All operand values in order
    pub fn operands(&self) -> Operands {
        (0..self.opcode.operand_count()).map(|i| self.operand(i)).collect()
    }

    /// Positions and values of operands carrying `role`
    pub fn operands_with_role(&self, role: OperandRole) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.opcode
            .operands_with_role(role)
            .filter_map(move |i| self.operand(i).as_u32().map(|v| (i, v)))
    }

    /// Copy into an owned, re-encodable form
    pub fn to_raw(&self) -> RawInstruction {
        RawInstruction {
            opcode: self.opcode,
            operands: self.operands(),
        }
    }
}

/// Iterator over the instructions of a bytecode buffer
///
/// Yields an error once and then stops if the buffer is malformed.
#[derive(Debug, Clone)]
pub struct InstructionIter<'a> {
    bytecode: &'a [u8],
    ip: usize,
    failed: bool,
}

impl<'a> InstructionIter<'a> {
    /// Iterate `bytecode` from its first byte
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self {
            bytecode,
            ip: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for InstructionIter<'a> {
    type Item = Result<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.ip >= self.bytecode.len() {
            return None;
        }
        match Instruction::decode(self.bytecode, self.ip) {
            Ok(insn) => {
                self.ip = insn.next_ip();
                Some(Ok(insn))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Iterate the instructions of `bytecode`
pub fn instructions(bytecode: &[u8]) -> InstructionIter<'_> {
    InstructionIter::new(bytecode)
}

/// An opcode with operand values, not yet encoded
///
/// Serialized as `["OpcodeName", operand, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    /// Opcode
    pub opcode: Opcode,
    /// Operand values
    pub operands: Operands,
}

impl RawInstruction {
    /// Create an instruction from an opcode and operand values
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }

    /// Encode into `out`, switching to wider twins while an operand does not fit.
    ///
    /// Returns the opcode that was actually emitted.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<Opcode> {
        let expected = self.opcode.operand_count();
        if self.operands.len() != expected {
            return Err(BytecodeError::OperandCount {
                opcode: self.opcode,
                expected,
                found: self.operands.len(),
            });
        }

        let mut opcode = self.opcode;
        loop {
            match first_misfit(opcode, &self.operands)? {
                None => break,
                Some(index) => match opcode.long_variant() {
                    Some(long) => {
                        tracing::trace!(from = %opcode, to = %long, index, "widening instruction");
                        opcode = long;
                    }
                    None => {
                        return Err(BytecodeError::OperandOutOfRange {
                            opcode,
                            index,
                            value: self.operands[index].to_string(),
                        });
                    }
                },
            }
        }

        let start = out.len();
        out.resize(start + opcode.width(), 0);
        out[start] = opcode.byte();
        for (i, (&kind, &value)) in opcode.operand_kinds().iter().zip(&self.operands).enumerate() {
            let at = start + opcode.operand_offset(i);
            kind.write(&mut out[at..], value);
        }
        Ok(opcode)
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.opcode.width());
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

/// Index of the first operand that does not fit `opcode`'s encoding
fn first_misfit(opcode: Opcode, operands: &[Operand]) -> Result<Option<usize>> {
    for (index, (&kind, &value)) in opcode.operand_kinds().iter().zip(operands).enumerate() {
        if matches!(value, Operand::Float(_)) && kind != crate::operand::OperandKind::Double {
            return Err(BytecodeError::OperandKind { opcode, index });
        }
        if !kind.fits(value) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Encode a list of instructions back to back
pub fn encode_instructions(instructions: &[RawInstruction]) -> Result<Vec<u8>> {
    let size = instructions.iter().map(|i| i.opcode.width()).sum();
    let mut out = Vec::with_capacity(size);
    for insn in instructions {
        insn.encode_into(&mut out)?;
    }
    Ok(out)
}

impl Serialize for RawInstruction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.operands.len()))?;
        seq.serialize_element(&self.opcode)?;
        for operand in &self.operands {
            seq.serialize_element(operand)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for RawInstruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_seq(RawInstructionVisitor)
    }
}

struct RawInstructionVisitor;

impl<'de> Visitor<'de> for RawInstructionVisitor {
    type Value = RawInstruction;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("an array of an opcode name followed by its operands")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let opcode: Opcode = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let mut operands = Operands::new();
        while let Some(operand) = seq.next_element::<Operand>()? {
            operands.push(operand);
        }
        if operands.len() != opcode.operand_count() {
            return Err(de::Error::invalid_length(1 + operands.len(), &self));
        }
        Ok(RawInstruction { opcode, operands })
    }
}
