//! Instruction queries
//!
//! A query is a list of instruction patterns matched against consecutive
//! instructions. Each pattern names an opcode (any member of its width family
//! matches) and a prefix of operands; missing operands and [`QueryOperand::Any`]
//! match anything. String operands are resolved to string ids before matching.

use hbc_bytecode::instruction::Operands;
use hbc_bytecode::opcode::MAX_OPERANDS;
use hbc_bytecode::{Instruction, Opcode, Operand, RawInstruction};
use smallvec::SmallVec;

use crate::error::{PatchError, Result};
use crate::strings::{StringIndex, StringSource};

/// One operand of an [`InstructionQuery`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperand {
    /// Matches anything
    Any,
    /// Matches this exact value
    Value(Operand),
    /// Matches the id of a string equal to (or else containing) the text
    Text(String),
}

impl From<Operand> for QueryOperand {
    fn from(value: Operand) -> Self {
        QueryOperand::Value(value)
    }
}

impl From<&str> for QueryOperand {
    fn from(text: &str) -> Self {
        QueryOperand::Text(text.to_owned())
    }
}

impl From<String> for QueryOperand {
    fn from(text: String) -> Self {
        QueryOperand::Text(text)
    }
}

impl<T: Into<QueryOperand>> From<Option<T>> for QueryOperand {
    fn from(value: Option<T>) -> Self {
        value.map_or(QueryOperand::Any, Into::into)
    }
}

macro_rules! query_operand_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for QueryOperand {
                fn from(value: $ty) -> Self {
                    QueryOperand::Value(Operand::from(value))
                }
            }
        )*
    };
}

query_operand_from_int!(u8, u16, u32, i32, i64);

/// Pattern for one instruction
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionQuery {
    /// Opcode, matched by family
    pub opcode: Opcode,
    /// Leading operands to compare
    pub operands: Vec<QueryOperand>,
}

impl InstructionQuery {
    /// Pattern for `opcode` with the given leading operands
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = QueryOperand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }

    /// Replace string operands with string ids
    pub fn resolve(&self, table: &impl StringSource, index: &StringIndex) -> Result<ResolvedQuery> {
        let operands = self
            .operands
            .iter()
            .map(|operand| match operand {
                QueryOperand::Any => Ok(None),
                QueryOperand::Value(value) => Ok(Some(*value)),
                QueryOperand::Text(text) => index
                    .resolve(table, text)
                    .map(|id| Some(Operand::from(id)))
                    .ok_or_else(|| PatchError::StringNotFound(text.clone())),
            })
            .collect::<Result<_>>()?;
        Ok(ResolvedQuery {
            opcode: self.opcode,
            operands,
        })
    }
}

/// Build an [`InstructionQuery`]; `_` is a wildcard.
///
/// ```
/// use hbc_patch::query;
/// let q = query!(PutNewOwnByIdShort, _, _, "get");
/// assert_eq!(q.operands.len(), 3);
/// ```
#[macro_export]
macro_rules! query {
    (@arg _) => { $crate::QueryOperand::Any };
    (@arg $arg:expr) => { $crate::QueryOperand::from($arg) };
    ($opcode:ident $(, $arg:tt)* $(,)?) => {
        $crate::InstructionQuery::new(
            $crate::hbc_bytecode::Opcode::$opcode,
            [$($crate::query!(@arg $arg)),*],
        )
    };
}

/// An [`InstructionQuery`] with string operands resolved to ids
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    opcode: Opcode,
    operands: SmallVec<[Option<Operand>; MAX_OPERANDS]>,
}

impl ResolvedQuery {
    /// Whether `insn` matches this pattern.
    ///
    /// A pattern may list fewer operands than the instruction has, never more.
    pub fn matches(&self, insn: &Matched) -> bool {
        insn.opcode.same_family(self.opcode)
            && self.operands.len() <= insn.operands.len()
            && self
                .operands
                .iter()
                .zip(&insn.operands)
                .all(|(want, have)| want.is_none_or(|want| want == *have))
    }
}

/// A decoded instruction at an absolute position in a function's bytecode
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    /// Byte offset of the opcode
    pub ip: usize,
    /// Opcode
    pub opcode: Opcode,
    /// Operand values
    pub operands: Operands,
    /// Encoded width
    pub width: usize,
}

impl Matched {
    fn new(base: usize, insn: &Instruction<'_>) -> Self {
        Self {
            ip: base + insn.ip(),
            opcode: insn.opcode(),
            operands: insn.operands(),
            width: insn.width(),
        }
    }

    /// Offset just past this instruction
    #[inline]
    pub fn end(&self) -> usize {
        self.ip + self.width
    }

    /// Operand value
    pub fn operand(&self, index: usize) -> Option<Operand> {
        self.operands.get(index).copied()
    }

    /// Owned, re-encodable copy
    pub fn to_raw(&self) -> RawInstruction {
        RawInstruction::new(self.opcode, self.operands.iter().copied())
    }

    /// Re-encodable copy with one operand changed
    pub fn with_operand(&self, index: usize, value: impl Into<Operand>) -> RawInstruction {
        let mut raw = self.to_raw();
        if let Some(slot) = raw.operands.get_mut(index) {
            *slot = value.into();
        }
        raw
    }
}

/// Decode every instruction of `bytecode`, numbering ips from `base`
pub fn decode_all(bytecode: &[u8], base: usize) -> Result<Vec<Matched>> {
    hbc_bytecode::instructions(bytecode)
        .map(|insn| Ok(Matched::new(base, &insn?)))
        .collect()
}

/// Start index of every window of `instructions` matching `query`, in order
pub fn find_windows<'a>(
    instructions: &'a [Matched],
    query: &'a [ResolvedQuery],
) -> impl Iterator<Item = usize> + 'a {
    let windows = if query.is_empty() {
        0
    } else {
        (instructions.len() + 1).saturating_sub(query.len())
    };
    (0..windows).filter(move |&start| {
        query
            .iter()
            .zip(&instructions[start..])
            .all(|(q, insn)| q.matches(insn))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbc_bytecode::{StringKind, StringTable, encode_instructions};

    fn program() -> Vec<u8> {
        encode_instructions(&[
            RawInstruction::new(Opcode::NewObject, [0.into()]),
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 2.into()]),
            RawInstruction::new(Opcode::PutNewOwnByIdShort, [0.into(), 1.into(), 1.into()]),
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 3.into()]),
            RawInstruction::new(Opcode::PutNewOwnByIdShort, [0.into(), 1.into(), 2.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ])
        .unwrap()
    }

    fn strings() -> (StringTable, StringIndex) {
        let mut table = StringTable::default();
        for s in ["f", "set", "get"] {
            table.push(s, StringKind::String);
        }
        let index = StringIndex::new(&table);
        (table, index)
    }

    #[test]
    fn test_query_macro() {
        let q = query!(CreateClosure, _, 0, "x");
        assert_eq!(q.opcode, Opcode::CreateClosure);
        assert_eq!(
            q.operands,
            [QueryOperand::Any, QueryOperand::Value(Operand::Int(0)), QueryOperand::Text("x".into())]
        );
    }

    #[test]
    fn test_find_pair_with_string() {
        let (table, index) = strings();
        let insns = decode_all(&program(), 100).unwrap();
        let query = [query!(CreateClosure, _, _, _), query!(PutNewOwnByIdShort, _, _, "get")]
            .iter()
            .map(|q| q.resolve(&table, &index))
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let hits: Vec<_> = find_windows(&insns, &query).collect();
        assert_eq!(hits, [3]);
        assert_eq!(insns[3].ip, 100 + 2 + 5 + 4);
        assert_eq!(insns[3].operand(2), Some(Operand::Int(3)));
    }

    #[test]
    fn test_failed_prefix_does_not_hide_match() {
        // CreateClosure, CreateClosure, Put: the second closure starts the match.
        let body = encode_instructions(&[
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 2.into()]),
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 3.into()]),
            RawInstruction::new(Opcode::PutNewOwnByIdShort, [0.into(), 1.into(), 2.into()]),
        ])
        .unwrap();
        let (table, index) = strings();
        let insns = decode_all(&body, 0).unwrap();
        let query = [query!(CreateClosure), query!(PutNewOwnByIdShort)]
            .iter()
            .map(|q| q.resolve(&table, &index))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(find_windows(&insns, &query).collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn test_family_match() {
        let (table, index) = strings();
        let long = decode_all(
            &encode_instructions(&[RawInstruction::new(
                Opcode::CreateClosureLongIndex,
                [1.into(), 0.into(), 70_000.into()],
            )])
            .unwrap(),
            0,
        )
        .unwrap();
        let q = query!(CreateClosure).resolve(&table, &index).unwrap();
        assert!(q.matches(&long[0]));
    }

    #[test]
    fn test_extra_operands_never_match() {
        let (table, index) = strings();
        let insns = decode_all(&program(), 0).unwrap();
        let exact = query!(Ret, 0).resolve(&table, &index).unwrap();
        let too_long = query!(Ret, 0, _).resolve(&table, &index).unwrap();
        assert!(exact.matches(&insns[5]));
        assert!(!too_long.matches(&insns[5]));
        assert_eq!(find_windows(&insns, &[too_long]).count(), 0);
    }

    #[test]
    fn test_unknown_string() {
        let (table, index) = strings();
        assert!(matches!(
            query!(LoadConstString, _, "missing").resolve(&table, &index),
            Err(PatchError::StringNotFound(s)) if s == "missing"
        ));
    }

    #[test]
    fn test_with_operand() {
        let insns = decode_all(&program(), 0).unwrap();
        let raw = insns[1].with_operand(2, 9u32);
        assert_eq!(raw.operands.as_slice(), &[Operand::Int(1), Operand::Int(0), Operand::Int(9)]);
    }
}
