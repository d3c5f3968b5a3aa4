//! Editing one function through instruction matches
//!
//! [`Matched`] instructions carry byte offsets into the function's current
//! bytecode. An edit shifts everything after it, so match again after editing
//! rather than reusing older matches past the edited range.

use hbc_bytecode::{BytecodeError, FunctionSpec, OperandRole, RawInstruction};

use crate::error::{PatchError, Result};
use crate::query::{InstructionQuery, Matched, decode_all, find_windows};
use crate::rope::Rope;
use crate::session::PatchSession;

/// A patch target: one function inside a [`PatchSession`]
#[derive(Debug)]
pub struct PatchContext<'s> {
    session: &'s mut PatchSession,
    function: u32,
}

impl<'s> PatchContext<'s> {
    /// Context for function `function`
    pub fn new(session: &'s mut PatchSession, function: u32) -> Result<Self> {
        session.module().function(function)?;
        Ok(Self { session, function })
    }

    /// Target function id
    pub fn function(&self) -> u32 {
        self.function
    }

    /// The owning session
    pub fn session(&self) -> &PatchSession {
        self.session
    }

    /// Current bytecode of the target
    pub fn bytecode(&self) -> Result<Rope> {
        self.session.bytecode(self.function)
    }

    /// First run of instructions matching `query`
    pub fn match_first(&self, query: &[InstructionQuery]) -> Result<Vec<Matched>> {
        self.match_between(None, None, query)
    }

    /// First match starting at or after `from`
    pub fn match_after(&self, from: &Matched, query: &[InstructionQuery]) -> Result<Vec<Matched>> {
        self.match_between(Some(from), None, query)
    }

    /// First match within `from..=to`. `None` leaves that side open.
    pub fn match_between(
        &self,
        from: Option<&Matched>,
        to: Option<&Matched>,
        query: &[InstructionQuery],
    ) -> Result<Vec<Matched>> {
        let insns = self.decode_range(from, to)?;
        let resolved = self.session.resolve_query(query)?;
        if resolved.is_empty() {
            return Ok(Vec::new());
        }
        let start = find_windows(&insns, &resolved)
            .next()
            .ok_or(PatchError::MatchFailed {
                function: self.function,
                len: query.len(),
            })?;
        Ok(insns[start..start + resolved.len()].to_vec())
    }

    /// The only match in the whole function
    pub fn match_unique(&self, query: &[InstructionQuery]) -> Result<Vec<Matched>> {
        let insns = self.decode_range(None, None)?;
        let resolved = self.session.resolve_query(query)?;
        let starts: Vec<usize> = find_windows(&insns, &resolved).collect();
        match starts.as_slice() {
            [] => Err(PatchError::MatchFailed {
                function: self.function,
                len: query.len(),
            }),
            [start] => Ok(insns[*start..*start + resolved.len()].to_vec()),
            _ => Err(PatchError::NotUnique {
                function: self.function,
                count: starts.len(),
            }),
        }
    }

    fn decode_range(&self, from: Option<&Matched>, to: Option<&Matched>) -> Result<Vec<Matched>> {
        let rope = self.bytecode()?;
        let start = from.map_or(0, |insn| insn.ip);
        let end = to.map_or(rope.len(), Matched::end);
        if start > end || end > rope.len() {
            return Err(PatchError::InvalidRange {
                start,
                end,
                len: rope.len(),
            });
        }
        decode_all(&rope.slice(start, end).to_bytes(), start)
    }

    /// Replace one matched instruction
    pub fn replace_one(&mut self, insn: &Matched, with: &[RawInstruction]) -> Result<()> {
        self.session
            .editor(self.function)?
            .replace_instructions(insn.ip, insn.end(), with)
    }

    /// Replace `first` through `last`, both included
    pub fn replace_range(&mut self, first: &Matched, last: &Matched, with: &[RawInstruction]) -> Result<()> {
        if first.ip > last.ip {
            return Err(PatchError::InvalidRange {
                start: first.ip,
                end: last.end(),
                len: self.bytecode()?.len(),
            });
        }
        self.session
            .editor(self.function)?
            .replace_instructions(first.ip, last.end(), with)
    }

    /// Replace the whole body
    pub fn replace_all(&mut self, with: &[RawInstruction]) -> Result<()> {
        let mut editor = self.session.editor(self.function)?;
        let len = editor.len()?;
        editor.replace_instructions(0, len, with)
    }

    /// Insert instructions in front of `insn`
    pub fn insert_before(&mut self, insn: &Matched, with: &[RawInstruction]) -> Result<()> {
        self.session
            .editor(self.function)?
            .replace_instructions(insn.ip, insn.ip, with)
    }

    /// Insert instructions right after `insn`
    pub fn insert_after(&mut self, insn: &Matched, with: &[RawInstruction]) -> Result<()> {
        self.session
            .editor(self.function)?
            .replace_instructions(insn.end(), insn.end(), with)
    }

    /// Function id referenced by a closure-creating instruction
    pub fn closure_of(&self, insn: &Matched) -> Result<u32> {
        let index = insn
            .opcode
            .operands_with_role(OperandRole::Function)
            .next()
            .ok_or(PatchError::NotAFunctionOperand(insn.opcode))?;
        let id = insn
            .operand(index)
            .and_then(|op| op.as_u32())
            .ok_or(PatchError::NotAFunctionOperand(insn.opcode))?;
        self.session.module().function(id)?;
        Ok(id)
    }

    /// Context for the function created by `insn`
    pub fn closure(&mut self, insn: &Matched) -> Result<PatchContext<'_>> {
        let id = self.closure_of(insn)?;
        PatchContext::new(self.session, id)
    }

    /// Texts of the string operands of `insn`
    pub fn strings_of(&self, insn: &Matched) -> Result<Vec<&str>> {
        let session = &*self.session;
        insn.opcode
            .operands_with_role(OperandRole::String)
            .filter_map(|i| insn.operand(i).and_then(|op| op.as_u32()))
            .map(|id| session.string(id).ok_or(PatchError::Bytecode(BytecodeError::StringIndex(id))))
            .collect()
    }

    /// Append a new function to the module
    pub fn create_function(&mut self, spec: FunctionSpec) -> Result<u32> {
        self.session.create_function(spec)
    }

    /// Append a new string
    pub fn add_string(&mut self, text: &str) -> u32 {
        self.session.add_string(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;
    use hbc_bytecode::{Module, Opcode, Operand};

    /// `obj.get = <closure 1>; obj.set = <closure 1>; return obj`
    fn module() -> Module {
        let mut b = Module::builder();
        let name = b.add_string("outer");
        let get = b.add_string("get");
        let set = b.add_string("set");
        let inner = b.add_string("inner");
        b.add_function(FunctionSpec::new(name).frame_size(2).instructions(vec![
            RawInstruction::new(Opcode::NewObject, [0.into()]),
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 1.into()]),
            RawInstruction::new(Opcode::PutNewOwnByIdShort, [0.into(), 1.into(), get.into()]),
            RawInstruction::new(Opcode::CreateClosure, [1.into(), 0.into(), 1.into()]),
            RawInstruction::new(Opcode::PutNewOwnByIdShort, [0.into(), 1.into(), set.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ]))
        .unwrap();
        b.add_function(FunctionSpec::new(inner).frame_size(1).instructions(vec![
            RawInstruction::new(Opcode::LoadConstUndefined, [0.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ]))
        .unwrap();
        b.build()
    }

    #[test]
    fn test_match_and_strings() {
        let mut session = PatchSession::new(module());
        let ctx = PatchContext::new(&mut session, 0).unwrap();
        let found = ctx
            .match_first(&[query!(CreateClosure), query!(PutNewOwnByIdShort, _, _, "set")])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].ip, 2 + 5 + 4);
        assert_eq!(ctx.strings_of(&found[1]).unwrap(), ["set"]);
        assert_eq!(ctx.closure_of(&found[0]).unwrap(), 1);
        assert!(matches!(
            ctx.closure_of(&found[1]),
            Err(PatchError::NotAFunctionOperand(Opcode::PutNewOwnByIdShort))
        ));
    }

    #[test]
    fn test_match_failures() {
        let mut session = PatchSession::new(module());
        let ctx = PatchContext::new(&mut session, 0).unwrap();
        assert!(matches!(
            ctx.match_first(&[query!(Ret), query!(Ret)]),
            Err(PatchError::MatchFailed { function: 0, len: 2 })
        ));
        assert!(matches!(
            ctx.match_unique(&[query!(CreateClosure)]),
            Err(PatchError::NotUnique { count: 2, .. })
        ));
    }

    #[test]
    fn test_match_after_and_between() {
        let mut session = PatchSession::new(module());
        let ctx = PatchContext::new(&mut session, 0).unwrap();
        let puts = ctx.match_first(&[query!(PutNewOwnByIdShort)]).unwrap();
        let next = ctx.match_after(&puts[0], &[query!(CreateClosure)]).unwrap();
        assert_eq!(next[0].ip, puts[0].end());

        let ret = ctx.match_first(&[query!(Ret)]).unwrap();
        let inner = ctx
            .match_between(Some(&next[0]), Some(&ret[0]), &[query!(PutNewOwnByIdShort)])
            .unwrap();
        assert_eq!(ctx.strings_of(&inner[0]).unwrap(), ["set"]);
        assert!(ctx.match_between(Some(&ret[0]), Some(&puts[0]), &[query!(Ret)]).is_err());
    }

    #[test]
    fn test_edits() {
        let mut session = PatchSession::new(module());
        let mut ctx = PatchContext::new(&mut session, 0).unwrap();
        let found = ctx.match_first(&[query!(NewObject)]).unwrap();
        ctx.insert_before(&found[0], &[RawInstruction::new(Opcode::LoadConstZero, [1.into()])])
            .unwrap();
        let ret = ctx.match_first(&[query!(Ret)]).unwrap();
        ctx.insert_after(&ret[0], &[RawInstruction::new(Opcode::Ret, [1.into()])])
            .unwrap();
        let closures = ctx.match_first(&[query!(CreateClosure), query!(PutNewOwnByIdShort)]).unwrap();
        ctx.replace_range(&closures[0], &closures[1], &[]).unwrap();
        assert!(matches!(
            ctx.replace_range(&closures[1], &closures[0], &[]),
            Err(PatchError::InvalidRange { .. })
        ));

        let ops: Vec<_> = decode_all(&ctx.bytecode().unwrap().to_bytes(), 0)
            .unwrap()
            .into_iter()
            .map(|m| m.opcode)
            .collect();
        assert_eq!(
            ops,
            [
                Opcode::LoadConstZero,
                Opcode::NewObject,
                Opcode::CreateClosure,
                Opcode::PutNewOwnByIdShort,
                Opcode::Ret,
                Opcode::Ret,
            ]
        );
    }

    #[test]
    fn test_closure_context_and_new_function() {
        let mut session = PatchSession::new(module());
        let mut ctx = PatchContext::new(&mut session, 0).unwrap();
        let name = ctx.add_string("alwaysTrue");
        let created = ctx
            .create_function(FunctionSpec::new(name).frame_size(1).instructions(vec![
                RawInstruction::new(Opcode::LoadConstTrue, [0.into()]),
                RawInstruction::new(Opcode::Ret, [0.into()]),
            ]))
            .unwrap();

        let found = ctx.match_first(&[query!(CreateClosure)]).unwrap();
        {
            let mut inner = ctx.closure(&found[0]).unwrap();
            assert_eq!(inner.function(), 1);
            inner
                .replace_all(&[RawInstruction::new(Opcode::Ret, [0.into()])])
                .unwrap();
        }
        ctx.replace_one(&found[0], &[found[0].with_operand(2, created)]).unwrap();
        assert_eq!(ctx.closure_of(&ctx.match_first(&[query!(CreateClosure)]).unwrap()[0]).unwrap(), created);

        let module = session.commit();
        assert_eq!(module.function_name(created), Some("alwaysTrue"));
        let inner: Vec<_> = module.instructions(1).unwrap().map(|i| i.unwrap().operand(0)).collect();
        assert_eq!(inner, [Operand::Int(0)]);
    }
}
