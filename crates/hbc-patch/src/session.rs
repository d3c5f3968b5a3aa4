//! Patch sessions
//!
//! A session owns a module while it is being edited. A function's bytecode is
//! only turned into a [`Rope`] when first edited; untouched functions keep
//! referring to their original blob. Appended strings wait in a side list
//! until a created function or [`PatchSession::commit`] needs them in the
//! table. Commit flattens every edited rope into a new blob and repoints the
//! edited function to it.

use std::collections::BTreeMap;

use bytes::Bytes;
use hbc_bytecode::{Bytecode, FunctionSpec, Module, RawInstruction, encode_instructions};

use crate::error::{PatchError, Result};
use crate::query::{InstructionQuery, Matched, ResolvedQuery, decode_all};
use crate::rope::Rope;
use crate::strings::{PendingStrings, StringIndex};

/// Exclusive editing access to a module
#[derive(Debug)]
pub struct PatchSession {
    module: Module,
    strings: StringIndex,
    dirty: BTreeMap<u32, Rope>,
    pending_strings: Vec<String>,
    added_strings: Vec<u32>,
    created_functions: Vec<u32>,
}

impl PatchSession {
    /// Start editing `module`
    pub fn new(module: Module) -> Self {
        let strings = StringIndex::new(&module.strings);
        Self {
            module,
            strings,
            dirty: BTreeMap::new(),
            pending_strings: Vec::new(),
            added_strings: Vec::new(),
            created_functions: Vec::new(),
        }
    }

    /// The module as last committed; pending edits and strings are not visible here
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Number of functions, including created ones
    pub fn function_count(&self) -> u32 {
        self.module.functions.len() as u32
    }

    /// Current bytecode of a function, including pending edits
    pub fn bytecode(&self, id: u32) -> Result<Rope> {
        if let Some(rope) = self.dirty.get(&id) {
            return Ok(rope.clone());
        }
        Ok(Rope::from(self.module.bytecode_of(id)?.opcodes.clone()))
    }

    /// Whether a function has uncommitted edits
    pub fn is_dirty(&self, id: u32) -> bool {
        self.dirty.contains_key(&id)
    }

    /// Ids of functions with uncommitted edits, ascending
    pub fn dirty_functions(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.keys().copied()
    }

    /// Strings appended during this session
    pub fn added_strings(&self) -> &[u32] {
        &self.added_strings
    }

    /// Functions created during this session
    pub fn created_functions(&self) -> &[u32] {
        &self.created_functions
    }

    /// Editor for one function
    pub fn editor(&mut self, id: u32) -> Result<FunctionEditor<'_>> {
        self.module.function(id)?;
        Ok(FunctionEditor { session: self, id })
    }

    fn string_view(&self) -> PendingStrings<'_> {
        PendingStrings {
            table: &self.module.strings,
            pending: &self.pending_strings,
        }
    }

    /// Text of a string id, including strings not yet merged
    pub fn string(&self, id: u32) -> Option<&str> {
        self.string_view().text_of(id)
    }

    /// Id of the string equal to `text`
    pub fn find_string(&self, text: &str) -> Option<u32> {
        self.strings.find(&self.string_view(), text)
    }

    /// Id of the shortest string containing `text`
    pub fn find_partial_string(&self, text: &str) -> Option<u32> {
        self.strings.find_partial(&self.string_view(), text)
    }

    /// Id of a string equal to, or else containing, `text`
    pub fn resolve_string(&self, text: &str) -> Option<u32> {
        self.strings.resolve(&self.string_view(), text)
    }

    /// Resolve string operands of a query
    pub fn resolve_query(&self, query: &[InstructionQuery]) -> Result<Vec<ResolvedQuery>> {
        let view = self.string_view();
        query.iter().map(|q| q.resolve(&view, &self.strings)).collect()
    }

    /// Append a string. Every call creates a new entry, even for known text.
    ///
    /// The id is final; the text joins the module's table on the next merge.
    pub fn add_string(&mut self, text: &str) -> u32 {
        let id = (self.module.strings.len() + self.pending_strings.len()) as u32;
        self.pending_strings.push(text.to_owned());
        self.strings.insert(id, text);
        self.added_strings.push(id);
        tracing::trace!(id, text, "added string");
        id
    }

    /// Strings appended but not yet merged into the module
    pub fn pending_strings(&self) -> &[String] {
        &self.pending_strings
    }

    fn merge_strings(&mut self) {
        if self.pending_strings.is_empty() {
            return;
        }
        tracing::debug!(count = self.pending_strings.len(), "merging appended strings");
        for text in std::mem::take(&mut self.pending_strings) {
            self.module.add_string(&text);
        }
    }

    /// Encode and append a new function
    pub fn create_function(&mut self, spec: FunctionSpec) -> Result<u32> {
        // The new header may name an appended string.
        self.merge_strings();
        let id = self.module.add_function(spec)?;
        self.created_functions.push(id);
        Ok(id)
    }

    /// Fold pending edits into the module and hand it back
    pub fn commit(mut self) -> Module {
        self.merge_strings();
        for (id, rope) in std::mem::take(&mut self.dirty) {
            let func = &self.module.functions[id as usize];
            let jump_tables = self.module.bytecode[func.bytecode.index()].jump_tables.clone();
            let opcodes = rope.to_bytes();
            let size = opcodes.len() as u32;
            let blob = self.module.add_bytecode(Bytecode { opcodes, jump_tables });

            let func = &mut self.module.functions[id as usize];
            func.bytecode = blob;
            func.header.bytecode_size_in_bytes = size;
            tracing::debug!(id, size, leaves = rope.leaves().count(), "committed function");
        }
        self.module
    }
}

/// Edits one function's bytecode through its rope
#[derive(Debug)]
pub struct FunctionEditor<'s> {
    session: &'s mut PatchSession,
    id: u32,
}

impl FunctionEditor<'_> {
    /// Function id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current bytecode
    pub fn rope(&self) -> Result<Rope> {
        self.session.bytecode(self.id)
    }

    /// Current bytecode length
    pub fn len(&self) -> Result<usize> {
        Ok(self.rope()?.len())
    }

    /// Whether the current bytecode is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn update(&mut self, start: usize, end: usize, value: Rope) -> Result<()> {
        let rope = self.rope()?;
        if start > end || end > rope.len() {
            return Err(PatchError::InvalidRange {
                start,
                end,
                len: rope.len(),
            });
        }
        let edited = rope.replace(start, end, &value);
        tracing::trace!(id = self.id, start, end, inserted = value.len(), "edited function");
        self.session.dirty.insert(self.id, edited);
        Ok(())
    }

    /// Replace bytes `start..end`
    pub fn replace(&mut self, start: usize, end: usize, bytes: impl Into<Bytes>) -> Result<()> {
        self.update(start, end, Rope::from(bytes.into()))
    }

    /// Insert bytes at `at`
    pub fn insert(&mut self, at: usize, bytes: impl Into<Bytes>) -> Result<()> {
        self.update(at, at, Rope::from(bytes.into()))
    }

    /// Remove bytes `start..end`
    pub fn remove(&mut self, start: usize, end: usize) -> Result<()> {
        self.update(start, end, Rope::new())
    }

    /// Replace `start..end` with encoded instructions
    pub fn replace_instructions(&mut self, start: usize, end: usize, insns: &[RawInstruction]) -> Result<()> {
        let bytes = encode_instructions(insns)?;
        self.replace(start, end, bytes)
    }

    /// Decode the instructions in `start..end` of the current bytecode.
    ///
    /// The range must fall on instruction boundaries.
    pub fn instructions(&self, start: usize, end: usize) -> Result<Vec<Matched>> {
        let rope = self.rope()?;
        if start > end || end > rope.len() {
            return Err(PatchError::InvalidRange {
                start,
                end,
                len: rope.len(),
            });
        }
        decode_all(&rope.slice(start, end).to_bytes(), start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbc_bytecode::{Opcode, Operand};

    fn module() -> Module {
        let mut b = Module::builder();
        let name = b.add_string("f");
        let body = vec![
            RawInstruction::new(Opcode::LoadConstZero, [Operand::Int(0)]),
            RawInstruction::new(Opcode::Ret, [Operand::Int(0)]),
        ];
        let first = b
            .add_function(FunctionSpec::new(name).frame_size(1).instructions(body))
            .unwrap();
        b.add_alias(first, name).unwrap();
        b.build()
    }

    #[test]
    fn test_untouched_functions_stay_shared() {
        let session = PatchSession::new(module());
        assert!(!session.is_dirty(0));
        let committed = session.commit();
        assert_eq!(committed.bytecode.len(), 1);
    }

    #[test]
    fn test_edit_and_commit() {
        let mut session = PatchSession::new(module());
        let original = session.bytecode(0).unwrap();
        {
            let mut editor = session.editor(0).unwrap();
            editor
                .replace_instructions(0, 2, &[RawInstruction::new(Opcode::LoadConstTrue, [Operand::Int(0)])])
                .unwrap();
            assert_eq!(editor.instructions(0, 4).unwrap()[0].opcode, Opcode::LoadConstTrue);
        }
        assert!(session.is_dirty(0));
        // Ropes taken before an edit keep their contents.
        assert_eq!(original.to_bytes()[0], Opcode::LoadConstZero.byte());
        let module = session.commit();

        // Only the edited function moves to the new blob.
        assert_eq!(module.bytecode.len(), 2);
        assert_eq!(module.functions[0].bytecode.index(), 1);
        assert_eq!(module.functions[1].bytecode.index(), 0);
        let ops: Vec<_> = module.instructions(0).unwrap().map(|i| i.unwrap().opcode()).collect();
        assert_eq!(ops, [Opcode::LoadConstTrue, Opcode::Ret]);
    }

    #[test]
    fn test_invalid_range() {
        let mut session = PatchSession::new(module());
        let mut editor = session.editor(0).unwrap();
        assert!(matches!(
            editor.remove(3, 9),
            Err(PatchError::InvalidRange { len: 4, .. })
        ));
        assert!(!session.is_dirty(0));
    }

    #[test]
    fn test_strings_are_never_merged() {
        let mut session = PatchSession::new(module());
        let a = session.add_string("dup");
        let b = session.add_string("dup");
        assert_ne!(a, b);
        assert_eq!(session.find_string("dup"), Some(a));
        assert_eq!(session.added_strings(), &[a, b]);
    }

    #[test]
    fn test_appended_strings_wait_for_commit() {
        let mut session = PatchSession::new(module());
        let before = session.module().strings.len();
        let id = session.add_string("appended");
        assert_eq!(id as usize, before);
        assert_eq!(session.module().strings.len(), before);
        assert_eq!(session.pending_strings(), ["appended"]);
        assert_eq!(session.string(id), Some("appended"));
        assert_eq!(session.find_string("appended"), Some(id));

        let committed = session.commit();
        assert_eq!(committed.strings.len(), before + 1);
        assert_eq!(committed.strings.get(id), Some("appended"));
    }

    #[test]
    fn test_created_function_merges_its_name() {
        let mut session = PatchSession::new(module());
        let name = session.add_string("fresh");
        let id = session
            .create_function(FunctionSpec::new(name).instructions(vec![RawInstruction::new(
                Opcode::Ret,
                [Operand::Int(0)],
            )]))
            .unwrap();
        assert!(session.pending_strings().is_empty());
        assert_eq!(session.module().function_name(id), Some("fresh"));
    }
}
