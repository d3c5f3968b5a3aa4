//! In-memory bytecode module

use bytes::Bytes;
use num_bigint::BigUint;
use smallvec::SmallVec;

use crate::HBC_VERSION;
use crate::error::{BytecodeError, Result};
use crate::function::{
    Bytecode, BytecodeId, DebugOffsets, ExceptionHandler, Function, FunctionHeader, ProhibitInvoke,
};
use crate::instruction::{Instruction, InstructionIter, RawInstruction, encode_instructions};
use crate::layout::HASH_SIZE;
use crate::opcode::MAX_OPERANDS;
use crate::operand::{Operand, OperandRole};
use crate::records::{FunctionSourceEntry, OffsetLengthPair};
use crate::tables::{BigIntTable, RegExpTable, StringKind, StringTable};

/// A parsed bytecode module
///
/// Functions reference bytecode blobs by id; several functions may share one
/// blob, and the writer keeps them shared.
#[derive(Debug, Clone)]
pub struct Module {
    /// Format version the module was read with, re-emitted on write
    pub version: u32,
    /// SHA-1 of the original JavaScript source
    pub source_hash: [u8; HASH_SIZE],
    /// Function id of the global code
    pub global_code_index: u32,
    /// Segment id for split bundles
    pub segment_id: u32,
    /// Compilation option flags
    pub options: u32,
    /// Functions in id order
    pub functions: Vec<Function>,
    /// Distinct bytecode blobs
    pub bytecode: Vec<Bytecode>,
    /// String table
    pub strings: StringTable,
    /// One hash per identifier string
    pub identifier_hashes: Vec<u32>,
    /// BigInt constants
    pub bigints: BigIntTable,
    /// Compiled regular expressions
    pub regexps: RegExpTable,
    /// Array literal buffer
    pub array_buffer: Bytes,
    /// Object literal key buffer
    pub object_key_buffer: Bytes,
    /// Object literal value buffer
    pub object_value_buffer: Bytes,
    /// CommonJS module table
    pub cjs_modules: Vec<OffsetLengthPair>,
    /// Function source table
    pub function_sources: Vec<FunctionSourceEntry>,
    /// Debug info blob
    pub debug_info: Option<Bytes>,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            version: HBC_VERSION,
            source_hash: [0; HASH_SIZE],
            global_code_index: 0,
            segment_id: 0,
            options: 0,
            functions: Vec::new(),
            bytecode: Vec::new(),
            strings: StringTable::default(),
            identifier_hashes: Vec::new(),
            bigints: BigIntTable::default(),
            regexps: RegExpTable::default(),
            array_buffer: Bytes::new(),
            object_key_buffer: Bytes::new(),
            object_value_buffer: Bytes::new(),
            cjs_modules: Vec::new(),
            function_sources: Vec::new(),
            debug_info: None,
        }
    }
}

/// An operand with table references resolved
#[derive(Debug, Clone, PartialEq)]
pub enum TypedOperand<'m> {
    /// Register, immediate, offset or plain index
    Value(Operand),
    /// String table reference
    String {
        /// String id
        id: u32,
        /// Decoded contents
        text: &'m str,
    },
    /// Function table reference
    Function(u32),
    /// BigInt table reference
    BigInt {
        /// BigInt id
        id: u32,
        /// Constant value
        value: &'m BigUint,
    },
}

impl Module {
    /// Start building a module in memory
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    /// Function by id
    pub fn function(&self, id: u32) -> Result<&Function> {
        self.functions
            .get(id as usize)
            .ok_or(BytecodeError::FunctionIndex(id))
    }

    /// Bytecode blob of a function
    pub fn bytecode_of(&self, id: u32) -> Result<&Bytecode> {
        let func = self.function(id)?;
        self.bytecode
            .get(func.bytecode.index())
            .ok_or_else(|| BytecodeError::layout(format!("function {id} has a dangling bytecode id")))
    }

    /// Instructions of a function
    pub fn instructions(&self, id: u32) -> Result<InstructionIter<'_>> {
        Ok(InstructionIter::new(&self.bytecode_of(id)?.opcodes))
    }

    /// Decoded name of a function
    pub fn function_name(&self, id: u32) -> Option<&str> {
        let func = self.functions.get(id as usize)?;
        self.strings.get(func.header.function_name)
    }

    /// Resolve string, function and bigint operands of an instruction
    pub fn typed_operands<'m>(
        &'m self,
        insn: &Instruction<'_>,
    ) -> Result<SmallVec<[TypedOperand<'m>; MAX_OPERANDS]>> {
        let opcode = insn.opcode();
        (0..opcode.operand_count())
            .map(|i| {
                let value = insn.operand(i);
                let role = opcode.operand_role(i);
                let Some(id) = value.as_u32().filter(|_| role != OperandRole::Plain) else {
                    return Ok(TypedOperand::Value(value));
                };
                Ok(match role {
                    OperandRole::Plain => TypedOperand::Value(value),
                    OperandRole::String => TypedOperand::String {
                        id,
                        text: self.strings.try_get(id)?,
                    },
                    OperandRole::Function => {
                        self.function(id)?;
                        TypedOperand::Function(id)
                    }
                    OperandRole::BigInt => TypedOperand::BigInt {
                        id,
                        value: self.bigints.get(id).ok_or(BytecodeError::BigIntIndex(id))?,
                    },
                })
            })
            .collect()
    }

    /// Append a plain string. Identical strings are not merged.
    pub fn add_string(&mut self, text: &str) -> u32 {
        self.strings.push(text, StringKind::String)
    }

    /// Append an identifier string with its precomputed hash
    pub fn add_identifier(&mut self, text: &str, hash: u32) -> u32 {
        self.identifier_hashes.push(hash);
        self.strings.push(text, StringKind::Identifier)
    }

    /// Append a bigint constant
    pub fn add_bigint(&mut self, value: &BigUint) -> u32 {
        self.bigints.push(value)
    }

    /// Append an already compiled regexp
    pub fn add_regexp(&mut self, compiled: &[u8]) -> u32 {
        self.regexps.push(compiled)
    }

    /// Append a bytecode blob
    pub fn add_bytecode(&mut self, bytecode: Bytecode) -> BytecodeId {
        self.bytecode.push(bytecode);
        BytecodeId(self.bytecode.len() as u32 - 1)
    }

    /// Encode and append a new function, returning its id
    pub fn add_function(&mut self, spec: FunctionSpec) -> Result<u32> {
        if self.strings.get(spec.name).is_none() {
            return Err(BytecodeError::StringIndex(spec.name));
        }
        let opcodes = match spec.body {
            FunctionBody::Instructions(list) => Bytes::from(encode_instructions(&list)?),
            FunctionBody::Bytes(bytes) => bytes,
        };
        let header = FunctionHeader {
            param_count: spec.param_count,
            bytecode_size_in_bytes: opcodes.len() as u32,
            function_name: spec.name,
            frame_size: spec.frame_size,
            environment_size: spec.environment_size,
            prohibit_invoke: spec.prohibit_invoke,
            strict_mode: spec.strict_mode,
            has_exception_handler: spec.exception_handlers.is_some(),
            has_debug_info: spec.debug_offsets.is_some(),
            ..FunctionHeader::default()
        };
        let bytecode = self.add_bytecode(Bytecode {
            opcodes,
            jump_tables: spec.jump_tables,
        });
        self.functions.push(Function {
            header,
            bytecode,
            exception_handlers: spec.exception_handlers,
            debug_offsets: spec.debug_offsets,
        });
        let id = self.functions.len() as u32 - 1;
        tracing::trace!(id, name = spec.name, "added function");
        Ok(id)
    }
}

#[derive(Debug, Clone)]
enum FunctionBody {
    Instructions(Vec<RawInstruction>),
    Bytes(Bytes),
}

/// Description of a function to append to a module
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    name: u32,
    param_count: u32,
    frame_size: u32,
    environment_size: u32,
    prohibit_invoke: ProhibitInvoke,
    strict_mode: bool,
    body: FunctionBody,
    jump_tables: Option<Bytes>,
    exception_handlers: Option<Vec<ExceptionHandler>>,
    debug_offsets: Option<DebugOffsets>,
}

impl FunctionSpec {
    /// A function named by string id `name`, taking only `this`, with an empty body
    pub fn new(name: u32) -> Self {
        Self {
            name,
            param_count: 1,
            frame_size: 0,
            environment_size: 0,
            prohibit_invoke: ProhibitInvoke::None,
            strict_mode: false,
            body: FunctionBody::Instructions(Vec::new()),
            jump_tables: None,
            exception_handlers: None,
            debug_offsets: None,
        }
    }

    /// Set the parameter count, including `this`
    pub fn param_count(mut self, count: u32) -> Self {
        self.param_count = count;
        self
    }

    /// Set the register count
    pub fn frame_size(mut self, size: u32) -> Self {
        self.frame_size = size;
        self
    }

    /// Set the environment slot count
    pub fn environment_size(mut self, size: u32) -> Self {
        self.environment_size = size;
        self
    }

    /// Set the invocation restriction
    pub fn prohibit_invoke(mut self, value: ProhibitInvoke) -> Self {
        self.prohibit_invoke = value;
        self
    }

    /// Mark as strict mode
    pub fn strict(mut self, value: bool) -> Self {
        self.strict_mode = value;
        self
    }

    /// Body as instructions, encoded on insertion
    pub fn instructions(mut self, instructions: Vec<RawInstruction>) -> Self {
        self.body = FunctionBody::Instructions(instructions);
        self
    }

    /// Body as pre-encoded bytecode
    pub fn bytecode(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = FunctionBody::Bytes(bytes.into());
        self
    }

    /// Attach switch jump tables
    pub fn jump_tables(mut self, tables: impl Into<Bytes>) -> Self {
        self.jump_tables = Some(tables.into());
        self
    }

    /// Attach an exception handler table
    pub fn exception_handlers(mut self, handlers: Vec<ExceptionHandler>) -> Self {
        self.exception_handlers = Some(handlers);
        self
    }

    /// Attach debug offsets
    pub fn debug_offsets(mut self, offsets: DebugOffsets) -> Self {
        self.debug_offsets = Some(offsets);
        self
    }
}

/// Assembles a module from scratch
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Append a plain string
    pub fn add_string(&mut self, text: &str) -> u32 {
        self.module.add_string(text)
    }

    /// Append an identifier string
    pub fn add_identifier(&mut self, text: &str, hash: u32) -> u32 {
        self.module.add_identifier(text, hash)
    }

    /// Append a bigint constant
    pub fn add_bigint(&mut self, value: &BigUint) -> u32 {
        self.module.add_bigint(value)
    }

    /// Append a compiled regexp
    pub fn add_regexp(&mut self, compiled: &[u8]) -> u32 {
        self.module.add_regexp(compiled)
    }

    /// Append a function
    pub fn add_function(&mut self, spec: FunctionSpec) -> Result<u32> {
        self.module.add_function(spec)
    }

    /// Share an existing function's bytecode with a new function header
    pub fn add_alias(&mut self, of: u32, name: u32) -> Result<u32> {
        let original = self.module.function(of)?.clone();
        self.module.functions.push(Function {
            header: FunctionHeader {
                function_name: name,
                ..original.header
            },
            ..original
        });
        Ok(self.module.functions.len() as u32 - 1)
    }

    /// Set the global code function id
    pub fn global_code_index(&mut self, id: u32) -> &mut Self {
        self.module.global_code_index = id;
        self
    }

    /// Attach a debug info blob
    pub fn debug_info(&mut self, blob: impl Into<Bytes>) -> &mut Self {
        self.module.debug_info = Some(blob.into());
        self
    }

    /// Finish the module
    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn ret_true() -> Vec<RawInstruction> {
        vec![
            RawInstruction::new(Opcode::LoadConstTrue, [Operand::Int(0)]),
            RawInstruction::new(Opcode::Ret, [Operand::Int(0)]),
        ]
    }

    #[test]
    fn test_builder_functions() {
        let mut b = Module::builder();
        let name = b.add_string("global");
        let id = b
            .add_function(FunctionSpec::new(name).frame_size(1).instructions(ret_true()))
            .unwrap();
        let alias = b.add_alias(id, name).unwrap();
        let module = b.build();

        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.bytecode.len(), 1);
        assert_eq!(module.functions[alias as usize].bytecode, BytecodeId(0));
        assert_eq!(module.function_name(id), Some("global"));
        assert_eq!(module.bytecode_of(id).unwrap().opcodes.as_ref(), &[120, 0, 92, 0]);
        assert_eq!(module.functions[0].header.bytecode_size_in_bytes, 4);
    }

    #[test]
    fn test_unknown_name_rejected() {
        let mut module = Module::default();
        assert!(matches!(
            module.add_function(FunctionSpec::new(3)),
            Err(BytecodeError::StringIndex(3))
        ));
    }

    #[test]
    fn test_typed_operands() {
        let mut b = Module::builder();
        let name = b.add_string("f");
        let log = b.add_identifier("log", 0x1234);
        let big = b.add_bigint(&BigUint::from(7u32));
        let body = vec![
            RawInstruction::new(Opcode::GetByIdShort, [0.into(), 1.into(), 0.into(), log.into()]),
            RawInstruction::new(Opcode::CreateClosure, [0.into(), 0.into(), 0.into()]),
            RawInstruction::new(Opcode::LoadConstBigInt, [0.into(), big.into()]),
            RawInstruction::new(Opcode::Ret, [0.into()]),
        ];
        b.add_function(FunctionSpec::new(name).instructions(body)).unwrap();
        let module = b.build();

        let insns: Vec<_> = module.instructions(0).unwrap().map(|i| i.unwrap()).collect();
        let typed = module.typed_operands(&insns[0]).unwrap();
        assert_eq!(typed[3], TypedOperand::String { id: log, text: "log" });
        assert_eq!(typed[0], TypedOperand::Value(Operand::Int(0)));
        assert_eq!(module.typed_operands(&insns[1]).unwrap()[2], TypedOperand::Function(0));
        assert!(matches!(
            module.typed_operands(&insns[2]).unwrap()[1],
            TypedOperand::BigInt { id: 0, .. }
        ));
        assert_eq!(module.identifier_hashes, vec![0x1234]);
    }
}
