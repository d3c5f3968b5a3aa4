//! # HBC Bytecode
//!
//! Reading and writing Hermes bytecode container files.
//!
//! ## Layout
//!
//! - **Header**: 128 bytes of counts and sizes, followed by fixed-size tables
//! - **Tables**: bit-packed records decoded through [`bitfield::Record`]
//! - **Bytecode**: one blob per distinct function body, shared where the file shares it
//! - **Trailer**: SHA-1 of everything before it
//!
//! [`Module::parse`] and [`writer::write_module`] are exact inverses for any
//! file the Hermes compiler emits. [`stream::parse_async`] parses while bytes
//! are still arriving.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bitfield;
pub mod error;
pub mod function;
pub mod header;
pub mod instruction;
pub mod layout;
pub mod literals;
pub mod module;
pub mod opcode;
pub mod operand;
pub mod parser;
pub mod records;
pub mod stream;
pub mod tables;
pub mod writer;

pub use error::{BytecodeError, Result};
pub use function::{Bytecode, BytecodeId, DebugOffsets, ExceptionHandler, Function, FunctionHeader, ProhibitInvoke};
pub use header::Header;
pub use instruction::{Instruction, RawInstruction, encode_instructions, instructions};
pub use literals::Literal;
pub use module::{FunctionSpec, Module, ModuleBuilder, TypedOperand};
pub use opcode::Opcode;
pub use operand::{Operand, OperandKind, OperandRole};
pub use parser::ParseOptions;
pub use stream::{StreamReader, parse_async, parse_streamed};
pub use tables::{StringKind, StringTable};
pub use writer::{WriteOptions, check_hash, verify_roundtrip, write_module, write_module_with};

/// File signature, stored little-endian in the first 8 bytes
pub const HBC_MAGIC: u64 = 0x1F19_03C1_03BC_1FC6;

/// Bytecode format version this crate reads and writes
pub const HBC_VERSION: u32 = 96;
