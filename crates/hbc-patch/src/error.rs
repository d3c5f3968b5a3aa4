//! Patch errors

use hbc_bytecode::{BytecodeError, Opcode};
use thiserror::Error;

/// Errors raised while locating or applying a patch
#[derive(Debug, Error)]
pub enum PatchError {
    /// No string equals or contains the text
    #[error("Couldn't find string {0:?}")]
    StringNotFound(String),

    /// No string equals the identifier
    #[error("Couldn't find identifier {0:?}")]
    IdentifierNotFound(String),

    /// An instruction query matched nowhere in the searched range
    #[error("No match for a {len}-instruction query in function {function}")]
    MatchFailed {
        /// Function searched
        function: u32,
        /// Query length
        len: usize,
    },

    /// A query assumed to be unique matched more than once
    #[error("Query matched {count} times in function {function}")]
    NotUnique {
        /// Function searched
        function: u32,
        /// Number of matches
        count: usize,
    },

    /// Byte range outside the function's bytecode or reversed
    #[error("Invalid range {start}..{end} in {len} bytes of bytecode")]
    InvalidRange {
        /// Range start
        start: usize,
        /// Range end
        end: usize,
        /// Bytecode length
        len: usize,
    },

    /// The instruction has no function-id operand
    #[error("{0} does not reference a function")]
    NotAFunctionOperand(Opcode),

    /// Error from the bytecode codec
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, PatchError>;
