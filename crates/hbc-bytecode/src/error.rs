//! Bytecode errors

use thiserror::Error;

use crate::opcode::Opcode;

/// Errors that can occur while decoding, encoding or laying out a bytecode file
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// The file does not start with the HBC signature
    #[error("Not a Hermes bytecode file (magic {0:#018x})")]
    InvalidMagic(u64),

    /// Opcode byte that is not part of the instruction set
    #[error("Invalid opcode {opcode:#04x} at ip {ip}")]
    InvalidOpcode {
        /// The offending byte
        opcode: u8,
        /// Byte offset within the bytecode
        ip: usize,
    },

    /// A read past the end of the available data
    #[error("Unexpected end of data: need {len} bytes at offset {offset}, have {available}")]
    UnexpectedEnd {
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Total bytes available
        available: usize,
    },

    /// An instruction whose operands run past the end of its bytecode
    #[error("Truncated {opcode:?} at ip {ip}: width {width}, {remaining} bytes remaining")]
    TruncatedInstruction {
        /// Decoded opcode
        opcode: Opcode,
        /// Byte offset within the bytecode
        ip: usize,
        /// Full instruction width
        width: usize,
        /// Bytes left in the sequence
        remaining: usize,
    },

    /// Operand does not fit its declared width and no long variant exists
    #[error("Operand {index} of {opcode:?} out of range: {value}")]
    OperandOutOfRange {
        /// Opcode being encoded
        opcode: Opcode,
        /// Operand position
        index: usize,
        /// Rendered value
        value: String,
    },

    /// Wrong number of operands for an opcode
    #[error("{opcode:?} takes {expected} operands, got {found}")]
    OperandCount {
        /// Opcode being encoded
        opcode: Opcode,
        /// Declared operand count
        expected: usize,
        /// Supplied operand count
        found: usize,
    },

    /// Floating point value supplied for an integer operand
    #[error("Operand {index} of {opcode:?} must be an integer")]
    OperandKind {
        /// Opcode being encoded
        opcode: Opcode,
        /// Operand position
        index: usize,
    },

    /// A computed segment or file size does not fit in 32 bits
    #[error("Segment {segment} overflows: {size} bytes")]
    SegmentOverflow {
        /// Segment name
        segment: &'static str,
        /// Computed size
        size: u64,
    },

    /// Structural inconsistency in the file layout
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// String id outside the string table
    #[error("String index {0} out of range")]
    StringIndex(u32),

    /// BigInt id outside the bigint table
    #[error("BigInt index {0} out of range")]
    BigIntIndex(u32),

    /// RegExp id outside the regexp table
    #[error("RegExp index {0} out of range")]
    RegExpIndex(u32),

    /// Function id outside the function table
    #[error("Function index {0} out of range")]
    FunctionIndex(u32),

    /// Trailing SHA-1 does not match the file contents
    #[error("Hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Hash stored in the file (hex)
        expected: String,
        /// Hash of the preceding bytes (hex)
        computed: String,
    },

    /// Rewriting a parsed file produced different bytes
    #[error("Round trip differs at byte {offset} (input {input_len} bytes, output {output_len} bytes)")]
    RoundTripMismatch {
        /// First differing byte
        offset: usize,
        /// Input length
        input_len: usize,
        /// Output length
        output_len: usize,
    },

    /// The streamed byte source ended before a requested range arrived
    #[error("Stream ended after {received} bytes; {len} bytes at offset {offset} never arrived")]
    StreamEnded {
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Bytes received before the end
        received: usize,
    },

    /// Malformed literal buffer entry
    #[error("Invalid literal tag {tag} at offset {offset}")]
    InvalidLiteral {
        /// Tag bits
        tag: u8,
        /// Byte offset within the buffer
        offset: usize,
    },

    /// IO error while reading or writing a file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BytecodeError {
    /// Create an out-of-bounds read error
    pub fn unexpected_end(offset: usize, len: usize, available: usize) -> Self {
        Self::UnexpectedEnd {
            offset,
            len,
            available,
        }
    }

    /// Create a layout error
    pub fn layout(msg: impl Into<String>) -> Self {
        Self::InvalidLayout(msg.into())
    }
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
