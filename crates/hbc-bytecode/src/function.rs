//! Function headers, trailers and bytecode blobs

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::records::{LargeFunctionHeader, SmallFunctionHeader};

/// Restriction on how a function may be invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProhibitInvoke {
    /// Must be called with `new`
    Call,
    /// Must not be called with `new` (arrow functions, methods)
    Construct,
    /// No restriction
    #[default]
    None,
}

impl ProhibitInvoke {
    /// Decode the 2-bit header field
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(ProhibitInvoke::Call),
            1 => Some(ProhibitInvoke::Construct),
            2 => Some(ProhibitInvoke::None),
            _ => None,
        }
    }

    /// Encode as the 2-bit header field
    pub fn bits(self) -> u32 {
        match self {
            ProhibitInvoke::Call => 0,
            ProhibitInvoke::Construct => 1,
            ProhibitInvoke::None => 2,
        }
    }
}

/// A function header with full-width fields
///
/// Location fields (`offset`, `bytecode_size_in_bytes`, `info_offset`) and the
/// trailer flags reflect the file the header was read from; the writer
/// recomputes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FunctionHeader {
    /// File offset of the bytecode
    pub offset: u32,
    /// Declared parameter count, including `this`
    pub param_count: u32,
    /// Bytecode length, excluding jump tables
    pub bytecode_size_in_bytes: u32,
    /// String id of the function name
    pub function_name: u32,
    /// File offset of the trailer (or of the large header when overflowed)
    pub info_offset: u32,
    /// Register count
    pub frame_size: u32,
    /// Environment slot count
    pub environment_size: u32,
    /// Highest read property cache slot
    pub highest_read_cache_index: u32,
    /// Highest write property cache slot
    pub highest_write_cache_index: u32,
    /// Invocation restriction
    pub prohibit_invoke: ProhibitInvoke,
    /// Strict mode function
    pub strict_mode: bool,
    /// An exception handler table follows in the trailer
    pub has_exception_handler: bool,
    /// Debug offsets follow in the trailer
    pub has_debug_info: bool,
    /// Stored out of line as a large header
    pub overflowed: bool,
}

impl FunctionHeader {
    fn fields(&self) -> [u32; 14] {
        [
            self.offset,
            self.param_count,
            self.bytecode_size_in_bytes,
            self.function_name,
            self.info_offset,
            self.frame_size,
            self.environment_size,
            self.highest_read_cache_index,
            self.highest_write_cache_index,
            self.prohibit_invoke.bits(),
            u32::from(self.strict_mode),
            u32::from(self.has_exception_handler),
            u32::from(self.has_debug_info),
            u32::from(self.overflowed),
        ]
    }

    fn from_fields(f: [u32; 14]) -> Result<Self> {
        let prohibit_invoke = ProhibitInvoke::from_bits(f[9])
            .ok_or_else(|| BytecodeError::layout(format!("invalid prohibitInvoke value {}", f[9])))?;
        Ok(Self {
            offset: f[0],
            param_count: f[1],
            bytecode_size_in_bytes: f[2],
            function_name: f[3],
            info_offset: f[4],
            frame_size: f[5],
            environment_size: f[6],
            highest_read_cache_index: f[7],
            highest_write_cache_index: f[8],
            prohibit_invoke,
            strict_mode: f[10] != 0,
            has_exception_handler: f[11] != 0,
            has_debug_info: f[12] != 0,
            overflowed: f[13] != 0,
        })
    }

    /// Decode a small header. An overflowed one still needs its large header merged.
    pub fn from_small(small: &SmallFunctionHeader) -> Result<Self> {
        Self::from_fields(small.fields())
    }

    /// Decode a large header; the result is always marked overflowed
    pub fn from_large(large: &LargeFunctionHeader) -> Result<Self> {
        let mut header = Self::from_fields(large.fields())?;
        header.overflowed = true;
        Ok(header)
    }

    /// File offset of the large header an overflowed small header points at
    pub fn large_header_offset(small: &SmallFunctionHeader) -> u32 {
        (small.info_offset << 16) | (small.offset & 0xffff)
    }

    /// Whether every field fits the small encoding
    pub fn fits_small(&self) -> bool {
        let layout = &SmallFunctionHeader::LAYOUT;
        self.fields()
            .iter()
            .enumerate()
            .take(9)
            .all(|(i, &value)| layout.fits(i, value))
    }

    /// Small encoding of a header that fits. Values are truncated otherwise.
    pub fn to_small(&self) -> SmallFunctionHeader {
        let mut fields = self.fields();
        fields[13] = 0;
        SmallFunctionHeader::from_fields(fields)
    }

    /// Small header stub for a header stored out of line at `large_at`.
    ///
    /// Fields are copied in order up to the first one that does not fit; the
    /// remaining fields and all flags except `overflowed` are zero.
    pub fn to_overflowed_small(&self, large_at: u32) -> SmallFunctionHeader {
        let layout = &SmallFunctionHeader::LAYOUT;
        let mut fields = [0u32; 14];
        for (i, value) in self.fields().into_iter().enumerate().take(9) {
            if !layout.fits(i, value) {
                break;
            }
            fields[i] = value;
        }
        fields[0] = large_at & 0xffff;
        fields[4] = large_at >> 16;
        fields[13] = 1;
        SmallFunctionHeader::from_fields(fields)
    }

    /// Full-width encoding stored at `info_offset`. The `overflowed` bit is left clear.
    pub fn to_large(&self) -> LargeFunctionHeader {
        let mut fields = self.fields();
        fields[13] = 0;
        LargeFunctionHeader::from_fields(fields)
    }
}

/// Both header encodings share field names and order
macro_rules! header_fields {
    ($($field:ident),+) => {
        trait HeaderRecord {
            fn fields(&self) -> [u32; 14];
            fn from_fields(f: [u32; 14]) -> Self;
        }

        impl HeaderRecord for SmallFunctionHeader {
            fn fields(&self) -> [u32; 14] {
                [$(self.$field),+]
            }

            fn from_fields(f: [u32; 14]) -> Self {
                let [$($field),+] = f;
                Self { $($field),+ }
            }
        }

        impl HeaderRecord for LargeFunctionHeader {
            fn fields(&self) -> [u32; 14] {
                [$(self.$field),+]
            }

            fn from_fields(f: [u32; 14]) -> Self {
                let [$($field),+] = f;
                Self { $($field),+ }
            }
        }
    };
}

header_fields!(
    offset,
    param_count,
    bytecode_size_in_bytes,
    function_name,
    info_offset,
    frame_size,
    environment_size,
    highest_read_cache_index,
    highest_write_cache_index,
    prohibit_invoke,
    strict_mode,
    has_exception_handler,
    has_debug_info,
    overflowed
);

/// One exception handler entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered bytecode offset
    pub start: u32,
    /// End of the covered range (exclusive)
    pub end: u32,
    /// Handler bytecode offset
    pub target: u32,
}

/// Offsets into the debug info blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DebugOffsets {
    /// Source location table offset
    pub source_locations: u32,
    /// Scope descriptor offset
    pub scope_desc_data: u32,
    /// Textified callee table offset
    pub textified_callees: u32,
}

/// Index into [`Module::bytecode`](crate::Module::bytecode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BytecodeId(pub u32);

impl BytecodeId {
    /// Index as `usize`
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A distinct bytecode blob, possibly shared by several functions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytecode {
    /// Instruction stream
    pub opcodes: Bytes,
    /// Switch jump tables stored after the instructions, 4-byte aligned
    pub jump_tables: Option<Bytes>,
}

impl Bytecode {
    /// Bytecode without jump tables
    pub fn new(opcodes: impl Into<Bytes>) -> Self {
        Self {
            opcodes: opcodes.into(),
            jump_tables: None,
        }
    }
}

/// A function: header, bytecode reference and trailer data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Header as read from the file
    pub header: FunctionHeader,
    /// Bytecode blob
    pub bytecode: BytecodeId,
    /// Exception handler table, present when the header flag is set
    pub exception_handlers: Option<Vec<ExceptionHandler>>,
    /// Debug offsets, present when the header flag is set
    pub debug_offsets: Option<DebugOffsets>,
}
