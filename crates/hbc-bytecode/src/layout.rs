//! Segment table: where each section of the file lives
//!
//! The segment table is a pure function of the header counts. Segments are
//! placed back to back from byte 128, each padded to a 4-byte boundary; the
//! bytecode region starts right after the last one. Parser and writer both
//! derive offsets from here, which keeps them symmetric.

use std::ops::Range;

use crate::bitfield::Record;
use crate::error::{BytecodeError, Result};
use crate::header::Header;
use crate::records::{
    FunctionSourceEntry, IdentifierHash, OffsetLengthPair, SmallFunctionHeader, StringKindEntry,
    StringTableEntry,
};

/// Size of the fixed file header
pub const HEADER_SIZE: usize = 128;

/// Size of the SHA-1 digest at the end of the file
pub const HASH_SIZE: usize = 20;

/// Round up to the next multiple of 4
#[inline]
pub const fn align4(size: usize) -> usize {
    (size + 3) & !3
}

/// Named sections of the file, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Small function headers
    FunctionHeaders,
    /// Run-length string kinds
    StringKinds,
    /// Identifier hashes
    IdentifierHashes,
    /// Small string table
    StringTable,
    /// Overflow string table
    OverflowStringTable,
    /// String character storage
    StringStorage,
    /// Array literal buffer
    ArrayBuffer,
    /// Object literal key buffer
    ObjectKeyBuffer,
    /// Object literal value buffer
    ObjectValueBuffer,
    /// BigInt table
    BigIntTable,
    /// BigInt storage
    BigIntStorage,
    /// RegExp table
    RegExpTable,
    /// RegExp storage
    RegExpStorage,
    /// CommonJS module table
    CjsModuleTable,
    /// Function source table
    FunctionSourceTable,
}

impl Segment {
    /// Every segment in file order
    pub const ALL: [Segment; 15] = [
        Segment::FunctionHeaders,
        Segment::StringKinds,
        Segment::IdentifierHashes,
        Segment::StringTable,
        Segment::OverflowStringTable,
        Segment::StringStorage,
        Segment::ArrayBuffer,
        Segment::ObjectKeyBuffer,
        Segment::ObjectValueBuffer,
        Segment::BigIntTable,
        Segment::BigIntStorage,
        Segment::RegExpTable,
        Segment::RegExpStorage,
        Segment::CjsModuleTable,
        Segment::FunctionSourceTable,
    ];

    /// Segment name
    pub const fn name(self) -> &'static str {
        match self {
            Segment::FunctionHeaders => "functionHeaders",
            Segment::StringKinds => "stringKinds",
            Segment::IdentifierHashes => "identifierHashes",
            Segment::StringTable => "stringTable",
            Segment::OverflowStringTable => "overflowStringTable",
            Segment::StringStorage => "stringStorage",
            Segment::ArrayBuffer => "arrayBuffer",
            Segment::ObjectKeyBuffer => "objectKeyBuffer",
            Segment::ObjectValueBuffer => "objectValueBuffer",
            Segment::BigIntTable => "bigIntTable",
            Segment::BigIntStorage => "bigIntStorage",
            Segment::RegExpTable => "regExpTable",
            Segment::RegExpStorage => "regExpStorage",
            Segment::CjsModuleTable => "cjsModuleTable",
            Segment::FunctionSourceTable => "functionSourceTable",
        }
    }

    /// Element count and element size for this segment
    fn dimensions(self, header: &Header) -> (u32, usize) {
        match self {
            Segment::FunctionHeaders => (header.function_count, SmallFunctionHeader::BYTE_SIZE),
            Segment::StringKinds => (header.string_kind_count, StringKindEntry::BYTE_SIZE),
            Segment::IdentifierHashes => (header.identifier_count, IdentifierHash::BYTE_SIZE),
            Segment::StringTable => (header.string_count, StringTableEntry::BYTE_SIZE),
            Segment::OverflowStringTable => {
                (header.overflow_string_count, OffsetLengthPair::BYTE_SIZE)
            }
            Segment::StringStorage => (header.string_storage_size, 1),
            Segment::ArrayBuffer => (header.array_buffer_size, 1),
            Segment::ObjectKeyBuffer => (header.obj_key_buffer_size, 1),
            Segment::ObjectValueBuffer => (header.obj_value_buffer_size, 1),
            Segment::BigIntTable => (header.bigint_count, OffsetLengthPair::BYTE_SIZE),
            Segment::BigIntStorage => (header.bigint_storage_size, 1),
            Segment::RegExpTable => (header.regexp_count, OffsetLengthPair::BYTE_SIZE),
            Segment::RegExpStorage => (header.regexp_storage_size, 1),
            Segment::CjsModuleTable => (header.cjs_module_count, OffsetLengthPair::BYTE_SIZE),
            Segment::FunctionSourceTable => {
                (header.function_source_count, FunctionSourceEntry::BYTE_SIZE)
            }
        }
    }
}

/// Offsets and lengths of every segment, derived from a header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTable {
    ranges: [(usize, usize); 15],
    bytecode_start: usize,
}

impl SegmentTable {
    /// Compute the table from header counts
    pub fn from_header(header: &Header) -> Result<Self> {
        let mut ranges = [(0usize, 0usize); 15];
        let mut cursor = HEADER_SIZE as u64;

        for (slot, segment) in ranges.iter_mut().zip(Segment::ALL) {
            let (count, stride) = segment.dimensions(header);
            let size = u64::from(count) * stride as u64;
            let end = cursor + size;
            if end > u64::from(u32::MAX) {
                return Err(BytecodeError::SegmentOverflow {
                    segment: segment.name(),
                    size,
                });
            }
            *slot = (cursor as usize, size as usize);
            cursor = align4(end as usize) as u64;
        }

        let table = Self {
            ranges,
            bytecode_start: cursor as usize,
        };
        tracing::debug!(bytecode_start = table.bytecode_start, "computed segment table");
        Ok(table)
    }

    /// File offset of a segment
    #[inline]
    pub fn offset(&self, segment: Segment) -> usize {
        self.ranges[segment as usize].0
    }

    /// Unpadded byte length of a segment
    #[inline]
    pub fn len(&self, segment: Segment) -> usize {
        self.ranges[segment as usize].1
    }

    /// Byte range of a segment within the file
    #[inline]
    pub fn range(&self, segment: Segment) -> Range<usize> {
        let (offset, len) = self.ranges[segment as usize];
        offset..offset + len
    }

    /// First byte after the last segment, where bytecode begins
    #[inline]
    pub fn bytecode_start(&self) -> usize {
        self.bytecode_start
    }

    /// Segments with their ranges, in file order
    pub fn iter(&self) -> impl Iterator<Item = (Segment, Range<usize>)> + '_ {
        Segment::ALL.into_iter().map(|s| (s, self.range(s)))
    }
}
