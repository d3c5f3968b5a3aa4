//! Module parser
//!
//! Parsing runs in two stages so the streaming reader can share them: the
//! fixed tables are decoded from their segments first, then functions are
//! assembled from the region holding bytecode, trailers and debug info.

use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::HBC_VERSION;
use crate::bitfield::Record;
use crate::error::{BytecodeError, Result};
use crate::function::{Bytecode, BytecodeId, DebugOffsets, ExceptionHandler, Function, FunctionHeader};
use crate::header::Header;
use crate::layout::{HASH_SIZE, HEADER_SIZE, Segment, SegmentTable, align4};
use crate::module::Module;
use crate::records::{
    FunctionSourceEntry, IdentifierHash, LargeFunctionHeader, OffsetLengthPair, SmallFunctionHeader,
    StringKindEntry, StringTableEntry,
};
use crate::tables::{BigIntTable, OffsetTable, RegExpTable, StringTable};
use crate::writer::check_hash;

/// Parser configuration
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Version to compare the header against; a mismatch is only logged
    pub expected_version: u32,
    /// Check the trailing SHA-1 against the file contents
    pub verify_hash: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            expected_version: HBC_VERSION,
            verify_hash: false,
        }
    }
}

impl Module {
    /// Parse a complete file with default options
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self> {
        Self::parse_with(bytes, &ParseOptions::default())
    }

    /// Parse a complete file
    pub fn parse_with(bytes: impl Into<Bytes>, options: &ParseOptions) -> Result<Self> {
        let bytes: Bytes = bytes.into();
        let header = Header::parse_expecting(&bytes, options.expected_version)?;
        let file_length = header.file_length as usize;
        if file_length < HEADER_SIZE + HASH_SIZE {
            return Err(BytecodeError::layout(format!("file length {file_length} is too small")));
        }
        if file_length > bytes.len() {
            return Err(BytecodeError::unexpected_end(0, file_length, bytes.len()));
        }
        let file = bytes.slice(..file_length);
        if options.verify_hash {
            check_hash(&file)?;
        }

        let table = SegmentTable::from_header(&header)?;
        let region = Region::new(0, file);
        let segments = Segment::ALL
            .iter()
            .map(|&s| region.slice(table.offset(s), table.len(s)))
            .collect::<Result<Vec<_>>>()?;

        decode_tables(header, table, segments)?.finish(&region)
    }
}

/// A contiguous part of the file starting at `base`
#[derive(Debug, Clone)]
pub(crate) struct Region {
    base: usize,
    bytes: Bytes,
}

impl Region {
    pub(crate) fn new(base: usize, bytes: Bytes) -> Self {
        Self { base, bytes }
    }

    fn end(&self) -> usize {
        self.base + self.bytes.len()
    }

    pub(crate) fn slice(&self, offset: usize, len: usize) -> Result<Bytes> {
        let out_of_range = || BytecodeError::unexpected_end(offset, len, self.end());
        let start = offset.checked_sub(self.base).ok_or_else(out_of_range)?;
        let end = start.checked_add(len).ok_or_else(out_of_range)?;
        if end > self.bytes.len() {
            return Err(out_of_range());
        }
        Ok(self.bytes.slice(start..end))
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Everything decodable from the fixed segments alone
#[derive(Debug)]
pub(crate) struct Tables {
    header: Header,
    table: SegmentTable,
    small_headers: Vec<SmallFunctionHeader>,
    strings: StringTable,
    identifier_hashes: Vec<u32>,
    bigints: BigIntTable,
    regexps: RegExpTable,
    array_buffer: Bytes,
    object_key_buffer: Bytes,
    object_value_buffer: Bytes,
    cjs_modules: Vec<OffsetLengthPair>,
    function_sources: Vec<FunctionSourceEntry>,
}

/// Decode the fixed tables. `segments` holds one buffer per [`Segment`], in file order.
pub(crate) fn decode_tables(header: Header, table: SegmentTable, segments: Vec<Bytes>) -> Result<Tables> {
    if segments.len() != Segment::ALL.len() {
        return Err(BytecodeError::layout(format!(
            "expected {} segments, got {}",
            Segment::ALL.len(),
            segments.len()
        )));
    }
    let seg = |s: Segment| &segments[s as usize];

    let strings = StringTable::from_records(
        seg(Segment::StringStorage).clone(),
        &StringTableEntry::parse_many(seg(Segment::StringTable))?,
        &OffsetLengthPair::parse_many(seg(Segment::OverflowStringTable))?,
        &StringKindEntry::parse_many(seg(Segment::StringKinds))?,
    )?;
    let bigints = BigIntTable::new(OffsetTable::new(
        seg(Segment::BigIntStorage).clone(),
        OffsetLengthPair::parse_many(seg(Segment::BigIntTable))?,
        "bigint",
    )?);
    let regexps = RegExpTable::new(OffsetTable::new(
        seg(Segment::RegExpStorage).clone(),
        OffsetLengthPair::parse_many(seg(Segment::RegExpTable))?,
        "regexp",
    )?);
    let identifier_hashes = IdentifierHash::parse_many(seg(Segment::IdentifierHashes))?
        .into_iter()
        .map(|h| h.hash)
        .collect();

    Ok(Tables {
        small_headers: SmallFunctionHeader::parse_many(seg(Segment::FunctionHeaders))?,
        strings,
        identifier_hashes,
        bigints,
        regexps,
        array_buffer: seg(Segment::ArrayBuffer).clone(),
        object_key_buffer: seg(Segment::ObjectKeyBuffer).clone(),
        object_value_buffer: seg(Segment::ObjectValueBuffer).clone(),
        cjs_modules: OffsetLengthPair::parse_many(seg(Segment::CjsModuleTable))?,
        function_sources: FunctionSourceEntry::parse_many(seg(Segment::FunctionSourceTable))?,
        header,
        table,
    })
}

impl Tables {
    /// Byte range, from the first bytecode to the trailing hash, that
    /// [`Tables::finish`] reads from
    pub(crate) fn body_range(&self) -> (usize, usize) {
        let start = self.table.bytecode_start();
        let end = (self.header.file_length as usize).saturating_sub(HASH_SIZE);
        (start, end.max(start))
    }

    /// Assemble functions, bytecode and debug info
    pub(crate) fn finish(self, body: &Region) -> Result<Module> {
        let headers = self
            .small_headers
            .iter()
            .enumerate()
            .map(|(id, small)| resolve_header(id, small, body))
            .collect::<Result<Vec<_>>>()?;

        let (functions, bytecode) = assemble_functions(&headers, body)?;

        let debug_info = match self.header.debug_info_offset {
            0 => None,
            offset => {
                let (_, end) = self.body_range();
                let offset = offset as usize;
                let len = end.checked_sub(offset).ok_or_else(|| {
                    BytecodeError::layout(format!("debug info offset {offset} is past the end of the file"))
                })?;
                Some(body.slice(offset, len)?)
            }
        };

        tracing::debug!(
            functions = functions.len(),
            bytecode = bytecode.len(),
            strings = self.strings.len(),
            "parsed module"
        );

        Ok(Module {
            version: self.header.version,
            source_hash: self.header.source_hash,
            global_code_index: self.header.global_code_index,
            segment_id: self.header.segment_id,
            options: self.header.options,
            functions,
            bytecode,
            strings: self.strings,
            identifier_hashes: self.identifier_hashes,
            bigints: self.bigints,
            regexps: self.regexps,
            array_buffer: self.array_buffer,
            object_key_buffer: self.object_key_buffer,
            object_value_buffer: self.object_value_buffer,
            cjs_modules: self.cjs_modules,
            function_sources: self.function_sources,
            debug_info,
        })
    }
}

/// Decode a small header, merging the large header it points at when overflowed
fn resolve_header(id: usize, small: &SmallFunctionHeader, body: &Region) -> Result<FunctionHeader> {
    if small.overflowed == 0 {
        return FunctionHeader::from_small(small);
    }
    let at = FunctionHeader::large_header_offset(small) as usize;
    tracing::trace!(id, at, "reading large function header");
    let large = LargeFunctionHeader::parse(&body.slice(at, LargeFunctionHeader::BYTE_SIZE)?)?;
    FunctionHeader::from_large(&large)
}

/// Deduplicate bytecode by placement and read every function's trailer.
///
/// Headers share a blob only when offset and size both agree: an empty body
/// starts where the next blob does. The space between one distinct blob start
/// and the next, past the instructions and alignment, holds that function's
/// jump tables. The last blob is bounded by the first function's trailer.
fn assemble_functions(headers: &[FunctionHeader], body: &Region) -> Result<(Vec<Function>, Vec<Bytecode>)> {
    let blob_key = |header: &FunctionHeader| (header.offset, header.bytecode_size_in_bytes);

    let mut spans: FxHashMap<(u32, u32), i64> = FxHashMap::default();
    let mut last: Option<(u32, u32)> = None;
    for header in headers {
        let key = blob_key(header);
        if spans.contains_key(&key) {
            continue;
        }
        spans.insert(key, 0);
        if let Some(prev) = last {
            spans.insert(prev, i64::from(header.offset) - i64::from(prev.0));
        }
        last = Some(key);
    }
    if let (Some(prev), Some(first)) = (last, headers.first()) {
        spans.insert(prev, i64::from(first.info_offset) - i64::from(prev.0));
    }

    let mut ids: FxHashMap<(u32, u32), BytecodeId> = FxHashMap::default();
    let mut bytecode = Vec::new();
    let mut functions = Vec::with_capacity(headers.len());

    for (id, header) in headers.iter().enumerate() {
        let key = blob_key(header);
        let bytecode_id = match ids.get(&key) {
            Some(&existing) => existing,
            None => {
                let offset = header.offset as usize;
                let size = header.bytecode_size_in_bytes as usize;
                let opcodes = body.slice(offset, size)?;

                let extra = spans.get(&key).copied().unwrap_or(0) - size as i64;
                let table_start = offset + size;
                let align = (align4(table_start) - table_start) as i64;
                let jump_tables = if extra > align {
                    tracing::trace!(id, len = extra - align, "function has jump tables");
                    Some(body.slice(align4(table_start), (extra - align) as usize)?)
                } else {
                    None
                };

                bytecode.push(Bytecode { opcodes, jump_tables });
                let new_id = BytecodeId(bytecode.len() as u32 - 1);
                ids.insert(key, new_id);
                new_id
            }
        };

        let mut at = header.info_offset as usize;
        if header.overflowed {
            at += LargeFunctionHeader::BYTE_SIZE;
        }

        let exception_handlers = if header.has_exception_handler {
            let count = body.u32_at(at)? as usize;
            at += 4;
            let mut handlers = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                handlers.push(ExceptionHandler {
                    start: body.u32_at(at)?,
                    end: body.u32_at(at + 4)?,
                    target: body.u32_at(at + 8)?,
                });
                at += 12;
            }
            Some(handlers)
        } else {
            None
        };

        let debug_offsets = if header.has_debug_info {
            Some(DebugOffsets {
                source_locations: body.u32_at(at)?,
                scope_desc_data: body.u32_at(at + 4)?,
                textified_callees: body.u32_at(at + 8)?,
            })
        } else {
            None
        };

        functions.push(Function {
            header: *header,
            bytecode: bytecode_id,
            exception_handlers,
            debug_offsets,
        });
    }

    Ok((functions, bytecode))
}
