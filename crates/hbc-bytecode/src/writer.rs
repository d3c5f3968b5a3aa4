//! Module writer
//!
//! Writing is two passes: every offset and size is computed first, then one
//! buffer of the final length is allocated and filled.

use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};

use crate::bitfield::Record;
use crate::error::{BytecodeError, Result};
use crate::function::{BytecodeId, FunctionHeader};
use crate::header::Header;
use crate::layout::{HASH_SIZE, Segment, SegmentTable, align4};
use crate::module::Module;
use crate::records::{
    FunctionSourceEntry, IdentifierHash, LargeFunctionHeader, OffsetLengthPair, SmallFunctionHeader,
    StringKindEntry, StringTableEntry,
};

/// Writer configuration
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Version to emit instead of the module's own
    pub version: Option<u32>,
}

/// SHA-1 of `bytes`
pub fn sha1_digest(bytes: &[u8]) -> [u8; HASH_SIZE] {
    Sha1::digest(bytes).into()
}

/// Check the trailing SHA-1 of a complete file
pub fn check_hash(file: &[u8]) -> Result<()> {
    let Some(split) = file.len().checked_sub(HASH_SIZE) else {
        return Err(BytecodeError::unexpected_end(0, HASH_SIZE, file.len()));
    };
    let (body, stored) = file.split_at(split);
    let computed = sha1_digest(body);
    if computed != stored {
        return Err(BytecodeError::HashMismatch {
            expected: hex::encode(stored),
            computed: hex::encode(computed),
        });
    }
    Ok(())
}

/// Where each piece of a function ends up in the output
#[derive(Debug, Clone, Copy)]
struct Placement {
    header: FunctionHeader,
    write_bytecode: bool,
}

/// Serialize with default options
pub fn write_module(module: &Module) -> Result<Vec<u8>> {
    write_module_with(module, &WriteOptions::default())
}

/// Serialize a module to a complete file, including the trailing hash
pub fn write_module_with(module: &Module, options: &WriteOptions) -> Result<Vec<u8>> {
    let (small_strings, overflow_strings) = module.strings.encode_entries();
    let kind_runs = module.strings.kind_runs();
    let string_storage = module.strings.storage();
    let bigints = module.bigints.raw();
    let regexps = module.regexps.raw();

    let mut header = Header {
        version: options.version.unwrap_or(module.version),
        source_hash: module.source_hash,
        global_code_index: module.global_code_index,
        function_count: count("functions", module.functions.len())?,
        string_kind_count: count("string kinds", kind_runs.len())?,
        identifier_count: count("identifiers", module.identifier_hashes.len())?,
        string_count: count("strings", small_strings.len())?,
        overflow_string_count: count("overflow strings", overflow_strings.len())?,
        string_storage_size: count("string storage", string_storage.len())?,
        bigint_count: count("bigints", bigints.len())?,
        bigint_storage_size: count("bigint storage", bigints.storage().len())?,
        regexp_count: count("regexps", regexps.len())?,
        regexp_storage_size: count("regexp storage", regexps.storage().len())?,
        array_buffer_size: count("array buffer", module.array_buffer.len())?,
        obj_key_buffer_size: count("object key buffer", module.object_key_buffer.len())?,
        obj_value_buffer_size: count("object value buffer", module.object_value_buffer.len())?,
        segment_id: module.segment_id,
        cjs_module_count: count("cjs modules", module.cjs_modules.len())?,
        function_source_count: count("function sources", module.function_sources.len())?,
        options: module.options,
        ..Header::default()
    };
    let table = SegmentTable::from_header(&header)?;

    let (placements, mut end) = place_functions(module, &table)?;
    if let Some(debug_info) = &module.debug_info {
        header.debug_info_offset = offset_u32("debug info", end)?;
        end += debug_info.len();
    }
    let file_length = end + HASH_SIZE;
    header.file_length = offset_u32("file", file_length)?;

    let mut out = vec![0u8; file_length];
    header.write(&mut out)?;

    let small_headers: Vec<SmallFunctionHeader> = placements
        .iter()
        .map(|p| {
            if p.header.overflowed {
                p.header.to_overflowed_small(p.header.info_offset)
            } else {
                p.header.to_small()
            }
        })
        .collect();
    SmallFunctionHeader::write_many(&small_headers, &mut out, table.offset(Segment::FunctionHeaders))?;
    StringKindEntry::write_many(&kind_runs, &mut out, table.offset(Segment::StringKinds))?;
    let hashes: Vec<IdentifierHash> = module
        .identifier_hashes
        .iter()
        .map(|&hash| IdentifierHash { hash })
        .collect();
    IdentifierHash::write_many(&hashes, &mut out, table.offset(Segment::IdentifierHashes))?;
    StringTableEntry::write_many(&small_strings, &mut out, table.offset(Segment::StringTable))?;
    OffsetLengthPair::write_many(&overflow_strings, &mut out, table.offset(Segment::OverflowStringTable))?;
    copy_at(&mut out, table.offset(Segment::StringStorage), &string_storage);
    copy_at(&mut out, table.offset(Segment::ArrayBuffer), &module.array_buffer);
    copy_at(&mut out, table.offset(Segment::ObjectKeyBuffer), &module.object_key_buffer);
    copy_at(&mut out, table.offset(Segment::ObjectValueBuffer), &module.object_value_buffer);
    OffsetLengthPair::write_many(bigints.entries(), &mut out, table.offset(Segment::BigIntTable))?;
    copy_at(&mut out, table.offset(Segment::BigIntStorage), bigints.storage());
    OffsetLengthPair::write_many(regexps.entries(), &mut out, table.offset(Segment::RegExpTable))?;
    copy_at(&mut out, table.offset(Segment::RegExpStorage), regexps.storage());
    OffsetLengthPair::write_many(&module.cjs_modules, &mut out, table.offset(Segment::CjsModuleTable))?;
    FunctionSourceEntry::write_many(
        &module.function_sources,
        &mut out,
        table.offset(Segment::FunctionSourceTable),
    )?;

    for (func, placement) in module.functions.iter().zip(&placements) {
        let header = &placement.header;
        if placement.write_bytecode {
            let bytecode = &module.bytecode[func.bytecode.index()];
            let at = header.offset as usize;
            copy_at(&mut out, at, &bytecode.opcodes);
            if let Some(tables) = &bytecode.jump_tables {
                copy_at(&mut out, align4(at + bytecode.opcodes.len()), tables);
            }
        }

        let mut at = header.info_offset as usize;
        if header.overflowed {
            header.to_large().write(&mut out, at)?;
            at += LargeFunctionHeader::BYTE_SIZE;
        }
        if let Some(handlers) = &func.exception_handlers {
            put_u32(&mut out, at, handlers.len() as u32);
            at += 4;
            for handler in handlers {
                put_u32(&mut out, at, handler.start);
                put_u32(&mut out, at + 4, handler.end);
                put_u32(&mut out, at + 8, handler.target);
                at += 12;
            }
        }
        if let Some(debug) = &func.debug_offsets {
            put_u32(&mut out, at, debug.source_locations);
            put_u32(&mut out, at + 4, debug.scope_desc_data);
            put_u32(&mut out, at + 8, debug.textified_callees);
        }
    }

    if let Some(debug_info) = &module.debug_info {
        copy_at(&mut out, header.debug_info_offset as usize, debug_info);
    }

    let digest = sha1_digest(&out[..file_length - HASH_SIZE]);
    out[file_length - HASH_SIZE..].copy_from_slice(&digest);

    tracing::debug!(
        file_length,
        functions = module.functions.len(),
        overflowed = placements.iter().filter(|p| p.header.overflowed).count(),
        "wrote module"
    );
    Ok(out)
}

/// Assign bytecode offsets (once per distinct blob) and trailer offsets.
///
/// Returns the placements and the first byte after the last trailer.
fn place_functions(module: &Module, table: &SegmentTable) -> Result<(Vec<Placement>, usize)> {
    let mut offset = table.bytecode_start();
    let mut assigned: FxHashMap<BytecodeId, u32> = FxHashMap::default();
    let mut placements = Vec::with_capacity(module.functions.len());

    for (id, func) in module.functions.iter().enumerate() {
        let bytecode = module.bytecode.get(func.bytecode.index()).ok_or_else(|| {
            BytecodeError::layout(format!("function {id} has a dangling bytecode id"))
        })?;
        let (at, write_bytecode) = match assigned.get(&func.bytecode) {
            Some(&at) => (at, false),
            None => {
                let at = offset_u32("bytecode", offset)?;
                assigned.insert(func.bytecode, at);
                offset += bytecode.opcodes.len();
                if let Some(tables) = &bytecode.jump_tables {
                    offset = align4(offset) + tables.len();
                }
                (at, true)
            }
        };

        placements.push(Placement {
            header: FunctionHeader {
                offset: at,
                bytecode_size_in_bytes: offset_u32("bytecode size", bytecode.opcodes.len())?,
                has_exception_handler: func.exception_handlers.is_some(),
                has_debug_info: func.debug_offsets.is_some(),
                info_offset: 0,
                overflowed: false,
                ..func.header
            },
            write_bytecode,
        });
    }

    let trailers_start = align4(offset);
    for placement in &mut placements {
        placement.header.overflowed = !placement.header.fits_small();
    }

    // Overflowing reserves room for a large header, which can push later
    // trailers past what the small encoding holds. Repeat until stable.
    loop {
        let mut at = trailers_start;
        for (func, placement) in module.functions.iter().zip(placements.iter_mut()) {
            placement.header.info_offset = offset_u32("trailer", at)?;
            if placement.header.overflowed {
                at += LargeFunctionHeader::BYTE_SIZE;
            }
            if let Some(handlers) = &func.exception_handlers {
                at += 4 + handlers.len() * 12;
            }
            if func.debug_offsets.is_some() {
                at += 12;
            }
        }

        let mut changed = false;
        for placement in &mut placements {
            if !placement.header.overflowed && !placement.header.fits_small() {
                placement.header.overflowed = true;
                changed = true;
            }
        }
        if !changed {
            for (id, placement) in placements.iter().enumerate() {
                if placement.header.overflowed {
                    tracing::trace!(id, info_offset = placement.header.info_offset, "overflowed function header");
                }
            }
            return Ok((placements, at));
        }
    }
}

/// Parse, rewrite and compare. Returns the parsed module when the bytes match.
pub fn verify_roundtrip(bytes: &[u8]) -> Result<Module> {
    check_hash(bytes)?;
    let module = Module::parse(bytes.to_vec())?;
    let output = write_module(&module)?;
    if output != bytes {
        let offset = output
            .iter()
            .zip(bytes)
            .position(|(a, b)| a != b)
            .unwrap_or(output.len().min(bytes.len()));
        return Err(BytecodeError::RoundTripMismatch {
            offset,
            input_len: bytes.len(),
            output_len: output.len(),
        });
    }
    Ok(module)
}

fn count(what: &'static str, n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| BytecodeError::SegmentOverflow {
        segment: what,
        size: n as u64,
    })
}

fn offset_u32(what: &'static str, offset: usize) -> Result<u32> {
    count(what, offset)
}

fn copy_at(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{DebugOffsets, ExceptionHandler};
    use crate::instruction::RawInstruction;
    use crate::module::FunctionSpec;
    use crate::opcode::Opcode;
    use crate::operand::Operand;

    const SAMPLE: &[u8] = include_bytes!("../tests/fixtures/sample.hbc");

    #[test]
    fn test_sample_roundtrip_is_exact() {
        let module = Module::parse(SAMPLE).unwrap();
        assert_eq!(write_module(&module).unwrap(), SAMPLE);
        assert!(verify_roundtrip(SAMPLE).is_ok());
    }

    #[test]
    fn test_hash_mismatch_reports_hex_digests() {
        let mut bytes = SAMPLE.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let (body, stored) = bytes.split_at(bytes.len() - HASH_SIZE);
        match check_hash(&bytes) {
            Err(BytecodeError::HashMismatch { expected, computed }) => {
                assert_eq!(expected, hex::encode(stored));
                assert_eq!(computed, hex::encode(sha1_digest(body)));
                assert_eq!(expected.len(), HASH_SIZE * 2);
            }
            other => panic!("expected a hash mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_version_override() {
        let module = Module::parse(SAMPLE).unwrap();
        let out = write_module_with(&module, &WriteOptions { version: Some(94) }).unwrap();
        assert_eq!(u32::from_le_bytes([out[8], out[9], out[10], out[11]]), 94);
        check_hash(&out).unwrap();
    }

    #[test]
    fn test_roundtrip_mismatch_reported() {
        let mut bytes = SAMPLE.to_vec();
        // Nonzero header padding survives parsing but is not re-emitted.
        bytes[120] = 1;
        let len = bytes.len();
        let digest = sha1_digest(&bytes[..len - HASH_SIZE]);
        bytes[len - HASH_SIZE..].copy_from_slice(&digest);
        assert!(matches!(
            verify_roundtrip(&bytes),
            Err(BytecodeError::RoundTripMismatch { offset: 120, .. })
        ));
    }

    #[test]
    fn test_trailers_and_jump_tables() {
        let mut b = Module::builder();
        let name = b.add_string("f");
        let body = vec![
            RawInstruction::new(Opcode::LoadConstUndefined, [Operand::Int(0)]),
            RawInstruction::new(Opcode::Ret, [Operand::Int(0)]),
        ];
        b.add_function(
            FunctionSpec::new(name)
                .frame_size(1)
                .instructions(body.clone())
                .jump_tables(vec![1, 0, 0, 0, 2, 0, 0, 0])
                .exception_handlers(vec![ExceptionHandler { start: 0, end: 2, target: 2 }]),
        )
        .unwrap();
        b.add_function(
            FunctionSpec::new(name)
                .instructions(body)
                .exception_handlers(Vec::new())
                .debug_offsets(DebugOffsets { source_locations: 5, scope_desc_data: 6, textified_callees: 7 }),
        )
        .unwrap();
        b.debug_info(vec![9u8; 6]);
        let module = b.build();

        let bytes = write_module(&module).unwrap();
        check_hash(&bytes).unwrap();
        let parsed = Module::parse(bytes.clone()).unwrap();

        assert_eq!(parsed.bytecode.len(), 2);
        assert_eq!(parsed.bytecode[0].jump_tables.as_deref(), Some(&[1, 0, 0, 0, 2, 0, 0, 0][..]));
        assert_eq!(parsed.bytecode[1].jump_tables, None);
        assert_eq!(parsed.functions[0].exception_handlers.as_ref().map(Vec::len), Some(1));
        assert_eq!(parsed.functions[1].exception_handlers, Some(Vec::new()));
        assert_eq!(parsed.functions[1].debug_offsets.map(|d| d.textified_callees), Some(7));
        assert_eq!(parsed.debug_info.as_deref(), Some(&[9u8; 6][..]));
        assert_eq!(write_module(&parsed).unwrap(), bytes);
    }
}
