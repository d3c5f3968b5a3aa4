//! File header

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::layout::{HASH_SIZE, HEADER_SIZE};
use crate::{HBC_MAGIC, HBC_VERSION};

/// Number of `u32` fields following the source hash
const FIELD_COUNT: usize = 20;

/// Byte offset of the first `u32` field
const FIELDS_OFFSET: usize = 12 + HASH_SIZE;

/// The fixed 128-byte file header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Bytecode format version
    pub version: u32,
    /// SHA-1 of the JavaScript source the file was compiled from
    pub source_hash: [u8; HASH_SIZE],
    /// Total file length including the trailing hash
    pub file_length: u32,
    /// Function id of the global code
    pub global_code_index: u32,
    /// Number of function headers
    pub function_count: u32,
    /// Number of string kind runs
    pub string_kind_count: u32,
    /// Number of identifier hashes
    pub identifier_count: u32,
    /// Number of string table entries
    pub string_count: u32,
    /// Number of overflow string table entries
    pub overflow_string_count: u32,
    /// Size of string storage in bytes
    pub string_storage_size: u32,
    /// Number of bigint table entries
    pub bigint_count: u32,
    /// Size of bigint storage in bytes
    pub bigint_storage_size: u32,
    /// Number of regexp table entries
    pub regexp_count: u32,
    /// Size of regexp storage in bytes
    pub regexp_storage_size: u32,
    /// Size of the array literal buffer
    pub array_buffer_size: u32,
    /// Size of the object key buffer
    pub obj_key_buffer_size: u32,
    /// Size of the object value buffer
    pub obj_value_buffer_size: u32,
    /// Segment id for split bundles
    pub segment_id: u32,
    /// Number of CommonJS module table entries
    pub cjs_module_count: u32,
    /// Number of function source table entries
    pub function_source_count: u32,
    /// File offset of the debug info blob, 0 when absent
    pub debug_info_offset: u32,
    /// Compilation option flags
    pub options: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self::from_fields(HBC_VERSION, [0; HASH_SIZE], [0; FIELD_COUNT])
    }
}

impl Header {
    /// Decode a header from the first 128 bytes of a file.
    ///
    /// A wrong signature is fatal. A version other than [`HBC_VERSION`] is
    /// logged and parsing continues with the current layout.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_expecting(bytes, HBC_VERSION)
    }

    /// Like [`Header::parse`], warning when the version differs from `expected`
    pub fn parse_expecting(bytes: &[u8], expected: u32) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(BytecodeError::unexpected_end(0, HEADER_SIZE, bytes.len()));
        }

        let magic = u64::from_le_bytes(read_array(bytes, 0));
        if magic != HBC_MAGIC {
            return Err(BytecodeError::InvalidMagic(magic));
        }

        let version = u32::from_le_bytes(read_array(bytes, 8));
        if version != expected {
            tracing::warn!(version, expected, "unexpected bytecode version");
        }

        let source_hash = read_array(bytes, 12);
        let mut fields = [0u32; FIELD_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u32::from_le_bytes(read_array(bytes, FIELDS_OFFSET + i * 4));
        }

        Ok(Self::from_fields(version, source_hash, fields))
    }

    /// Encode the header into the first 128 bytes of `out`. Padding bytes are zeroed.
    pub fn write(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_SIZE {
            return Err(BytecodeError::unexpected_end(0, HEADER_SIZE, out.len()));
        }
        out[..HEADER_SIZE].fill(0);
        out[0..8].copy_from_slice(&HBC_MAGIC.to_le_bytes());
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..12 + HASH_SIZE].copy_from_slice(&self.source_hash);
        for (i, value) in self.fields().into_iter().enumerate() {
            let at = FIELDS_OFFSET + i * 4;
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn fields(&self) -> [u32; FIELD_COUNT] {
        [
            self.file_length,
            self.global_code_index,
            self.function_count,
            self.string_kind_count,
            self.identifier_count,
            self.string_count,
            self.overflow_string_count,
            self.string_storage_size,
            self.bigint_count,
            self.bigint_storage_size,
            self.regexp_count,
            self.regexp_storage_size,
            self.array_buffer_size,
            self.obj_key_buffer_size,
            self.obj_value_buffer_size,
            self.segment_id,
            self.cjs_module_count,
            self.function_source_count,
            self.debug_info_offset,
            self.options,
        ]
    }

    fn from_fields(version: u32, source_hash: [u8; HASH_SIZE], f: [u32; FIELD_COUNT]) -> Self {
        let [
            file_length,
            global_code_index,
            function_count,
            string_kind_count,
            identifier_count,
            string_count,
            overflow_string_count,
            string_storage_size,
            bigint_count,
            bigint_storage_size,
            regexp_count,
            regexp_storage_size,
            array_buffer_size,
            obj_key_buffer_size,
            obj_value_buffer_size,
            segment_id,
            cjs_module_count,
            function_source_count,
            debug_info_offset,
            options,
        ] = f;

        Self {
            version,
            source_hash,
            file_length,
            global_code_index,
            function_count,
            string_kind_count,
            identifier_count,
            string_count,
            overflow_string_count,
            string_storage_size,
            bigint_count,
            bigint_storage_size,
            regexp_count,
            regexp_storage_size,
            array_buffer_size,
            obj_key_buffer_size,
            obj_value_buffer_size,
            segment_id,
            cjs_module_count,
            function_source_count,
            debug_info_offset,
            options,
        }
    }
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}
