//! String, bigint and regexp tables

use std::sync::OnceLock;

use bytes::Bytes;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::records::{OVERFLOW_STRING_LENGTH, OffsetLengthPair, StringKindEntry, StringTableEntry};

/// Whether a string is an ordinary string or a property identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringKind {
    /// Ordinary string
    String,
    /// Identifier; has an entry in the identifier hash table
    Identifier,
}

impl StringKind {
    fn from_bit(bit: u32) -> Self {
        if bit == 0 {
            StringKind::String
        } else {
            StringKind::Identifier
        }
    }

    fn bit(self) -> u32 {
        match self {
            StringKind::String => 0,
            StringKind::Identifier => 1,
        }
    }
}

/// Location of one string in storage, with overflow entries already resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEntry {
    /// Characters are UTF-16LE code units rather than bytes
    pub is_utf16: bool,
    /// Byte offset into string storage
    pub offset: u32,
    /// Length in characters
    pub length: u32,
}

impl StringEntry {
    /// Length in storage bytes
    #[inline]
    pub fn byte_len(&self) -> usize {
        if self.is_utf16 {
            self.length as usize * 2
        } else {
            self.length as usize
        }
    }
}

/// The module's string table
///
/// Strings decode on first access and are cached for the table's lifetime.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    storage: Bytes,
    appended: Vec<u8>,
    entries: Vec<StringEntry>,
    kinds: Vec<StringKind>,
    decoded: Vec<OnceLock<String>>,
}

impl StringTable {
    /// Resolve the on-disk tables into a string table
    pub fn from_records(
        storage: Bytes,
        small: &[StringTableEntry],
        overflow: &[OffsetLengthPair],
        kind_runs: &[StringKindEntry],
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(small.len());
        for (id, entry) in small.iter().enumerate() {
            let (offset, length) = if entry.length == OVERFLOW_STRING_LENGTH {
                let pair = overflow.get(entry.offset as usize).ok_or_else(|| {
                    BytecodeError::layout(format!(
                        "string {id} points at missing overflow entry {}",
                        entry.offset
                    ))
                })?;
                (pair.offset, pair.length)
            } else {
                (entry.offset, entry.length)
            };
            entries.push(StringEntry {
                is_utf16: entry.is_utf16 != 0,
                offset,
                length,
            });
        }

        let mut kinds = Vec::with_capacity(entries.len());
        for run in kind_runs {
            kinds.extend(std::iter::repeat_n(StringKind::from_bit(run.kind), run.count as usize));
        }
        if kinds.len() != entries.len() {
            return Err(BytecodeError::layout(format!(
                "string kinds cover {} strings, table has {}",
                kinds.len(),
                entries.len()
            )));
        }

        let table = Self {
            decoded: vec![OnceLock::new(); entries.len()],
            storage,
            appended: Vec::new(),
            entries,
            kinds,
        };
        for (id, entry) in table.entries.iter().enumerate() {
            if entry.offset as usize + entry.byte_len() > table.storage_len() {
                return Err(BytecodeError::layout(format!("string {id} exceeds string storage")));
            }
        }
        Ok(table)
    }

    /// Number of strings
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved entry for a string id
    #[inline]
    pub fn entry(&self, id: u32) -> Option<&StringEntry> {
        self.entries.get(id as usize)
    }

    /// All resolved entries
    #[inline]
    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }

    /// Kind of a string id
    #[inline]
    pub fn kind(&self, id: u32) -> Option<StringKind> {
        self.kinds.get(id as usize).copied()
    }

    /// Raw storage bytes of a string
    pub fn bytes(&self, id: u32) -> Option<&[u8]> {
        let entry = self.entries.get(id as usize)?;
        let start = entry.offset as usize;
        let end = start + entry.byte_len();
        let base = self.storage.len();
        if start >= base {
            self.appended.get(start - base..end - base)
        } else {
            self.storage.get(start..end)
        }
    }

    /// Decoded contents of a string id
    pub fn get(&self, id: u32) -> Option<&str> {
        let slot = self.decoded.get(id as usize)?;
        if let Some(text) = slot.get() {
            return Some(text.as_str());
        }
        let entry = self.entries[id as usize];
        let bytes = self.bytes(id)?;
        Some(slot.get_or_init(|| decode_string(bytes, entry.is_utf16)).as_str())
    }

    /// Decoded contents, failing with [`BytecodeError::StringIndex`]
    pub fn try_get(&self, id: u32) -> Result<&str> {
        self.get(id).ok_or(BytecodeError::StringIndex(id))
    }

    /// Iterate `(id, contents)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        (0..self.entries.len() as u32).filter_map(move |id| self.get(id).map(|s| (id, s)))
    }

    /// Append a string and return its id. Identical strings are not merged.
    ///
    /// ASCII text is stored one byte per character; anything else as UTF-16LE.
    pub fn push(&mut self, text: &str, kind: StringKind) -> u32 {
        let offset = self.storage_len() as u32;
        let entry = if text.is_ascii() {
            self.appended.extend_from_slice(text.as_bytes());
            StringEntry {
                is_utf16: false,
                offset,
                length: text.len() as u32,
            }
        } else {
            let mut length = 0u32;
            for unit in text.encode_utf16() {
                self.appended.extend_from_slice(&unit.to_le_bytes());
                length += 1;
            }
            StringEntry {
                is_utf16: true,
                offset,
                length,
            }
        };

        let id = self.entries.len() as u32;
        self.entries.push(entry);
        self.kinds.push(kind);
        let slot = OnceLock::new();
        let _ = slot.set(text.to_owned());
        self.decoded.push(slot);
        id
    }

    /// Total size of string storage, including appended strings
    #[inline]
    pub fn storage_len(&self) -> usize {
        self.storage.len() + self.appended.len()
    }

    /// String storage as written to the file
    pub fn storage(&self) -> Bytes {
        if self.appended.is_empty() {
            self.storage.clone()
        } else {
            let mut out = Vec::with_capacity(self.storage_len());
            out.extend_from_slice(&self.storage);
            out.extend_from_slice(&self.appended);
            Bytes::from(out)
        }
    }

    /// Run-length encode the kind table
    pub fn kind_runs(&self) -> Vec<StringKindEntry> {
        let mut runs: Vec<StringKindEntry> = Vec::new();
        for &kind in &self.kinds {
            match runs.last_mut() {
                Some(run) if run.kind == kind.bit() => run.count += 1,
                _ => runs.push(StringKindEntry {
                    count: 1,
                    kind: kind.bit(),
                }),
            }
        }
        runs
    }

    /// Encode entries, promoting to the overflow table any whose offset or
    /// length does not fit the narrow fields
    pub fn encode_entries(&self) -> (Vec<StringTableEntry>, Vec<OffsetLengthPair>) {
        let layout = &StringTableEntry::LAYOUT;
        let mut small = Vec::with_capacity(self.entries.len());
        let mut overflow = Vec::new();
        for entry in &self.entries {
            let narrow = layout.fits(1, entry.offset) && entry.length < OVERFLOW_STRING_LENGTH;
            let (offset, length) = if narrow {
                (entry.offset, entry.length)
            } else {
                overflow.push(OffsetLengthPair {
                    offset: entry.offset,
                    length: entry.length,
                });
                (overflow.len() as u32 - 1, OVERFLOW_STRING_LENGTH)
            };
            small.push(StringTableEntry {
                is_utf16: u32::from(entry.is_utf16),
                offset,
                length,
            });
        }
        (small, overflow)
    }
}

fn decode_string(bytes: &[u8], is_utf16: bool) -> String {
    if is_utf16 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Table of (offset, length) entries into a storage blob
#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    storage: Bytes,
    entries: Vec<OffsetLengthPair>,
}

impl OffsetTable {
    /// Create a table, checking every entry lies inside `storage`
    pub fn new(storage: Bytes, entries: Vec<OffsetLengthPair>, what: &str) -> Result<Self> {
        for (id, entry) in entries.iter().enumerate() {
            if entry.offset as u64 + entry.length as u64 > storage.len() as u64 {
                return Err(BytecodeError::layout(format!("{what} {id} exceeds its storage")));
            }
        }
        Ok(Self { storage, entries })
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry records
    #[inline]
    pub fn entries(&self) -> &[OffsetLengthPair] {
        &self.entries
    }

    /// Storage blob
    #[inline]
    pub fn storage(&self) -> &Bytes {
        &self.storage
    }

    /// Bytes of one entry
    pub fn get(&self, id: u32) -> Option<Bytes> {
        let entry = self.entries.get(id as usize)?;
        let start = entry.offset as usize;
        Some(self.storage.slice(start..start + entry.length as usize))
    }

    fn push(&mut self, bytes: &[u8]) -> u32 {
        let mut storage = Vec::with_capacity(self.storage.len() + bytes.len());
        storage.extend_from_slice(&self.storage);
        storage.extend_from_slice(bytes);
        self.entries.push(OffsetLengthPair {
            offset: self.storage.len() as u32,
            length: bytes.len() as u32,
        });
        self.storage = Bytes::from(storage);
        self.entries.len() as u32 - 1
    }
}

/// BigInt constants
#[derive(Debug, Clone, Default)]
pub struct BigIntTable {
    table: OffsetTable,
    decoded: Vec<OnceLock<BigUint>>,
}

impl BigIntTable {
    /// Wrap an offset table
    pub fn new(table: OffsetTable) -> Self {
        Self {
            decoded: vec![OnceLock::new(); table.len()],
            table,
        }
    }

    /// Underlying offset table
    #[inline]
    pub fn raw(&self) -> &OffsetTable {
        &self.table
    }

    /// Number of constants
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Value of one constant; the first stored byte is the most significant
    pub fn get(&self, id: u32) -> Option<&BigUint> {
        let slot = self.decoded.get(id as usize)?;
        let bytes = self.table.get(id)?;
        Some(slot.get_or_init(|| BigUint::from_bytes_be(&bytes)))
    }

    /// Append a constant and return its id
    pub fn push(&mut self, value: &BigUint) -> u32 {
        let id = self.table.push(&value.to_bytes_be());
        self.decoded.push(OnceLock::from(value.clone()));
        id
    }
}

/// Compiled regular expressions, exposed as raw bytes
#[derive(Debug, Clone, Default)]
pub struct RegExpTable {
    table: OffsetTable,
}

impl RegExpTable {
    /// Wrap an offset table
    pub fn new(table: OffsetTable) -> Self {
        Self { table }
    }

    /// Underlying offset table
    #[inline]
    pub fn raw(&self) -> &OffsetTable {
        &self.table
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Compiled bytes of one regexp
    pub fn get(&self, id: u32) -> Option<Bytes> {
        self.table.get(id)
    }

    /// Append compiled regexp bytes and return the id
    pub fn push(&mut self, compiled: &[u8]) -> u32 {
        self.table.push(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> StringTable {
        let storage = Bytes::from_static(b"helloglobalconsole");
        let small = [
            StringTableEntry { is_utf16: 0, offset: 0, length: 5 },
            StringTableEntry { is_utf16: 0, offset: 5, length: 6 },
            StringTableEntry { is_utf16: 0, offset: 3, length: 3 },
            StringTableEntry { is_utf16: 0, offset: 11, length: 7 },
        ];
        let kinds = [StringKindEntry { count: 2, kind: 0 }, StringKindEntry { count: 2, kind: 1 }];
        StringTable::from_records(storage, &small, &[], &kinds).unwrap()
    }

    #[test]
    fn test_lookup_and_kinds() {
        let table = sample_table();
        let all: Vec<_> = table.iter().map(|(_, s)| s).collect();
        assert_eq!(all, ["hello", "global", "log", "console"]);
        assert_eq!(table.kind(1), Some(StringKind::String));
        assert_eq!(table.kind(2), Some(StringKind::Identifier));
        assert_eq!(table.get(4), None);
        assert!(matches!(table.try_get(9), Err(BytecodeError::StringIndex(9))));
    }

    #[test]
    fn test_overflow_redirect_and_utf16() {
        let storage = Bytes::from_static(&[b'a', b'b', 0x3c, 0xd8, 0x89, 0xdf]);
        let small = [
            StringTableEntry { is_utf16: 0, offset: 0, length: OVERFLOW_STRING_LENGTH },
            StringTableEntry { is_utf16: 1, offset: 2, length: 2 },
        ];
        let overflow = [OffsetLengthPair { offset: 0, length: 2 }];
        let kinds = [StringKindEntry { count: 2, kind: 0 }];
        let table = StringTable::from_records(storage, &small, &overflow, &kinds).unwrap();
        assert_eq!(table.get(0), Some("ab"));
        assert_eq!(table.get(1), Some("\u{1f389}"));
    }

    #[test]
    fn test_kind_count_mismatch() {
        let storage = Bytes::from_static(b"x");
        let small = [StringTableEntry { is_utf16: 0, offset: 0, length: 1 }];
        let kinds = [StringKindEntry { count: 2, kind: 0 }];
        assert!(StringTable::from_records(storage, &small, &[], &kinds).is_err());
    }

    #[test]
    fn test_push_and_reencode() {
        let mut table = sample_table();
        let id = table.push("héllo", StringKind::String);
        let dup = table.push("hello", StringKind::String);
        assert_eq!(id, 4);
        assert_eq!(dup, 5);
        assert_eq!(table.get(4), Some("héllo"));
        assert!(table.entry(4).unwrap().is_utf16);
        assert_eq!(table.bytes(5), Some(&b"hello"[..]));
        assert_eq!(table.storage().len(), 18 + 10 + 5);

        let runs = table.kind_runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[2], StringKindEntry { count: 2, kind: 0 });
    }

    #[test]
    fn test_long_strings_promote_to_overflow() {
        let mut table = StringTable::default();
        table.push("short", StringKind::String);
        table.push(&"x".repeat(300), StringKind::String);
        let (small, overflow) = table.encode_entries();
        assert_eq!(small[0].length, 5);
        assert_eq!(small[1], StringTableEntry { is_utf16: 0, offset: 0, length: OVERFLOW_STRING_LENGTH });
        assert_eq!(overflow, vec![OffsetLengthPair { offset: 5, length: 300 }]);
    }

    #[test]
    fn test_bigint_most_significant_first() {
        let table = OffsetTable::new(
            Bytes::from_static(&[0x01, 0x00, 0xff]),
            vec![OffsetLengthPair { offset: 0, length: 2 }, OffsetLengthPair { offset: 2, length: 1 }],
            "bigint",
        )
        .unwrap();
        let mut bigints = BigIntTable::new(table);
        assert_eq!(bigints.get(0), Some(&BigUint::from(256u32)));
        assert_eq!(bigints.get(1), Some(&BigUint::from(255u32)));

        let id = bigints.push(&BigUint::from(0x1234u32));
        assert_eq!(bigints.raw().get(id).unwrap().as_ref(), &[0x12, 0x34]);
    }

    #[test]
    fn test_offset_table_bounds() {
        let bad = OffsetTable::new(
            Bytes::from_static(b"ab"),
            vec![OffsetLengthPair { offset: 1, length: 2 }],
            "regexp",
        );
        assert!(bad.is_err());
    }
}
