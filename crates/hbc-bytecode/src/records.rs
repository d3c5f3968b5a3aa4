//! Fixed-size table entries of the container format

use crate::bitfield;

bitfield! {
    /// Function header in its narrow, 16-byte form
    ///
    /// When `overflowed` is set, `offset` and `info_offset` hold the low and high
    /// 16 bits of the location of a [`LargeFunctionHeader`].
    pub struct SmallFunctionHeader {
        offset: 25,
        param_count: 7,
        bytecode_size_in_bytes: 15,
        function_name: 17,
        info_offset: 25,
        frame_size: 7,
        environment_size: 8,
        highest_read_cache_index: 8,
        highest_write_cache_index: 8,
        prohibit_invoke: 2,
        strict_mode: 1,
        has_exception_handler: 1,
        has_debug_info: 1,
        overflowed: 1,
    }
}

bitfield! {
    /// Function header with full-width fields, stored out of line
    pub struct LargeFunctionHeader {
        offset: 32,
        param_count: 32,
        bytecode_size_in_bytes: 32,
        function_name: 32,
        info_offset: 32,
        frame_size: 32,
        environment_size: 32,
        highest_read_cache_index: 8,
        highest_write_cache_index: 8,
        prohibit_invoke: 2,
        strict_mode: 1,
        has_exception_handler: 1,
        has_debug_info: 1,
        overflowed: 1,
    }
}

bitfield! {
    /// Run-length entry of the string kind table
    pub struct StringKindEntry {
        count: 31,
        kind: 1,
    }
}

bitfield! {
    /// Identifier hash
    pub struct IdentifierHash {
        hash: 32,
    }
}

bitfield! {
    /// String table entry; a `length` of `0xff` redirects to the overflow table
    pub struct StringTableEntry {
        is_utf16: 1,
        offset: 23,
        length: 8,
    }
}

bitfield! {
    /// Full-width (offset, length) pair
    pub struct OffsetLengthPair {
        offset: 32,
        length: 32,
    }
}

bitfield! {
    /// Function source table entry
    pub struct FunctionSourceEntry {
        function_id: 32,
        string_id: 32,
    }
}

/// Sentinel `length` marking an overflow string table entry
pub const OVERFLOW_STRING_LENGTH: u32 = 0xff;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::Record;

    #[test]
    fn test_record_sizes() {
        assert_eq!(SmallFunctionHeader::BYTE_SIZE, 16);
        assert_eq!(LargeFunctionHeader::BYTE_SIZE, 32);
        assert_eq!(StringKindEntry::BYTE_SIZE, 4);
        assert_eq!(IdentifierHash::BYTE_SIZE, 4);
        assert_eq!(StringTableEntry::BYTE_SIZE, 4);
        assert_eq!(OffsetLengthPair::BYTE_SIZE, 8);
        assert_eq!(FunctionSourceEntry::BYTE_SIZE, 8);
    }

    #[test]
    fn test_small_header_decode() {
        let bytes = [
            0xc4, 0x00, 0x00, 0x02, 0x18, 0x80, 0x00, 0x00, 0xdc, 0x00, 0x00, 0x16, 0x00, 0x02,
            0x00, 0x12,
        ];
        let header = SmallFunctionHeader::parse(&bytes).unwrap();
        assert_eq!(header.offset, 0xc4);
        assert_eq!(header.param_count, 1);
        assert_eq!(header.bytecode_size_in_bytes, 24);
        assert_eq!(header.function_name, 1);
        assert_eq!(header.info_offset, 0xdc);
        assert_eq!(header.frame_size, 11);
        assert_eq!(header.highest_read_cache_index, 2);
        assert_eq!(header.prohibit_invoke, 2);
        assert_eq!(header.has_debug_info, 1);
        assert_eq!(header.overflowed, 0);
    }

    #[test]
    fn test_string_entry_decode() {
        let entry = StringTableEntry::parse(&[0x06, 0x00, 0x00, 0x03]).unwrap();
        assert_eq!(
            entry,
            StringTableEntry {
                is_utf16: 0,
                offset: 3,
                length: 3
            }
        );
    }

    #[test]
    fn test_string_kind_decode() {
        let kinds = StringKindEntry::parse_many(&[2, 0, 0, 0, 2, 0, 0, 0x80]).unwrap();
        assert_eq!(kinds[0], StringKindEntry { count: 2, kind: 0 });
        assert_eq!(kinds[1], StringKindEntry { count: 2, kind: 1 });
    }
}
