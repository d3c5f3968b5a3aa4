//! Property tests for the record and instruction codecs

use hbc_bytecode::bitfield::Record;
use hbc_bytecode::records::{SmallFunctionHeader, StringTableEntry};
use hbc_bytecode::{Instruction, Opcode, OperandKind, instructions};
use proptest::prelude::*;

hbc_bytecode::bitfield! {
    /// Fields crossing byte boundaries inside one word
    struct Odd {
        a: 3,
        b: 11,
        c: 17,
        d: 1,
        e: 32,
        f: 9,
    }
}

fn mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1 << bits) - 1 }
}

proptest! {
    #[test]
    fn prop_record_inverse(a in 0u32..8, b in 0u32..2048, c in 0u32..(1 << 17), d in 0u32..2, e: u32, f in 0u32..512) {
        let record = Odd { a, b, c, d, e, f };
        let mut bytes = vec![0u8; Odd::BYTE_SIZE];
        record.encode(&mut bytes);
        prop_assert_eq!(Odd::decode(&bytes), record);
    }

    #[test]
    fn prop_write_truncates_modulo_width(values in proptest::array::uniform6(any::<u32>())) {
        let [a, b, c, d, e, f] = values;
        let record = Odd { a, b, c, d, e, f };
        let mut bytes = vec![0u8; Odd::BYTE_SIZE];
        record.encode(&mut bytes);
        let back = Odd::decode(&bytes);
        prop_assert_eq!(back.a, a & mask(3));
        prop_assert_eq!(back.b, b & mask(11));
        prop_assert_eq!(back.c, c & mask(17));
        prop_assert_eq!(back.d, d & 1);
        prop_assert_eq!(back.e, e);
        prop_assert_eq!(back.f, f & mask(9));
    }

    #[test]
    fn prop_string_entry_inverse(utf16 in 0u32..2, offset in 0u32..(1 << 23), length in 0u32..256) {
        let entry = StringTableEntry { is_utf16: utf16, offset, length };
        let mut bytes = [0u8; 4];
        entry.write(&mut bytes, 0).unwrap();
        prop_assert_eq!(StringTableEntry::parse(&bytes).unwrap(), entry);
    }

    #[test]
    fn prop_small_header_parse_many(count in 0usize..8, fill: u8) {
        let bytes = vec![fill; count * SmallFunctionHeader::BYTE_SIZE];
        let headers = SmallFunctionHeader::parse_many(&bytes).unwrap();
        prop_assert_eq!(headers.len(), count);
        let mut out = vec![0u8; bytes.len()];
        SmallFunctionHeader::write_many(&headers, &mut out, 0).unwrap();
        // Two trailing bits of the last word belong to no field.
        prop_assert_eq!(SmallFunctionHeader::parse_many(&out).unwrap(), headers);
    }

    #[test]
    fn prop_iteration_stays_in_bounds(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut end = 0;
        for insn in instructions(&bytes) {
            match insn {
                Ok(insn) => {
                    prop_assert!(insn.next_ip() <= bytes.len());
                    prop_assert_eq!(insn.ip(), end);
                    end = insn.next_ip();
                }
                Err(_) => break,
            }
        }
        prop_assert!(end <= bytes.len());
    }
}

#[test]
fn test_width_is_opcode_plus_operands() {
    for &opcode in Opcode::ALL {
        let operands: usize = opcode.operand_kinds().iter().map(|k: &OperandKind| k.width()).sum();
        assert_eq!(opcode.width(), 1 + operands, "{opcode}");

        let mut bytes = vec![0u8; opcode.width()];
        bytes[0] = opcode.byte();
        let insn = Instruction::decode(&bytes, 0).unwrap();
        assert_eq!(insn.width(), opcode.width());
        assert_eq!(insn.operands().len(), opcode.operand_count());
    }
}

#[test]
fn test_operand_offsets_are_cumulative() {
    for &opcode in Opcode::ALL {
        let mut at = 1;
        for (i, kind) in opcode.operand_kinds().iter().enumerate() {
            assert_eq!(opcode.operand_offset(i), at, "{opcode} operand {i}");
            at += kind.width();
        }
    }
}
