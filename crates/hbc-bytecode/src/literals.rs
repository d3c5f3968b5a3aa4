//! Array and object literal buffers
//!
//! Literal buffers are runs of same-typed values, each run introduced by a
//! tag byte `0tttllll`, or `1tttllll llllllll` when the run is longer than 15.
//! `NewArrayWithBuffer` and `NewObjectWithBuffer` operands index into them.

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::module::Module;

/// Longest run one tag can describe
const MAX_RUN: usize = 0xfff;

/// A value stored in a literal buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// `null`
    Null,
    /// `true`
    True,
    /// `false`
    False,
    /// Double precision number
    Number(f64),
    /// String table id
    String(u32),
    /// Unsigned integer
    Integer(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Null = 0,
    True = 1,
    False = 2,
    Number = 3,
    LongString = 4,
    ShortString = 5,
    ByteString = 6,
    Integer = 7,
}

impl Tag {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Tag::Null,
            1 => Tag::True,
            2 => Tag::False,
            3 => Tag::Number,
            4 => Tag::LongString,
            5 => Tag::ShortString,
            6 => Tag::ByteString,
            _ => Tag::Integer,
        }
    }

    fn value_size(self) -> usize {
        match self {
            Tag::Null | Tag::True | Tag::False => 0,
            Tag::Number => 8,
            Tag::LongString | Tag::Integer => 4,
            Tag::ShortString => 2,
            Tag::ByteString => 1,
        }
    }

    fn of(literal: &Literal) -> Self {
        match *literal {
            Literal::Null => Tag::Null,
            Literal::True => Tag::True,
            Literal::False => Tag::False,
            Literal::Number(_) => Tag::Number,
            Literal::String(id) if id <= 0xff => Tag::ByteString,
            Literal::String(id) if id <= 0xffff => Tag::ShortString,
            Literal::String(_) => Tag::LongString,
            Literal::Integer(_) => Tag::Integer,
        }
    }
}

/// Decode `count` literals starting at `offset`.
///
/// A run may be longer than what is left of `count`; decoding stops at `count`.
pub fn parse_literals(buffer: &[u8], offset: usize, count: usize) -> Result<Vec<Literal>> {
    let byte_at = |at: usize| {
        buffer
            .get(at)
            .copied()
            .ok_or_else(|| BytecodeError::unexpected_end(at, 1, buffer.len()))
    };
    let value_at = |at: usize, size: usize| {
        buffer
            .get(at..at + size)
            .ok_or_else(|| BytecodeError::unexpected_end(at, size, buffer.len()))
    };

    let mut literals = Vec::with_capacity(count.min(1024));
    let mut at = offset;
    while literals.len() < count {
        let tag_at = at;
        let byte = byte_at(at)?;
        at += 1;
        let tag = Tag::from_bits(byte >> 4);
        let mut len = usize::from(byte & 0x0f);
        if byte & 0x80 != 0 {
            len = (len << 8) | usize::from(byte_at(at)?);
            at += 1;
        }
        if len == 0 {
            return Err(BytecodeError::InvalidLiteral {
                tag: tag as u8,
                offset: tag_at,
            });
        }

        let size = tag.value_size();
        for _ in 0..len.min(count - literals.len()) {
            let raw = value_at(at, size)?;
            at += size;
            literals.push(match tag {
                Tag::Null => Literal::Null,
                Tag::True => Literal::True,
                Tag::False => Literal::False,
                Tag::Number => Literal::Number(f64::from_le_bytes(raw.try_into().unwrap_or([0; 8]))),
                Tag::LongString => Literal::String(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
                Tag::ShortString => Literal::String(u32::from(u16::from_le_bytes([raw[0], raw[1]]))),
                Tag::ByteString => Literal::String(u32::from(raw[0])),
                Tag::Integer => Literal::Integer(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            });
        }
    }
    Ok(literals)
}

/// Encode literals, grouping consecutive values that share a tag
pub fn encode_literals(literals: &[Literal]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = literals;
    while let Some(first) = rest.first() {
        let tag = Tag::of(first);
        let run = rest
            .iter()
            .take(MAX_RUN)
            .take_while(|l| Tag::of(l) == tag)
            .count();

        let tag_bits = (tag as u8) << 4;
        if run > 0x0f {
            out.push(0x80 | tag_bits | (run >> 8) as u8);
            out.push(run as u8);
        } else {
            out.push(tag_bits | run as u8);
        }

        for literal in &rest[..run] {
            match *literal {
                Literal::Null | Literal::True | Literal::False => {}
                Literal::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
                Literal::String(id) => match tag {
                    Tag::ByteString => out.push(id as u8),
                    Tag::ShortString => out.extend_from_slice(&(id as u16).to_le_bytes()),
                    _ => out.extend_from_slice(&id.to_le_bytes()),
                },
                Literal::Integer(n) => out.extend_from_slice(&n.to_le_bytes()),
            }
        }
        rest = &rest[run..];
    }
    out
}

impl Module {
    /// Elements of an array literal, as referenced by `NewArrayWithBuffer`
    pub fn array_literals(&self, offset: u32, count: u32) -> Result<Vec<Literal>> {
        parse_literals(&self.array_buffer, offset as usize, count as usize)
    }

    /// Keys of an object literal, as referenced by `NewObjectWithBuffer`
    pub fn object_keys(&self, offset: u32, count: u32) -> Result<Vec<Literal>> {
        parse_literals(&self.object_key_buffer, offset as usize, count as usize)
    }

    /// Values of an object literal, as referenced by `NewObjectWithBuffer`
    pub fn object_values(&self, offset: u32, count: u32) -> Result<Vec<Literal>> {
        parse_literals(&self.object_value_buffer, offset as usize, count as usize)
    }

    /// Text of a string literal
    pub fn literal_text(&self, literal: &Literal) -> Option<&str> {
        match *literal {
            Literal::String(id) => self.strings.get(id),
            _ => None,
        }
    }
}
