//! Bit-packed fixed-size records
//!
//! Every fixed-size table entry in a bytecode file is a little-endian record
//! whose fields occupy an arbitrary number of bits. Fields are laid out
//! least-significant bit first, in declaration order, inside consecutive
//! 32-bit words. A field may not cross a word boundary.
//!
//! Layouts are built by a `const fn`, so a malformed layout is rejected at
//! compile time for every layout declared as a `const`.

use crate::error::{BytecodeError, Result};
use crate::layout::align4;

/// A single named field of a [`Layout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: &'static str,
    /// Width in bits (at most 32)
    pub bits: u32,
    /// Bit offset from the start of the record
    pub offset: u32,
}

impl Field {
    /// Mask covering the field's width, unshifted
    #[inline]
    pub const fn mask(&self) -> u32 {
        if self.bits >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bits) - 1
        }
    }

    #[inline]
    const fn word(&self) -> usize {
        (self.offset / 32) as usize
    }

    #[inline]
    const fn shift(&self) -> u32 {
        self.offset % 32
    }
}

/// Bit layout of a record with `N` fields
#[derive(Debug, Clone, Copy)]
pub struct Layout<const N: usize> {
    fields: [Field; N],
    bit_size: u32,
    byte_size: usize,
}

impl<const N: usize> Layout<N> {
    /// Build a layout from `(name, bits)` pairs.
    ///
    /// Panics if a field is wider than 32 bits or would straddle two 32-bit words.
    pub const fn new(spec: [(&'static str, u32); N]) -> Self {
        let mut fields = [Field {
            name: "",
            bits: 0,
            offset: 0,
        }; N];

        let mut cursor = 0u32;
        let mut i = 0;
        while i < N {
            let (name, bits) = spec[i];
            if bits > 32 {
                panic!("bit-packed field is wider than 32 bits");
            }
            if bits > 0 && cursor % 32 + bits > 32 {
                panic!("bit-packed field straddles a 32-bit word");
            }
            fields[i] = Field {
                name,
                bits,
                offset: cursor,
            };
            cursor += bits;
            i += 1;
        }

        Self {
            fields,
            bit_size: cursor,
            byte_size: align4((cursor as usize).div_ceil(8)),
        }
    }

    /// Total number of bits used by the fields
    #[inline]
    pub const fn bit_size(&self) -> u32 {
        self.bit_size
    }

    /// Record size in bytes, padded to a 4-byte multiple
    #[inline]
    pub const fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Field descriptors in declaration order
    #[inline]
    pub fn fields(&self) -> &[Field; N] {
        &self.fields
    }

    /// Position of a field by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Whether `value` is representable in field `index` without truncation
    #[inline]
    pub fn fits(&self, index: usize, value: u32) -> bool {
        value <= self.fields[index].mask()
    }

    /// Read a single field. `bytes` must hold at least [`Self::byte_size`] bytes.
    #[inline]
    pub fn read(&self, bytes: &[u8], index: usize) -> u32 {
        let field = &self.fields[index];
        let at = field.word() * 4;
        let word = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        (word >> field.shift()) & field.mask()
    }

    /// Write a single field, truncating `value` to the field width.
    #[inline]
    pub fn write(&self, bytes: &mut [u8], index: usize, value: u32) {
        let field = &self.fields[index];
        let at = field.word() * 4;
        let word = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mask = field.mask() << field.shift();
        let word = (word & !mask) | ((value & field.mask()) << field.shift());
        bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Read every field in declaration order
    pub fn read_all(&self, bytes: &[u8]) -> [u32; N] {
        let mut values = [0u32; N];
        for (i, value) in values.iter_mut().enumerate() {
            *value = self.read(bytes, i);
        }
        values
    }

    /// Write every field in declaration order
    pub fn write_all(&self, bytes: &mut [u8], values: [u32; N]) {
        for (i, value) in values.into_iter().enumerate() {
            self.write(bytes, i, value);
        }
    }
}

/// A fixed-size record with a bit-packed [`Layout`]
///
/// Implemented by the [`bitfield!`](crate::bitfield!) macro.
pub trait Record: Sized + Copy {
    /// Encoded size in bytes
    const BYTE_SIZE: usize;

    /// Decode from exactly [`Self::BYTE_SIZE`] bytes
    fn decode(bytes: &[u8]) -> Self;

    /// Encode into exactly [`Self::BYTE_SIZE`] bytes. Values are truncated to field width.
    fn encode(&self, bytes: &mut [u8]);

    /// Parse one record from the start of `bytes`
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::BYTE_SIZE {
            return Err(BytecodeError::unexpected_end(0, Self::BYTE_SIZE, bytes.len()));
        }
        Ok(Self::decode(&bytes[..Self::BYTE_SIZE]))
    }

    /// Parse a packed array of records with a fixed stride
    fn parse_many(bytes: &[u8]) -> Result<Vec<Self>> {
        if bytes.len() % Self::BYTE_SIZE != 0 {
            return Err(BytecodeError::layout(format!(
                "{} bytes is not a multiple of the {}-byte record size",
                bytes.len(),
                Self::BYTE_SIZE
            )));
        }
        Ok(bytes.chunks_exact(Self::BYTE_SIZE).map(Self::decode).collect())
    }

    /// Write one record at `offset`
    fn write(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        let end = offset + Self::BYTE_SIZE;
        if end > buf.len() {
            return Err(BytecodeError::unexpected_end(offset, Self::BYTE_SIZE, buf.len()));
        }
        self.encode(&mut buf[offset..end]);
        Ok(())
    }

    /// Write consecutive records starting at `offset`
    fn write_many(items: &[Self], buf: &mut [u8], offset: usize) -> Result<()> {
        let len = items.len() * Self::BYTE_SIZE;
        if offset + len > buf.len() {
            return Err(BytecodeError::unexpected_end(offset, len, buf.len()));
        }
        for (item, chunk) in items
            .iter()
            .zip(buf[offset..offset + len].chunks_exact_mut(Self::BYTE_SIZE))
        {
            item.encode(chunk);
        }
        Ok(())
    }
}

/// Declare a bit-packed record struct.
///
/// ```
/// hbc_bytecode::bitfield! {
///     /// Two fields sharing one word
///     pub struct Pair {
///         low: 12,
///         high: 20,
///     }
/// }
///
/// use hbc_bytecode::bitfield::Record;
/// let pair = Pair::parse(&[0xff, 0xff, 0x00, 0x00]).unwrap();
/// assert_eq!(pair, Pair { low: 0xfff, high: 0xf });
/// ```
#[macro_export]
macro_rules! bitfield {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $bits:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name {
            $( $(#[$fmeta])* pub $field: u32, )+
        }

        impl $name {
            /// Bit layout of this record
            pub const LAYOUT: $crate::bitfield::Layout<{ $crate::bitfield!(@count $($field)+) }> =
                $crate::bitfield::Layout::new([$( (stringify!($field), $bits) ),+]);
        }

        impl $crate::bitfield::Record for $name {
            const BYTE_SIZE: usize = Self::LAYOUT.byte_size();

            fn decode(bytes: &[u8]) -> Self {
                let [$($field),+] = Self::LAYOUT.read_all(bytes);
                Self { $($field),+ }
            }

            fn encode(&self, bytes: &mut [u8]) {
                Self::LAYOUT.write_all(bytes, [$(self.$field),+]);
            }
        }
    };
    (@count) => { 0usize };
    (@count $head:ident $($tail:ident)*) => { 1usize + $crate::bitfield!(@count $($tail)*) };
}
