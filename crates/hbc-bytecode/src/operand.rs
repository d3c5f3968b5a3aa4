//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Wire encoding of an instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// 8-bit register
    Reg8,
    /// 32-bit register
    Reg32,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 8-bit jump offset, relative to the instruction start
    Addr8,
    /// Signed 32-bit jump offset, relative to the instruction start
    Addr32,
    /// Signed 32-bit immediate
    Imm32,
    /// 64-bit float
    Double,
}

impl OperandKind {
    /// Encoded width in bytes
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            OperandKind::Reg8 | OperandKind::UInt8 | OperandKind::Addr8 => 1,
            OperandKind::UInt16 => 2,
            OperandKind::Reg32
            | OperandKind::UInt32
            | OperandKind::Addr32
            | OperandKind::Imm32 => 4,
            OperandKind::Double => 8,
        }
    }

    /// Whether the operand is a relative jump offset
    #[inline]
    pub const fn is_address(self) -> bool {
        matches!(self, OperandKind::Addr8 | OperandKind::Addr32)
    }

    /// Whether `value` can be encoded without truncation
    pub fn fits(self, value: Operand) -> bool {
        match (self, value) {
            (OperandKind::Double, _) => true,
            (_, Operand::Float(_)) => false,
            (kind, Operand::Int(v)) => {
                let (min, max) = kind.int_range();
                v >= min && v <= max
            }
        }
    }

    /// Inclusive integer range of an integer kind
    const fn int_range(self) -> (i64, i64) {
        match self {
            OperandKind::Reg8 | OperandKind::UInt8 => (0, u8::MAX as i64),
            OperandKind::UInt16 => (0, u16::MAX as i64),
            OperandKind::Reg32 | OperandKind::UInt32 => (0, u32::MAX as i64),
            OperandKind::Addr8 => (i8::MIN as i64, i8::MAX as i64),
            OperandKind::Addr32 | OperandKind::Imm32 => (i32::MIN as i64, i32::MAX as i64),
            OperandKind::Double => (i64::MIN, i64::MAX),
        }
    }

    /// Decode an operand of this kind from the start of `bytes`
    pub(crate) fn read(self, bytes: &[u8]) -> Operand {
        match self {
            OperandKind::Reg8 | OperandKind::UInt8 => Operand::Int(i64::from(bytes[0])),
            OperandKind::Addr8 => Operand::Int(i64::from(bytes[0] as i8)),
            OperandKind::UInt16 => Operand::Int(i64::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            OperandKind::Reg32 | OperandKind::UInt32 => {
                Operand::Int(i64::from(u32::from_le_bytes(array(bytes))))
            }
            OperandKind::Addr32 | OperandKind::Imm32 => {
                Operand::Int(i64::from(i32::from_le_bytes(array(bytes))))
            }
            OperandKind::Double => Operand::Float(f64::from_le_bytes(array(bytes))),
        }
    }

    /// Encode `value` into the start of `out`. The caller checks [`Self::fits`] first.
    pub(crate) fn write(self, out: &mut [u8], value: Operand) {
        match (self, value) {
            (OperandKind::Double, v) => out[..8].copy_from_slice(&v.as_f64().to_le_bytes()),
            (kind, v) => {
                let v = v.as_i64();
                match kind.width() {
                    1 => out[0] = v as u8,
                    2 => out[..2].copy_from_slice(&(v as u16).to_le_bytes()),
                    _ => out[..4].copy_from_slice(&(v as u32).to_le_bytes()),
                }
            }
        }
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// A raw operand value as stored in the instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Any integer-valued operand (registers, indices, offsets, immediates)
    Int(i64),
    /// A `Double` operand
    Float(f64),
}

impl Operand {
    /// Integer value; floats are truncated toward zero
    #[inline]
    pub fn as_i64(self) -> i64 {
        match self {
            Operand::Int(v) => v,
            Operand::Float(v) => v as i64,
        }
    }

    /// Value as `u32`, if it is a non-negative integer that fits
    #[inline]
    pub fn as_u32(self) -> Option<u32> {
        match self {
            Operand::Int(v) => u32::try_from(v).ok(),
            Operand::Float(_) => None,
        }
    }

    /// Floating point value
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Operand::Int(v) => v as f64,
            Operand::Float(v) => v,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_operand_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_operand_from_int!(u8, i8, u16, i16, u32, i32, i64);

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Float(value)
    }
}

/// What an integer operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandRole {
    /// A plain number, register or jump offset
    Plain,
    /// Index into the string table
    String,
    /// Index into the function table
    Function,
    /// Index into the bigint table
    BigInt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(OperandKind::Reg8.width(), 1);
        assert_eq!(OperandKind::UInt16.width(), 2);
        assert_eq!(OperandKind::Imm32.width(), 4);
        assert_eq!(OperandKind::Double.width(), 8);
    }

    #[test]
    fn test_fits() {
        assert!(OperandKind::Addr8.fits(Operand::Int(-128)));
        assert!(!OperandKind::Addr8.fits(Operand::Int(128)));
        assert!(!OperandKind::UInt8.fits(Operand::Int(-1)));
        assert!(OperandKind::UInt32.fits(Operand::Int(u32::MAX as i64)));
        assert!(!OperandKind::UInt16.fits(Operand::Float(1.0)));
        assert!(OperandKind::Double.fits(Operand::Int(3)));
    }

    #[test]
    fn test_signed_read() {
        assert_eq!(OperandKind::Addr8.read(&[0xfe]), Operand::Int(-2));
        assert_eq!(OperandKind::UInt8.read(&[0xfe]), Operand::Int(254));
        assert_eq!(
            OperandKind::Addr32.read(&[0xff, 0xff, 0xff, 0xff]),
            Operand::Int(-1)
        );
    }

    #[test]
    fn test_untagged_json() {
        let ops: Vec<Operand> = serde_json::from_str("[0, -3, 1.5]").unwrap();
        assert_eq!(ops, vec![Operand::Int(0), Operand::Int(-3), Operand::Float(1.5)]);
    }
}
