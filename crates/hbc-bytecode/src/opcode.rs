//! Opcode table for bytecode version 96
//!
//! Each entry lists the operand encodings, optionally the operand positions
//! that index into the string, function or bigint tables, and optionally the
//! wider twin the encoder switches to when an operand no longer fits.

use serde::{Deserialize, Serialize};

use crate::operand::{OperandKind, OperandRole};

/// Largest operand count of any opcode
pub const MAX_OPERANDS: usize = 6;

macro_rules! opcodes {
    (@long) => { None };
    (@long $long:ident) => { Some(Opcode::$long) };
    (@role $index:ident) => { OperandRole::Plain };
    (@role $index:ident $role:ident $($pos:literal),+) => {
        if $( $index == $pos )||+ { OperandRole::$role } else { OperandRole::Plain }
    };
    (
        $(
            $name:ident ( $($kind:ident),* )
            $( [ $role:ident $($pos:literal),+ ] )?
            $( => $long:ident )?
        ),+ $(,)?
    ) => {
        /// A bytecode opcode. Discriminants are the wire values.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $( $name, )+
        }

        impl Opcode {
            /// Every opcode, indexed by wire value
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name ),+ ];

            /// Mnemonic
            pub const fn name(self) -> &'static str {
                match self {
                    $( Opcode::$name => stringify!($name), )+
                }
            }

            /// Operand encodings in order
            pub const fn operand_kinds(self) -> &'static [OperandKind] {
                match self {
                    $( Opcode::$name => &[ $( OperandKind::$kind ),* ], )+
                }
            }

            /// The wider twin used when an operand overflows, if any
            pub const fn long_variant(self) -> Option<Opcode> {
                match self {
                    $( Opcode::$name => opcodes!(@long $($long)?), )+
                }
            }

            /// What operand `index` refers to
            pub fn operand_role(self, index: usize) -> OperandRole {
                match self {
                    $( Opcode::$name => opcodes!(@role index $($role $($pos),+)?), )+
                }
            }
        }
    };
}

opcodes! {
    Unreachable(),
    NewObjectWithBuffer(Reg8, UInt16, UInt16, UInt16, UInt16) => NewObjectWithBufferLong,
    NewObjectWithBufferLong(Reg8, UInt16, UInt16, UInt32, UInt32),
    NewObject(Reg8),
    NewObjectWithParent(Reg8, Reg8),
    NewArrayWithBuffer(Reg8, UInt16, UInt16, UInt16) => NewArrayWithBufferLong,
    NewArrayWithBufferLong(Reg8, UInt16, UInt16, UInt32),
    NewArray(Reg8, UInt16),
    Mov(Reg8, Reg8) => MovLong,
    MovLong(Reg32, Reg32),
    Negate(Reg8, Reg8),
    Not(Reg8, Reg8),
    BitNot(Reg8, Reg8),
    TypeOf(Reg8, Reg8),
    Eq(Reg8, Reg8, Reg8),
    StrictEq(Reg8, Reg8, Reg8),
    Neq(Reg8, Reg8, Reg8),
    StrictNeq(Reg8, Reg8, Reg8),
    Less(Reg8, Reg8, Reg8),
    LessEq(Reg8, Reg8, Reg8),
    Greater(Reg8, Reg8, Reg8),
    GreaterEq(Reg8, Reg8, Reg8),
    Add(Reg8, Reg8, Reg8),
    AddN(Reg8, Reg8, Reg8),
    Mul(Reg8, Reg8, Reg8),
    MulN(Reg8, Reg8, Reg8),
    Div(Reg8, Reg8, Reg8),
    DivN(Reg8, Reg8, Reg8),
    Mod(Reg8, Reg8, Reg8),
    Sub(Reg8, Reg8, Reg8),
    SubN(Reg8, Reg8, Reg8),
    LShift(Reg8, Reg8, Reg8),
    RShift(Reg8, Reg8, Reg8),
    URshift(Reg8, Reg8, Reg8),
    BitAnd(Reg8, Reg8, Reg8),
    BitXor(Reg8, Reg8, Reg8),
    BitOr(Reg8, Reg8, Reg8),
    Inc(Reg8, Reg8),
    Dec(Reg8, Reg8),
    InstanceOf(Reg8, Reg8, Reg8),
    IsIn(Reg8, Reg8, Reg8),
    GetEnvironment(Reg8, UInt8),
    StoreToEnvironment(Reg8, UInt8, Reg8) => StoreToEnvironmentL,
    StoreToEnvironmentL(Reg8, UInt16, Reg8),
    StoreNPToEnvironment(Reg8, UInt8, Reg8) => StoreNPToEnvironmentL,
    StoreNPToEnvironmentL(Reg8, UInt16, Reg8),
    LoadFromEnvironment(Reg8, Reg8, UInt8) => LoadFromEnvironmentL,
    LoadFromEnvironmentL(Reg8, Reg8, UInt16),
    GetGlobalObject(Reg8),
    GetNewTarget(Reg8),
    CreateEnvironment(Reg8),
    CreateInnerEnvironment(Reg8, Reg8, UInt32),
    DeclareGlobalVar(UInt32) [String 0],
    ThrowIfHasRestrictedGlobalProperty(UInt32) [String 0],
    GetByIdShort(Reg8, Reg8, UInt8, UInt8) [String 3] => GetById,
    GetById(Reg8, Reg8, UInt8, UInt16) [String 3] => GetByIdLong,
    GetByIdLong(Reg8, Reg8, UInt8, UInt32) [String 3],
    TryGetById(Reg8, Reg8, UInt8, UInt16) [String 3] => TryGetByIdLong,
    TryGetByIdLong(Reg8, Reg8, UInt8, UInt32) [String 3],
    PutById(Reg8, Reg8, UInt8, UInt16) [String 3] => PutByIdLong,
    PutByIdLong(Reg8, Reg8, UInt8, UInt32) [String 3],
    TryPutById(Reg8, Reg8, UInt8, UInt16) [String 3] => TryPutByIdLong,
    TryPutByIdLong(Reg8, Reg8, UInt8, UInt32) [String 3],
    PutNewOwnByIdShort(Reg8, Reg8, UInt8) [String 2] => PutNewOwnById,
    PutNewOwnById(Reg8, Reg8, UInt16) [String 2] => PutNewOwnByIdLong,
    PutNewOwnByIdLong(Reg8, Reg8, UInt32) [String 2],
    PutNewOwnNEById(Reg8, Reg8, UInt16) [String 2] => PutNewOwnNEByIdLong,
    PutNewOwnNEByIdLong(Reg8, Reg8, UInt32) [String 2],
    PutOwnByIndex(Reg8, Reg8, UInt8) => PutOwnByIndexL,
    PutOwnByIndexL(Reg8, Reg8, UInt32),
    PutOwnByVal(Reg8, Reg8, Reg8, UInt8),
    DelById(Reg8, Reg8, UInt16) [String 2] => DelByIdLong,
    DelByIdLong(Reg8, Reg8, UInt32) [String 2],
    GetByVal(Reg8, Reg8, Reg8),
    PutByVal(Reg8, Reg8, Reg8),
    DelByVal(Reg8, Reg8, Reg8),
    PutOwnGetterSetterByVal(Reg8, Reg8, Reg8, Reg8, UInt8),
    GetPNameList(Reg8, Reg8, Reg8, Reg8),
    GetNextPName(Reg8, Reg8, Reg8, Reg8, Reg8),
    Call(Reg8, Reg8, UInt8) => CallLong,
    Construct(Reg8, Reg8, UInt8) => ConstructLong,
    Call1(Reg8, Reg8, Reg8),
    CallDirect(Reg8, UInt8, UInt16) [Function 2] => CallDirectLongIndex,
    Call2(Reg8, Reg8, Reg8, Reg8),
    Call3(Reg8, Reg8, Reg8, Reg8, Reg8),
    Call4(Reg8, Reg8, Reg8, Reg8, Reg8, Reg8),
    CallLong(Reg8, Reg8, UInt32),
    ConstructLong(Reg8, Reg8, UInt32),
    CallDirectLongIndex(Reg8, UInt8, UInt32) [Function 2],
    CallBuiltin(Reg8, UInt8, UInt8) => CallBuiltinLong,
    CallBuiltinLong(Reg8, UInt8, UInt32),
    GetBuiltinClosure(Reg8, UInt8),
    Ret(Reg8),
    Catch(Reg8),
    DirectEval(Reg8, Reg8, UInt8),
    Throw(Reg8),
    ThrowIfEmpty(Reg8, Reg8),
    Debugger(),
    AsyncBreakCheck(),
    ProfilePoint(UInt16),
    CreateClosure(Reg8, Reg8, UInt16) [Function 2] => CreateClosureLongIndex,
    CreateClosureLongIndex(Reg8, Reg8, UInt32) [Function 2],
    CreateGeneratorClosure(Reg8, Reg8, UInt16) [Function 2] => CreateGeneratorClosureLongIndex,
    CreateGeneratorClosureLongIndex(Reg8, Reg8, UInt32) [Function 2],
    CreateAsyncClosure(Reg8, Reg8, UInt16) [Function 2] => CreateAsyncClosureLongIndex,
    CreateAsyncClosureLongIndex(Reg8, Reg8, UInt32) [Function 2],
    CreateThis(Reg8, Reg8, Reg8),
    SelectObject(Reg8, Reg8, Reg8),
    LoadParam(Reg8, UInt8) => LoadParamLong,
    LoadParamLong(Reg8, UInt32),
    LoadConstUInt8(Reg8, UInt8) => LoadConstInt,
    LoadConstInt(Reg8, Imm32),
    LoadConstDouble(Reg8, Double),
    LoadConstBigInt(Reg8, UInt16) [BigInt 1] => LoadConstBigIntLongIndex,
    LoadConstBigIntLongIndex(Reg8, UInt32) [BigInt 1],
    LoadConstString(Reg8, UInt16) [String 1] => LoadConstStringLongIndex,
    LoadConstStringLongIndex(Reg8, UInt32) [String 1],
    LoadConstEmpty(Reg8),
    LoadConstUndefined(Reg8),
    LoadConstNull(Reg8),
    LoadConstTrue(Reg8),
    LoadConstFalse(Reg8),
    LoadConstZero(Reg8),
    CoerceThisNS(Reg8, Reg8),
    LoadThisNS(Reg8),
    ToNumber(Reg8, Reg8),
    ToNumeric(Reg8, Reg8),
    ToInt32(Reg8, Reg8),
    AddEmptyString(Reg8, Reg8),
    GetArgumentsPropByVal(Reg8, Reg8, Reg8),
    GetArgumentsLength(Reg8, Reg8),
    ReifyArguments(Reg8),
    CreateRegExp(Reg8, UInt32, UInt32, UInt32) [String 1, 2],
    SwitchImm(Reg8, UInt32, Addr32, UInt32, UInt32),
    StartGenerator(),
    ResumeGenerator(Reg8, Reg8),
    CompleteGenerator(),
    CreateGenerator(Reg8, Reg8, UInt16) [Function 2] => CreateGeneratorLongIndex,
    CreateGeneratorLongIndex(Reg8, Reg8, UInt32) [Function 2],
    IteratorBegin(Reg8, Reg8),
    IteratorNext(Reg8, Reg8, Reg8),
    IteratorClose(Reg8, UInt8),
    Jmp(Addr8) => JmpLong,
    JmpLong(Addr32),
    JmpTrue(Addr8, Reg8) => JmpTrueLong,
    JmpTrueLong(Addr32, Reg8),
    JmpFalse(Addr8, Reg8) => JmpFalseLong,
    JmpFalseLong(Addr32, Reg8),
    JmpUndefined(Addr8, Reg8) => JmpUndefinedLong,
    JmpUndefinedLong(Addr32, Reg8),
    SaveGenerator(Addr8) => SaveGeneratorLong,
    SaveGeneratorLong(Addr32),
    JLess(Addr8, Reg8, Reg8) => JLessLong,
    JLessLong(Addr32, Reg8, Reg8),
    JNotLess(Addr8, Reg8, Reg8) => JNotLessLong,
    JNotLessLong(Addr32, Reg8, Reg8),
    JLessN(Addr8, Reg8, Reg8) => JLessNLong,
    JLessNLong(Addr32, Reg8, Reg8),
    JNotLessN(Addr8, Reg8, Reg8) => JNotLessNLong,
    JNotLessNLong(Addr32, Reg8, Reg8),
    JLessEqual(Addr8, Reg8, Reg8) => JLessEqualLong,
    JLessEqualLong(Addr32, Reg8, Reg8),
    JNotLessEqual(Addr8, Reg8, Reg8) => JNotLessEqualLong,
    JNotLessEqualLong(Addr32, Reg8, Reg8),
    JLessEqualN(Addr8, Reg8, Reg8) => JLessEqualNLong,
    JLessEqualNLong(Addr32, Reg8, Reg8),
    JNotLessEqualN(Addr8, Reg8, Reg8) => JNotLessEqualNLong,
    JNotLessEqualNLong(Addr32, Reg8, Reg8),
    JGreater(Addr8, Reg8, Reg8) => JGreaterLong,
    JGreaterLong(Addr32, Reg8, Reg8),
    JNotGreater(Addr8, Reg8, Reg8) => JNotGreaterLong,
    JNotGreaterLong(Addr32, Reg8, Reg8),
    JGreaterN(Addr8, Reg8, Reg8) => JGreaterNLong,
    JGreaterNLong(Addr32, Reg8, Reg8),
    JNotGreaterN(Addr8, Reg8, Reg8) => JNotGreaterNLong,
    JNotGreaterNLong(Addr32, Reg8, Reg8),
    JGreaterEqual(Addr8, Reg8, Reg8) => JGreaterEqualLong,
    JGreaterEqualLong(Addr32, Reg8, Reg8),
    JNotGreaterEqual(Addr8, Reg8, Reg8) => JNotGreaterEqualLong,
    JNotGreaterEqualLong(Addr32, Reg8, Reg8),
    JGreaterEqualN(Addr8, Reg8, Reg8) => JGreaterEqualNLong,
    JGreaterEqualNLong(Addr32, Reg8, Reg8),
    JNotGreaterEqualN(Addr8, Reg8, Reg8) => JNotGreaterEqualNLong,
    JNotGreaterEqualNLong(Addr32, Reg8, Reg8),
    JEqual(Addr8, Reg8, Reg8) => JEqualLong,
    JEqualLong(Addr32, Reg8, Reg8),
    JNotEqual(Addr8, Reg8, Reg8) => JNotEqualLong,
    JNotEqualLong(Addr32, Reg8, Reg8),
    JStrictEqual(Addr8, Reg8, Reg8) => JStrictEqualLong,
    JStrictEqualLong(Addr32, Reg8, Reg8),
    JStrictNotEqual(Addr8, Reg8, Reg8) => JStrictNotEqualLong,
    JStrictNotEqualLong(Addr32, Reg8, Reg8),
    Add32(Reg8, Reg8, Reg8),
    Sub32(Reg8, Reg8, Reg8),
    Mul32(Reg8, Reg8, Reg8),
    Divi32(Reg8, Reg8, Reg8),
    Divu32(Reg8, Reg8, Reg8),
    Loadi8(Reg8, Reg8, Reg8),
    Loadu8(Reg8, Reg8, Reg8),
    Loadi16(Reg8, Reg8, Reg8),
    Loadu16(Reg8, Reg8, Reg8),
    Loadi32(Reg8, Reg8, Reg8),
    Loadu32(Reg8, Reg8, Reg8),
    Store8(Reg8, Reg8, Reg8),
    Store16(Reg8, Reg8, Reg8),
    Store32(Reg8, Reg8, Reg8),
}

/// Instruction width (opcode byte included), indexed by wire value
static WIDTHS: [u8; 256] = build_widths();

/// Byte offset of each operand from the opcode byte, indexed by wire value
static OPERAND_OFFSETS: [[u8; MAX_OPERANDS]; 256] = build_offsets();

/// Wire value of the shortest member of each opcode's width family
static CANONICAL: [u8; 256] = build_canonical();

const fn build_widths() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let kinds = Opcode::ALL[i].operand_kinds();
        let mut width = 1;
        let mut j = 0;
        while j < kinds.len() {
            width += kinds[j].width();
            j += 1;
        }
        table[i] = width as u8;
        i += 1;
    }
    table
}

const fn build_offsets() -> [[u8; MAX_OPERANDS]; 256] {
    let mut table = [[0u8; MAX_OPERANDS]; 256];
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let kinds = Opcode::ALL[i].operand_kinds();
        let mut at = 1;
        let mut j = 0;
        while j < kinds.len() {
            table[i][j] = at as u8;
            at += kinds[j].width();
            j += 1;
        }
        i += 1;
    }
    table
}

const fn build_canonical() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    // Short forms precede their long twins, so one forward pass settles chains.
    let mut i = 0;
    while i < Opcode::ALL.len() {
        if let Some(long) = Opcode::ALL[i].long_variant() {
            table[long as usize] = table[i];
        }
        i += 1;
    }
    table
}

impl Opcode {
    /// Decode a wire value
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Look up an opcode by mnemonic
    pub fn from_name(name: &str) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Wire value
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Encoded width: the opcode byte plus every operand
    #[inline]
    pub fn width(self) -> usize {
        WIDTHS[self as usize] as usize
    }

    /// Number of operands
    #[inline]
    pub fn operand_count(self) -> usize {
        self.operand_kinds().len()
    }

    /// Byte offset of operand `index` from the opcode byte
    #[inline]
    pub fn operand_offset(self, index: usize) -> usize {
        OPERAND_OFFSETS[self as usize][index] as usize
    }

    /// Shortest member of this opcode's width family
    #[inline]
    pub fn canonical(self) -> Opcode {
        Self::ALL[CANONICAL[self as usize] as usize]
    }

    /// Whether both opcodes belong to the same width family
    #[inline]
    pub fn same_family(self, other: Opcode) -> bool {
        self.canonical() == other.canonical()
    }

    /// Operand positions that carry `role`
    pub fn operands_with_role(self, role: OperandRole) -> impl Iterator<Item = usize> {
        (0..self.operand_count()).filter(move |&i| self.operand_role(i) == role)
    }

    /// Whether any operand is a relative jump offset
    pub fn is_jump(self) -> bool {
        self.operand_kinds().iter().any(|k| k.is_address())
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size_and_anchors() {
        assert_eq!(Opcode::ALL.len(), 206);
        assert_eq!(Opcode::GetGlobalObject.byte(), 48);
        assert_eq!(Opcode::GetByIdShort.byte(), 54);
        assert_eq!(Opcode::TryGetById.byte(), 57);
        assert_eq!(Opcode::PutNewOwnByIdShort.byte(), 63);
        assert_eq!(Opcode::Call2.byte(), 83);
        assert_eq!(Opcode::Ret.byte(), 92);
        assert_eq!(Opcode::CreateClosure.byte(), 100);
        assert_eq!(Opcode::LoadConstString.byte(), 115);
        assert_eq!(Opcode::LoadConstTrue.byte(), 120);
        assert_eq!(Opcode::Jmp.byte(), 142);
        assert_eq!(Opcode::Store32.byte(), 205);
        assert_eq!(Opcode::from_byte(206), None);
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.byte() as usize, i);
        }
    }

    #[test]
    fn test_widths_match_operand_kinds() {
        for &op in Opcode::ALL {
            let sum: usize = op.operand_kinds().iter().map(|k| k.width()).sum();
            assert_eq!(op.width(), 1 + sum, "{op}");
            assert!(op.operand_count() <= MAX_OPERANDS);
        }
        assert_eq!(Opcode::TryGetById.width(), 6);
        assert_eq!(Opcode::LoadConstDouble.width(), 10);
        assert_eq!(Opcode::SwitchImm.operand_offset(2), 6);
    }

    #[test]
    fn test_long_variants_widen() {
        for &op in Opcode::ALL {
            if let Some(long) = op.long_variant() {
                assert!(long.width() > op.width(), "{op} -> {long}");
                assert_eq!(long.operand_count(), op.operand_count());
                assert!(long > op);
            }
        }
    }

    #[test]
    fn test_canonical_families() {
        assert_eq!(Opcode::GetByIdLong.canonical(), Opcode::GetByIdShort);
        assert_eq!(Opcode::GetById.canonical(), Opcode::GetByIdShort);
        assert_eq!(Opcode::PutNewOwnByIdLong.canonical(), Opcode::PutNewOwnByIdShort);
        assert_eq!(Opcode::LoadConstInt.canonical(), Opcode::LoadConstUInt8);
        assert_eq!(Opcode::JStrictEqualLong.canonical(), Opcode::JStrictEqual);
        assert_eq!(Opcode::Ret.canonical(), Opcode::Ret);
        assert!(Opcode::CreateClosureLongIndex.same_family(Opcode::CreateClosure));
        assert!(!Opcode::CreateClosure.same_family(Opcode::CreateAsyncClosure));
    }

    #[test]
    fn test_operand_roles() {
        assert_eq!(Opcode::GetByIdShort.operand_role(3), OperandRole::String);
        assert_eq!(Opcode::GetByIdShort.operand_role(2), OperandRole::Plain);
        assert_eq!(Opcode::CreateClosure.operand_role(2), OperandRole::Function);
        assert_eq!(Opcode::LoadConstBigInt.operand_role(1), OperandRole::BigInt);
        assert_eq!(
            Opcode::CreateRegExp
                .operands_with_role(OperandRole::String)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(Opcode::JmpTrue.is_jump());
        assert!(!Opcode::Call.is_jump());
    }

    #[test]
    fn test_serde_by_name() {
        let json = serde_json::to_string(&Opcode::CreateClosure).unwrap();
        assert_eq!(json, "\"CreateClosure\"");
        let op: Opcode = serde_json::from_str("\"Ret\"").unwrap();
        assert_eq!(op, Opcode::Ret);
        assert_eq!(Opcode::from_name("LoadConstTrue"), Some(Opcode::LoadConstTrue));
    }
}
