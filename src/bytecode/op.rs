use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// The instruction set. Stable ids are given by declaration order; the
/// set itself is fixed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
#[repr(u8)]
pub enum Opcode {
    // Control flow
    Br,
    CondBr,
    Arg,
    Call,
    CallHost,
    Ret,
    RetVal,

    // Memory
    Move,
    ObjectNew,
    ObjectSet,
    ObjectGet,

    // Number ops
    NumberAdd,
    NumberSub,
    NumberMul,
    NumberDiv,
    NumberEq,
    NumberNotEq,
    NumberGr,
    NumberLess,
    NumberGrEq,
    NumberLessEq,

    // Integer ops
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntEq,
    IntNotEq,
    IntGr,
    IntLess,
    IntGrEq,
    IntLessEq,

    // Coercion, reserved: executed by the VM, never emitted yet
    Convert,
    Truncate,

    // Constants
    LoadConst,
}

impl Opcode {
    /// True for `Ret` and `RetVal`.
    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Ret | Opcode::RetVal)
    }
}

/// One fixed-width instruction: exactly four bytes.
///
/// `a` is the first operand. Bytes 2-3 are either two more register
/// operands `b`/`c`, or one little-endian 16-bit short `s`; which one
/// depends on the opcode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct Inst {
    pub op: Opcode,
    pub a: u8,
    pub b: u8,
    pub c: u8,
}

impl Inst {
    pub fn abc(op: Opcode, a: u8, b: u8, c: u8) -> Inst {
        Inst { op, a, b, c }
    }

    pub fn with_s(op: Opcode, a: u8, s: u16) -> Inst {
        let [b, c] = s.to_le_bytes();
        Inst { op, a, b, c }
    }

    pub fn s(&self) -> u16 {
        u16::from_le_bytes([self.b, self.c])
    }

    pub fn set_s(&mut self, s: u16) {
        let [b, c] = s.to_le_bytes();
        self.b = b;
        self.c = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_are_four_bytes() {
        assert_eq!(std::mem::size_of::<Inst>(), 4);
    }

    #[test]
    fn test_short_operand_roundtrip() {
        let inst = Inst::with_s(Opcode::Br, 0, 0x1234);
        assert_eq!(inst.s(), 0x1234);

        let mut inst = Inst::abc(Opcode::CondBr, 3, 0, 0);
        inst.set_s(65535);
        assert_eq!(inst.s(), 65535);
        assert_eq!(inst.a, 3);
    }

    #[test]
    fn test_short_operand_is_little_endian() {
        let inst = Inst::with_s(Opcode::LoadConst, 1, 0x0102);
        assert_eq!((inst.b, inst.c), (0x02, 0x01));
    }
}
