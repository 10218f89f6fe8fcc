//! Instruction set, codec, builder and disassembler

mod builder;
mod codec;
mod disasm;
mod opcode;

pub use builder::{CodeBuilder, Label};
pub use codec::{
    decode_all, encoded_size, needs_extended, pack, pack_into, read_at, unpack, Instruction,
    MAX_OPERAND, UNIT,
};
pub use disasm::{disassemble, format_instruction};
pub use opcode::{OperandKind, Opcode};

/// Comparison selected by a `COMPARE_OP` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less = 0,
    LessEqual = 1,
    Equal = 2,
    NotEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }
}

impl TryFrom<u32> for CompareOp {
    type Error = u32;

    fn try_from(operand: u32) -> Result<Self, Self::Error> {
        match operand {
            0 => Ok(CompareOp::Less),
            1 => Ok(CompareOp::LessEqual),
            2 => Ok(CompareOp::Equal),
            3 => Ok(CompareOp::NotEqual),
            4 => Ok(CompareOp::Greater),
            5 => Ok(CompareOp::GreaterEqual),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_op_roundtrip() {
        for op in [
            CompareOp::Less,
            CompareOp::LessEqual,
            CompareOp::Equal,
            CompareOp::NotEqual,
            CompareOp::Greater,
            CompareOp::GreaterEqual,
        ] {
            assert_eq!(CompareOp::try_from(op as u32), Ok(op));
        }
        assert_eq!(CompareOp::try_from(6), Err(6));
    }
}
