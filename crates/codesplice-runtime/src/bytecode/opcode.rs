//! Instruction set
//!
//! Stack-based wordcode: every instruction is one 2-byte unit (opcode byte +
//! operand byte), optionally preceded by an `ExtendedArg` unit carrying the
//! operand's high byte.

/// What an opcode's operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Operand is ignored (always encoded as 0)
    None,
    /// Index into `constants`
    Const,
    /// Index into `names`
    Name,
    /// Index into `local_names`
    Local,
    /// Index into `cell_vars` followed by `free_vars`
    Free,
    /// Absolute byte offset of the jump target
    AbsoluteJump,
    /// Displacement from the end of the instruction to the jump target
    RelativeJump,
    /// Element or argument count
    Count,
    /// Comparison selector (see [`CompareOp`](crate::bytecode::CompareOp))
    Compare,
}

/// Bytecode opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack (0x01-0x09) =====
    /// Pop and discard top of stack
    PopTop = 0x01,
    /// Swap the two topmost items
    RotTwo = 0x02,
    /// Duplicate top of stack
    DupTop = 0x04,
    /// Do nothing
    Nop = 0x09,

    // ===== Unary (0x0B-0x0C) =====
    /// Pop a, push -a
    UnaryNegative = 0x0B,
    /// Pop a, push !truthy(a)
    UnaryNot = 0x0C,

    // ===== Binary (0x13-0x1B) =====
    /// Pop b, pop a, push a ** b
    BinaryPower = 0x13,
    /// Pop b, pop a, push a * b
    BinaryMultiply = 0x14,
    /// Pop b, pop a, push a % b
    BinaryModulo = 0x16,
    /// Pop b, pop a, push a + b
    BinaryAdd = 0x17,
    /// Pop b, pop a, push a - b
    BinarySubtract = 0x18,
    /// Pop b, pop a, push a // b
    BinaryFloorDivide = 0x1A,
    /// Pop b, pop a, push a / b
    BinaryTrueDivide = 0x1B,

    // ===== Iteration / return =====
    /// Pop a sequence, push an iterator over it
    GetIter = 0x44,
    /// Return top of stack to the caller
    ReturnValue = 0x53,

    // ===== Operand-carrying (0x5D-0x90) =====
    /// Push next item of the iterator on top, or pop it and jump [rel]
    ForIter = 0x5D,
    /// Pop into a global [name]
    StoreGlobal = 0x61,
    /// Push constant [const]
    LoadConst = 0x64,
    /// Pop n items, push them as a tuple [count]
    BuildTuple = 0x66,
    /// Pop b, pop a, push comparison [compare]
    CompareOp = 0x6B,
    /// Unconditional jump [rel]
    JumpForward = 0x6E,
    /// Jump if top is falsy, else pop [abs]
    JumpIfFalseOrPop = 0x6F,
    /// Jump if top is truthy, else pop [abs]
    JumpIfTrueOrPop = 0x70,
    /// Unconditional jump [abs]
    JumpAbsolute = 0x71,
    /// Pop condition, jump if falsy [abs]
    PopJumpIfFalse = 0x72,
    /// Pop condition, jump if truthy [abs]
    PopJumpIfTrue = 0x73,
    /// Push global [name]
    LoadGlobal = 0x74,
    /// Push local [local]
    LoadFast = 0x7C,
    /// Pop into local [local]
    StoreFast = 0x7D,
    /// Unbind local [local]
    DeleteFast = 0x7E,
    /// Call with n positional arguments [count]
    CallFunction = 0x83,
    /// Push captured variable [free]
    LoadDeref = 0x88,
    /// Pop into captured variable [free]
    StoreDeref = 0x89,

    // ===== Special =====
    /// High byte of the next instruction's operand
    ExtendedArg = 0x90,
}

impl Opcode {
    /// Every opcode, in byte order
    pub const ALL: [Opcode; 34] = [
        Opcode::PopTop,
        Opcode::RotTwo,
        Opcode::DupTop,
        Opcode::Nop,
        Opcode::UnaryNegative,
        Opcode::UnaryNot,
        Opcode::BinaryPower,
        Opcode::BinaryMultiply,
        Opcode::BinaryModulo,
        Opcode::BinaryAdd,
        Opcode::BinarySubtract,
        Opcode::BinaryFloorDivide,
        Opcode::BinaryTrueDivide,
        Opcode::GetIter,
        Opcode::ReturnValue,
        Opcode::ForIter,
        Opcode::StoreGlobal,
        Opcode::LoadConst,
        Opcode::BuildTuple,
        Opcode::CompareOp,
        Opcode::JumpForward,
        Opcode::JumpIfFalseOrPop,
        Opcode::JumpIfTrueOrPop,
        Opcode::JumpAbsolute,
        Opcode::PopJumpIfFalse,
        Opcode::PopJumpIfTrue,
        Opcode::LoadGlobal,
        Opcode::LoadFast,
        Opcode::StoreFast,
        Opcode::DeleteFast,
        Opcode::CallFunction,
        Opcode::LoadDeref,
        Opcode::StoreDeref,
        Opcode::ExtendedArg,
    ];

    /// Upper-case mnemonic used in listings and diagnostics
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::PopTop => "POP_TOP",
            Opcode::RotTwo => "ROT_TWO",
            Opcode::DupTop => "DUP_TOP",
            Opcode::Nop => "NOP",
            Opcode::UnaryNegative => "UNARY_NEGATIVE",
            Opcode::UnaryNot => "UNARY_NOT",
            Opcode::BinaryPower => "BINARY_POWER",
            Opcode::BinaryMultiply => "BINARY_MULTIPLY",
            Opcode::BinaryModulo => "BINARY_MODULO",
            Opcode::BinaryAdd => "BINARY_ADD",
            Opcode::BinarySubtract => "BINARY_SUBTRACT",
            Opcode::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Opcode::BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Opcode::GetIter => "GET_ITER",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::ForIter => "FOR_ITER",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::BuildTuple => "BUILD_TUPLE",
            Opcode::CompareOp => "COMPARE_OP",
            Opcode::JumpForward => "JUMP_FORWARD",
            Opcode::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Opcode::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Opcode::JumpAbsolute => "JUMP_ABSOLUTE",
            Opcode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Opcode::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::LoadFast => "LOAD_FAST",
            Opcode::StoreFast => "STORE_FAST",
            Opcode::DeleteFast => "DELETE_FAST",
            Opcode::CallFunction => "CALL_FUNCTION",
            Opcode::LoadDeref => "LOAD_DEREF",
            Opcode::StoreDeref => "STORE_DEREF",
            Opcode::ExtendedArg => "EXTENDED_ARG",
        }
    }

    /// What the operand of this opcode addresses
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::LoadConst => OperandKind::Const,
            Opcode::LoadGlobal | Opcode::StoreGlobal => OperandKind::Name,
            Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => OperandKind::Local,
            Opcode::LoadDeref | Opcode::StoreDeref => OperandKind::Free,
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop => OperandKind::AbsoluteJump,
            Opcode::JumpForward | Opcode::ForIter => OperandKind::RelativeJump,
            Opcode::BuildTuple | Opcode::CallFunction | Opcode::ExtendedArg => OperandKind::Count,
            Opcode::CompareOp => OperandKind::Compare,
            _ => OperandKind::None,
        }
    }

    /// Returns true for jumps whose operand is an absolute offset
    pub fn is_absolute_jump(self) -> bool {
        self.operand_kind() == OperandKind::AbsoluteJump
    }

    /// Returns true for jumps whose operand is a forward displacement
    pub fn is_relative_jump(self) -> bool {
        self.operand_kind() == OperandKind::RelativeJump
    }

    /// Returns true for any jump
    pub fn is_jump(self) -> bool {
        self.is_absolute_jump() || self.is_relative_jump()
    }

    /// Returns true for the pure `LOAD_*` family
    pub fn is_load(self) -> bool {
        matches!(
            self,
            Opcode::LoadConst | Opcode::LoadGlobal | Opcode::LoadFast | Opcode::LoadDeref
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Opcode::PopTop),
            0x02 => Ok(Opcode::RotTwo),
            0x04 => Ok(Opcode::DupTop),
            0x09 => Ok(Opcode::Nop),
            0x0B => Ok(Opcode::UnaryNegative),
            0x0C => Ok(Opcode::UnaryNot),
            0x13 => Ok(Opcode::BinaryPower),
            0x14 => Ok(Opcode::BinaryMultiply),
            0x16 => Ok(Opcode::BinaryModulo),
            0x17 => Ok(Opcode::BinaryAdd),
            0x18 => Ok(Opcode::BinarySubtract),
            0x1A => Ok(Opcode::BinaryFloorDivide),
            0x1B => Ok(Opcode::BinaryTrueDivide),
            0x44 => Ok(Opcode::GetIter),
            0x53 => Ok(Opcode::ReturnValue),
            0x5D => Ok(Opcode::ForIter),
            0x61 => Ok(Opcode::StoreGlobal),
            0x64 => Ok(Opcode::LoadConst),
            0x66 => Ok(Opcode::BuildTuple),
            0x6B => Ok(Opcode::CompareOp),
            0x6E => Ok(Opcode::JumpForward),
            0x6F => Ok(Opcode::JumpIfFalseOrPop),
            0x70 => Ok(Opcode::JumpIfTrueOrPop),
            0x71 => Ok(Opcode::JumpAbsolute),
            0x72 => Ok(Opcode::PopJumpIfFalse),
            0x73 => Ok(Opcode::PopJumpIfTrue),
            0x74 => Ok(Opcode::LoadGlobal),
            0x7C => Ok(Opcode::LoadFast),
            0x7D => Ok(Opcode::StoreFast),
            0x7E => Ok(Opcode::DeleteFast),
            0x83 => Ok(Opcode::CallFunction),
            0x88 => Ok(Opcode::LoadDeref),
            0x89 => Ok(Opcode::StoreDeref),
            0x90 => Ok(Opcode::ExtendedArg),
            other => Err(other),
        }
    }
}
