//! Programmatic construction of code objects
//!
//! Used by tests, benchmarks and hosts that assemble routines by hand. Jumps
//! are written against [`Label`]s; `build` lays the stream out, sizing each
//! jump for its final operand.

use super::codec::{encoded_size, pack_into, UNIT};
use super::Opcode;
use crate::code::CodeObject;
use crate::error::{RewriteError, RewriteResult};
use crate::passes::{intern_name, intern_value};
use crate::tracker::MAX_FIXUP_ROUNDS;
use crate::value::Value;

/// Jump destination inside a [`CodeBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Op {
    Plain(Opcode, u32),
    Jump(Opcode, Label),
}

/// Incremental code object builder
///
/// Tables are deduplicated: adding a constant, name or local that is already
/// present returns its existing index.
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    qualified_name: String,
    filename: String,
    first_line: u32,
    arg_count: u32,
    stack_size: Option<u32>,
    ops: Vec<Op>,
    labels: Vec<Option<usize>>,
    constants: Vec<Value>,
    names: Vec<String>,
    local_names: Vec<String>,
    free_vars: Vec<String>,
    cell_vars: Vec<String>,
}

impl CodeBuilder {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            filename: "<builder>".to_string(),
            first_line: 1,
            arg_count: 0,
            stack_size: None,
            ops: Vec::new(),
            labels: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            local_names: Vec::new(),
            free_vars: Vec::new(),
            cell_vars: Vec::new(),
        }
    }

    pub fn filename(&mut self, filename: impl Into<String>) -> &mut Self {
        self.filename = filename.into();
        self
    }

    /// Override the computed stack size
    pub fn stack_size(&mut self, size: u32) -> &mut Self {
        self.stack_size = Some(size);
        self
    }

    /// Declare a positional parameter
    ///
    /// Parameters must be declared before any other local.
    pub fn param(&mut self, name: &str) -> &mut Self {
        self.local(name);
        self.arg_count += 1;
        self
    }

    /// Index of local `name`, declaring it if needed
    pub fn local(&mut self, name: &str) -> u32 {
        intern_name(&mut self.local_names, name)
    }

    /// Index of global name `name`, adding it if needed
    pub fn name(&mut self, name: &str) -> u32 {
        intern_name(&mut self.names, name)
    }

    /// Index of `value` in the constant table, adding it if needed
    pub fn constant(&mut self, value: Value) -> u32 {
        intern_value(&mut self.constants, &value)
    }

    /// Index of captured variable `name` (cells before free variables)
    pub fn free_var(&mut self, name: &str) -> u32 {
        if let Some(index) = self.cell_vars.iter().position(|c| c == name) {
            return index as u32;
        }
        self.cell_vars.len() as u32 + intern_name(&mut self.free_vars, name)
    }

    pub fn emit(&mut self, opcode: Opcode, operand: u32) -> &mut Self {
        self.ops.push(Op::Plain(opcode, operand));
        self
    }

    pub fn load_const(&mut self, value: Value) -> &mut Self {
        let index = self.constant(value);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::StoreFast, index)
    }

    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.emit(Opcode::CallFunction, argc)
    }

    /// Create an unbound label
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction emitted
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.ops.len());
        self
    }

    /// Emit a jump to `label`
    pub fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.ops.push(Op::Jump(opcode, label));
        self
    }

    /// Lay out and encode the routine
    pub fn build(&self) -> RewriteResult<CodeObject> {
        let operands = self.layout()?;

        let mut instructions = Vec::with_capacity(self.ops.len() * UNIT);
        for (op, operand) in self.ops.iter().zip(&operands) {
            let opcode = match op {
                Op::Plain(opcode, _) | Op::Jump(opcode, _) => *opcode,
            };
            pack_into(&mut instructions, opcode, *operand as i64)?;
        }

        Ok(CodeObject {
            arg_count: self.arg_count,
            kwonly_arg_count: 0,
            local_count: self.local_names.len() as u32,
            stack_size: self.stack_size.unwrap_or_else(|| self.estimate_stack()),
            flags: 0,
            instructions,
            constants: self.constants.clone(),
            names: self.names.clone(),
            local_names: self.local_names.clone(),
            free_vars: self.free_vars.clone(),
            cell_vars: self.cell_vars.clone(),
            filename: self.filename.clone(),
            qualified_name: self.qualified_name.clone(),
            first_line: self.first_line,
            line_table: Vec::new(),
        })
    }

    /// Final operand of every op, once jump sizes have settled
    fn layout(&self) -> RewriteResult<Vec<u32>> {
        let mut sizes: Vec<usize> = self
            .ops
            .iter()
            .map(|op| match op {
                Op::Plain(_, operand) => encoded_size(*operand),
                Op::Jump(..) => UNIT,
            })
            .collect();

        for _ in 0..MAX_FIXUP_ROUNDS {
            let mut offsets = Vec::with_capacity(sizes.len() + 1);
            let mut offset = 0;
            for size in &sizes {
                offsets.push(offset);
                offset += size;
            }
            offsets.push(offset);

            let mut operands = Vec::with_capacity(self.ops.len());
            let mut changed = false;
            for (index, op) in self.ops.iter().enumerate() {
                let operand = match op {
                    Op::Plain(_, operand) => *operand as i64,
                    Op::Jump(opcode, label) => {
                        let bound = self.labels[label.0].ok_or(RewriteError::UnboundLabel(label.0))?;
                        let target = offsets[bound] as i64;
                        if opcode.is_relative_jump() {
                            target - offsets[index + 1] as i64
                        } else {
                            target
                        }
                    }
                };
                if !(0..=super::MAX_OPERAND as i64).contains(&operand) {
                    return Err(RewriteError::UnencodableOffset {
                        offset: offsets[index],
                        operand,
                    });
                }
                let size = encoded_size(operand as u32);
                if size != sizes[index] {
                    sizes[index] = size;
                    changed = true;
                }
                operands.push(operand as u32);
            }

            if !changed {
                return Ok(operands);
            }
        }

        Err(RewriteError::FixupDiverged(MAX_FIXUP_ROUNDS))
    }

    /// Deepest stack along the straight-line order of the ops
    fn estimate_stack(&self) -> u32 {
        let mut depth: i64 = 0;
        let mut deepest: i64 = 0;
        for op in &self.ops {
            let (opcode, operand) = match op {
                Op::Plain(opcode, operand) => (*opcode, *operand),
                Op::Jump(opcode, _) => (*opcode, 0),
            };
            depth += stack_effect(opcode, operand);
            deepest = deepest.max(depth);
        }
        deepest.max(1) as u32
    }
}

/// Net stack change of one instruction on its fall-through path
pub(crate) fn stack_effect(opcode: Opcode, operand: u32) -> i64 {
    match opcode {
        Opcode::Nop
        | Opcode::RotTwo
        | Opcode::UnaryNegative
        | Opcode::UnaryNot
        | Opcode::GetIter
        | Opcode::JumpAbsolute
        | Opcode::JumpForward
        | Opcode::DeleteFast
        | Opcode::ExtendedArg => 0,
        Opcode::DupTop
        | Opcode::LoadConst
        | Opcode::LoadGlobal
        | Opcode::LoadFast
        | Opcode::LoadDeref
        | Opcode::ForIter => 1,
        Opcode::PopTop
        | Opcode::BinaryPower
        | Opcode::BinaryMultiply
        | Opcode::BinaryModulo
        | Opcode::BinaryAdd
        | Opcode::BinarySubtract
        | Opcode::BinaryFloorDivide
        | Opcode::BinaryTrueDivide
        | Opcode::CompareOp
        | Opcode::ReturnValue
        | Opcode::StoreGlobal
        | Opcode::StoreFast
        | Opcode::StoreDeref
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpIfTrue
        | Opcode::JumpIfFalseOrPop
        | Opcode::JumpIfTrueOrPop => -1,
        Opcode::BuildTuple => 1 - operand as i64,
        Opcode::CallFunction => -(operand as i64),
    }
}
