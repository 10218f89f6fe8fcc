//! Reference virtual machine
//!
//! Executes a code object against a global namespace so a rewritten routine
//! can be compared with the original (or a hand-written equivalent) by what
//! it returns and what it prints.
//! - Each call gets a fresh [`Frame`]; calls recurse on the host stack
//! - `print` output is captured as lines, never written to stdout
//! - Integer arithmetic is checked

mod frame;
mod ops;

pub use frame::{Frame, Slot};

use crate::bytecode::{CompareOp, Instruction, Opcode};
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteError;
use crate::value::{Builtin, RuntimeError, Value};
use std::collections::HashMap;
use tracing::trace;

/// Deepest call nesting before [`RuntimeError::RecursionLimit`]
pub const MAX_CALL_DEPTH: usize = 200;

/// Virtual machine state
#[derive(Debug, Default)]
pub struct Vm {
    /// Global variables
    globals: HashMap<String, Value>,
    /// Lines written by `print`
    output: Vec<String>,
    /// Current call nesting
    depth: usize,
}

impl Vm {
    /// Create a VM with an empty namespace (builtins are always visible)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a VM whose globals are the context's namespace
    pub fn from_context(ctx: &Context) -> Self {
        Self {
            globals: ctx.namespace().clone(),
            ..Self::default()
        }
    }

    /// Bind a global
    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Current value of a global
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Lines printed so far
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Take the printed lines, leaving the buffer empty
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Call `code` with positional `args` and return its result
    pub fn call(&mut self, code: &CodeObject, args: Vec<Value>) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::RecursionLimit);
        }
        let frame = Frame::new(code, args)?;
        trace!(routine = %code.qualified_name, depth = self.depth, "call");

        self.depth += 1;
        let result = self.execute(code, frame);
        self.depth -= 1;
        result
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Builtin(builtin) => ops::call_builtin(builtin, args, &mut self.output),
            Value::Function(code) => self.call(&code, args),
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn load_global(&self, name: &str) -> Result<Value, RuntimeError> {
        self.globals
            .get(name)
            .cloned()
            .or_else(|| Builtin::from_name(name).map(Value::Builtin))
            .ok_or_else(|| RuntimeError::UndefinedName(name.to_string()))
    }

    fn execute(&mut self, code: &CodeObject, mut frame: Frame) -> Result<Value, RuntimeError> {
        let instructions = code.decode()?;
        let index_of = |offset: usize| instructions.partition_point(|i| i.offset < offset);
        let mut pc = 0;

        while let Some(instruction) = instructions.get(pc) {
            let offset = instruction.offset;
            let operand = instruction.operand as usize;
            pc += 1;

            match instruction.opcode {
                // ===== Stack =====
                Opcode::PopTop => {
                    frame.stack.pop().ok_or(RuntimeError::StackUnderflow(offset))?;
                }
                Opcode::RotTwo => {
                    let len = frame.stack.len();
                    if len < 2 {
                        return Err(RuntimeError::StackUnderflow(offset));
                    }
                    frame.stack.swap(len - 1, len - 2);
                }
                Opcode::DupTop => {
                    let top = frame.peek(offset)?.clone();
                    frame.push(top);
                }
                Opcode::Nop | Opcode::ExtendedArg => {}

                // ===== Arithmetic =====
                Opcode::UnaryNegative => {
                    let value = frame.pop(offset)?;
                    frame.push(ops::negate(value)?);
                }
                Opcode::UnaryNot => {
                    let value = frame.pop(offset)?;
                    frame.push(Value::Bool(!value.is_truthy()));
                }
                Opcode::BinaryPower
                | Opcode::BinaryMultiply
                | Opcode::BinaryModulo
                | Opcode::BinaryAdd
                | Opcode::BinarySubtract
                | Opcode::BinaryFloorDivide
                | Opcode::BinaryTrueDivide => {
                    let b = frame.pop(offset)?;
                    let a = frame.pop(offset)?;
                    frame.push(ops::binary(instruction.opcode, a, b)?);
                }
                Opcode::CompareOp => {
                    let op = CompareOp::try_from(instruction.operand).map_err(|_| {
                        RewriteError::MalformedCode(format!(
                            "invalid comparison {} at offset {}",
                            operand, offset
                        ))
                    })?;
                    let b = frame.pop(offset)?;
                    let a = frame.pop(offset)?;
                    frame.push(ops::compare(op, &a, &b)?);
                }

                // ===== Iteration / return =====
                Opcode::GetIter => {
                    let value = frame.pop(offset)?;
                    frame.stack.push(Slot::Iter(ops::iterate(value)?.into_iter()));
                }
                Opcode::ForIter => {
                    let next = match frame.stack.last_mut() {
                        Some(Slot::Iter(items)) => items.next(),
                        Some(Slot::Value(value)) => {
                            return Err(RuntimeError::TypeError(format!(
                                "'{}' object is not an iterator",
                                value.type_name()
                            )))
                        }
                        None => return Err(RuntimeError::StackUnderflow(offset)),
                    };
                    match next {
                        Some(value) => frame.push(value),
                        None => {
                            frame.stack.pop();
                            pc = index_of(jump_target(instruction));
                        }
                    }
                }
                Opcode::ReturnValue => return frame.pop(offset),

                // ===== Tables =====
                Opcode::LoadConst => {
                    let value = code
                        .constants
                        .get(operand)
                        .ok_or_else(|| out_of_bounds(instruction, code.constants.len()))?;
                    frame.push(value.clone());
                }
                Opcode::LoadGlobal => {
                    let name = name_at(code, instruction)?;
                    frame.push(self.load_global(name)?);
                }
                Opcode::StoreGlobal => {
                    let name = name_at(code, instruction)?.to_string();
                    let value = frame.pop(offset)?;
                    self.globals.insert(name, value);
                }
                Opcode::LoadFast => {
                    let slot = frame
                        .locals
                        .get(operand)
                        .ok_or_else(|| out_of_bounds(instruction, code.local_names.len()))?;
                    let value = slot.clone().ok_or_else(|| unbound(code.local_names.get(operand)))?;
                    frame.push(value);
                }
                Opcode::StoreFast => {
                    let value = frame.pop(offset)?;
                    let len = frame.locals.len();
                    let slot = frame
                        .locals
                        .get_mut(operand)
                        .ok_or_else(|| out_of_bounds(instruction, len))?;
                    *slot = Some(value);
                }
                Opcode::DeleteFast => {
                    let len = frame.locals.len();
                    let slot = frame
                        .locals
                        .get_mut(operand)
                        .ok_or_else(|| out_of_bounds(instruction, len))?;
                    if slot.take().is_none() {
                        return Err(unbound(code.local_names.get(operand)));
                    }
                }
                Opcode::LoadDeref => {
                    let slot = frame
                        .cells
                        .get(operand)
                        .ok_or_else(|| out_of_bounds(instruction, code.captured_count()))?;
                    let value = slot
                        .clone()
                        .ok_or_else(|| unbound(code.captured_name(operand)))?;
                    frame.push(value);
                }
                Opcode::StoreDeref => {
                    let value = frame.pop(offset)?;
                    let len = frame.cells.len();
                    let slot = frame
                        .cells
                        .get_mut(operand)
                        .ok_or_else(|| out_of_bounds(instruction, len))?;
                    *slot = Some(value);
                }
                Opcode::BuildTuple => {
                    let items = frame.pop_many(operand, offset)?;
                    frame.push(Value::Tuple(items));
                }
                Opcode::CallFunction => {
                    let args = frame.pop_many(operand, offset)?;
                    let callee = frame.pop(offset)?;
                    let result = self.call_value(callee, args)?;
                    frame.push(result);
                }

                // ===== Jumps =====
                Opcode::JumpForward | Opcode::JumpAbsolute => {
                    pc = index_of(jump_target(instruction));
                }
                Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                    let condition = frame.pop(offset)?.is_truthy();
                    if condition == (instruction.opcode == Opcode::PopJumpIfTrue) {
                        pc = index_of(jump_target(instruction));
                    }
                }
                Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                    let condition = frame.peek(offset)?.is_truthy();
                    if condition == (instruction.opcode == Opcode::JumpIfTrueOrPop) {
                        pc = index_of(jump_target(instruction));
                    } else {
                        frame.pop(offset)?;
                    }
                }
            }
        }

        Err(RuntimeError::MissingReturn)
    }
}

fn jump_target(instruction: &Instruction) -> usize {
    instruction.jump_target().unwrap_or_else(|| instruction.end())
}

fn name_at<'a>(code: &'a CodeObject, instruction: &Instruction) -> Result<&'a str, RuntimeError> {
    code.names
        .get(instruction.operand as usize)
        .map(String::as_str)
        .ok_or_else(|| out_of_bounds(instruction, code.names.len()))
}

fn out_of_bounds(instruction: &Instruction, len: usize) -> RuntimeError {
    RuntimeError::Decode(RewriteError::IndexOutOfBounds {
        mnemonic: instruction.opcode.mnemonic(),
        index: instruction.operand as usize,
        len,
        offset: instruction.offset,
    })
}

fn unbound<S: AsRef<str>>(name: Option<S>) -> RuntimeError {
    let name = name.map_or_else(|| "?".to_string(), |n| n.as_ref().to_string());
    RuntimeError::UnboundLocal(name)
}
