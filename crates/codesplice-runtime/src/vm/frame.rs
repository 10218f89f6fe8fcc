//! Activation record of one routine call

use crate::code::CodeObject;
use crate::value::{RuntimeError, Value};
use std::vec::IntoIter;

/// One evaluation-stack entry
///
/// Iterators only ever sit on the stack between `GET_ITER` and the
/// `FOR_ITER` that exhausts them.
#[derive(Debug, Clone)]
pub enum Slot {
    Value(Value),
    Iter(IntoIter<Value>),
}

/// Locals, captured cells and evaluation stack of a running routine
#[derive(Debug)]
pub struct Frame {
    /// Routine name (for error messages)
    pub name: String,
    /// Local slots; `None` until first assigned
    pub locals: Vec<Option<Value>>,
    /// Captured-variable slots (`cell_vars` then `free_vars`)
    pub cells: Vec<Option<Value>>,
    /// Evaluation stack
    pub stack: Vec<Slot>,
}

impl Frame {
    /// Frame for `code`, with `args` bound to the leading locals
    pub fn new(code: &CodeObject, args: Vec<Value>) -> Result<Self, RuntimeError> {
        if args.len() != code.arg_count as usize {
            return Err(RuntimeError::ArgumentCount {
                function: code.qualified_name.clone(),
                expected: code.arg_count as usize,
                given: args.len(),
            });
        }

        let slots = (code.local_count as usize).max(code.local_names.len());
        let mut locals: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        locals.resize(slots.max(locals.len()), None);

        Ok(Self {
            name: code.qualified_name.clone(),
            locals,
            cells: vec![None; code.captured_count()],
            stack: Vec::with_capacity(code.stack_size as usize),
        })
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(Slot::Value(value));
    }

    /// Pop a value; `offset` is the executing instruction, for errors
    pub fn pop(&mut self, offset: usize) -> Result<Value, RuntimeError> {
        match self.stack.pop() {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Iter(_)) => Err(RuntimeError::TypeError(
                "iterator used as a value".to_string(),
            )),
            None => Err(RuntimeError::StackUnderflow(offset)),
        }
    }

    /// Pop `count` values, returned in push order
    pub fn pop_many(&mut self, count: usize, offset: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.pop(offset)?);
        }
        values.reverse();
        Ok(values)
    }

    pub fn peek(&self, offset: usize) -> Result<&Value, RuntimeError> {
        match self.stack.last() {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Iter(_)) => Err(RuntimeError::TypeError(
                "iterator used as a value".to_string(),
            )),
            None => Err(RuntimeError::StackUnderflow(offset)),
        }
    }
}
