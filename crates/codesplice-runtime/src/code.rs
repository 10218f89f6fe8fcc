//! Code objects
//!
//! The compiled form of one routine. Passes never mutate a code object they
//! were handed; they build a new one (usually with struct-update syntax) and
//! return it.

use crate::bytecode::{decode_all, Instruction};
use crate::error::RewriteResult;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Maps an instruction offset to the source line it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    /// Offset of the first instruction belonging to `line`
    pub offset: u32,
    /// Line number (1-based)
    pub line: u32,
}

/// Compiled routine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    /// Number of positional parameters (the first locals)
    pub arg_count: u32,
    /// Number of keyword-only parameters
    #[serde(default)]
    pub kwonly_arg_count: u32,
    /// Number of local slots; equals `local_names.len()` when well formed
    pub local_count: u32,
    /// Maximum evaluation stack depth
    pub stack_size: u32,
    /// Interpreter flags, passed through untouched
    #[serde(default)]
    pub flags: u32,
    /// Encoded instruction stream
    pub instructions: Vec<u8>,
    /// Constant table
    pub constants: Vec<Value>,
    /// Global / attribute names
    pub names: Vec<String>,
    /// Local variable names (parameters first)
    pub local_names: Vec<String>,
    /// Variables captured from an enclosing routine
    #[serde(default)]
    pub free_vars: Vec<String>,
    /// Locals captured by nested routines
    #[serde(default)]
    pub cell_vars: Vec<String>,
    /// Source file, or a listing produced by a source mapper
    #[serde(default)]
    pub filename: String,
    /// Routine name
    pub qualified_name: String,
    /// First source line
    #[serde(default)]
    pub first_line: u32,
    /// Offset-to-line mapping
    #[serde(default)]
    pub line_table: Vec<LineEntry>,
}

impl CodeObject {
    /// Decode the instruction stream
    pub fn decode(&self) -> RewriteResult<Vec<Instruction>> {
        decode_all(&self.instructions)
    }

    /// Copy of `self` with a new instruction stream
    ///
    /// The line table no longer describes the new offsets, so it is dropped.
    /// Returns `self` as-is when the stream did not change.
    pub fn with_instructions(self, instructions: Vec<u8>) -> Self {
        if instructions == self.instructions {
            return self;
        }
        CodeObject {
            instructions,
            line_table: Vec::new(),
            ..self
        }
    }

    /// Number of captured-variable slots (`cell_vars` then `free_vars`)
    pub fn captured_count(&self) -> usize {
        self.cell_vars.len() + self.free_vars.len()
    }

    /// Name of captured slot `index`
    pub fn captured_name(&self, index: usize) -> Option<&str> {
        self.cell_vars
            .iter()
            .chain(self.free_vars.iter())
            .nth(index)
            .map(String::as_str)
    }

    /// Source line for the instruction at `offset`, if the line table covers it
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        self.line_table
            .iter()
            .take_while(|entry| entry.offset as usize <= offset)
            .last()
            .map(|entry| entry.line)
    }
}
