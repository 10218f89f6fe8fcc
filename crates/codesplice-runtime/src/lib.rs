//! Codesplice Runtime - bytecode rewriting core
//!
//! This library provides everything needed to rewrite compiled routines:
//! - Instruction codec and disassembler
//! - Offset tracking and jump fixup
//! - Rewrite passes (inlining, constant folding, branch elimination,
//!   global promotion, verification) and the pipeline that runs them
//! - A reference VM for checking that rewrites preserve behaviour

/// Codesplice runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod bytecode;
pub mod code;
pub mod context;
pub mod error;
pub mod passes;
pub mod pipeline;
pub mod tracker;
pub mod value;
pub mod vm;

// Re-export commonly used types
pub use bytecode::{disassemble, CodeBuilder, CompareOp, Instruction, Opcode};
pub use code::{CodeObject, LineEntry};
pub use context::{Context, ContextBuilder};
pub use error::{PipelineError, RewriteError, RewriteResult, Role};
pub use passes::{Pass, RewriteStats};
pub use pipeline::Pipeline;
pub use tracker::{OffsetTracker, Site};
pub use value::{Builtin, RuntimeError, Value};
pub use vm::Vm;
