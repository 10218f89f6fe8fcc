//! Rewrite passes
//!
//! Each pass takes a code object and the resolution context and returns a
//! new code object:
//! - **Inline** - splice zero-argument calls to inline-table routines
//! - **Fold constants** - turn loads of constant globals into constant loads
//! - **Precompute conditionals** - drop branches whose outcome is known
//! - **Promote globals** - turn global loads of known locals into local loads
//! - **Verify** - bounds- and name-check every table reference
//!
//! plus the debug collaborators (source mapping, disassembly logging) and a
//! wrapper for a host-supplied peephole optimizer.

pub mod disassemble;
pub mod fold_constants;
pub mod inline;
pub mod peephole;
pub mod precompute;
pub mod promote_globals;
pub mod source_map;
pub mod verify;

pub use disassemble::DisassemblePass;
pub use fold_constants::FoldConstantsPass;
pub use inline::InlinePass;
pub use peephole::{PeepholeOptimizer, PeepholePass};
pub use precompute::PrecomputeConditionalsPass;
pub use promote_globals::PromoteGlobalsPass;
pub use source_map::{
    listing_line_table, ListingMapper, MapSourcePass, SourceMap, SourceMapError, SourceMapper,
};
pub use verify::{verify, verify_bounds, VerifyPass};

use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteResult;
use crate::value::Value;

// ============================================================================
// Public API: RewriteStats
// ============================================================================

/// Statistics collected during a rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Global loads replaced by constant loads
    pub globals_folded: usize,
    /// Global loads replaced by local loads
    pub globals_promoted: usize,
    /// Conditional branches removed
    pub branches_eliminated: usize,
    /// Call sites replaced by a spliced body
    pub calls_inlined: usize,
    /// Instruction bytes before the rewrite
    pub bytes_before: usize,
    /// Instruction bytes after the rewrite
    pub bytes_after: usize,
    /// Number of passes executed
    pub passes_run: usize,
}

impl RewriteStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stats of one pass run, sized from its input and output
    pub fn sized(before: &CodeObject, after: &CodeObject) -> Self {
        RewriteStats {
            bytes_before: before.instructions.len(),
            bytes_after: after.instructions.len(),
            passes_run: 1,
            ..Default::default()
        }
    }

    /// Net bytes saved (negative when the routine grew)
    pub fn bytes_saved(&self) -> isize {
        self.bytes_before as isize - self.bytes_after as isize
    }

    /// Total number of rewrites applied
    pub fn total_rewrites(&self) -> usize {
        self.globals_folded + self.globals_promoted + self.branches_eliminated + self.calls_inlined
    }

    /// Add the counts of `other` to this one
    ///
    /// Byte sizes are not summed: the caller sets them for the whole run.
    pub fn merge(&mut self, other: &RewriteStats) {
        self.globals_folded += other.globals_folded;
        self.globals_promoted += other.globals_promoted;
        self.branches_eliminated += other.branches_eliminated;
        self.calls_inlined += other.calls_inlined;
        self.passes_run += other.passes_run;
    }
}

// ============================================================================
// Public API: Pass trait
// ============================================================================

/// A single rewrite pass
///
/// Passes never modify their input in place. A pass that finds nothing to
/// do returns its input unchanged; one that fails returns an error and no
/// code object at all.
pub trait Pass: Send + Sync {
    /// Name used in pass lists and error reports
    fn name(&self) -> &str;

    /// Rewrite `code` under `ctx`
    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)>;
}

/// Every pass name accepted by [`crate::Pipeline::from_names`]
pub const PASS_NAMES: [&str; 7] = [
    InlinePass::NAME,
    FoldConstantsPass::NAME,
    PrecomputeConditionalsPass::NAME,
    PromoteGlobalsPass::NAME,
    VerifyPass::NAME,
    MapSourcePass::NAME,
    DisassemblePass::NAME,
];

/// Build the pass registered under `name`
pub fn pass_by_name(name: &str) -> Option<Box<dyn Pass>> {
    let pass: Box<dyn Pass> = match name {
        InlinePass::NAME => Box::new(InlinePass),
        FoldConstantsPass::NAME => Box::new(FoldConstantsPass),
        PrecomputeConditionalsPass::NAME => Box::new(PrecomputeConditionalsPass),
        PromoteGlobalsPass::NAME => Box::new(PromoteGlobalsPass),
        VerifyPass::NAME => Box::new(VerifyPass),
        MapSourcePass::NAME => Box::new(MapSourcePass::default()),
        DisassemblePass::NAME => Box::new(DisassemblePass),
        _ => return None,
    };
    Some(pass)
}

// ============================================================================
// Table helpers
// ============================================================================

/// Index of `value` in `table`, appending it if absent
pub(crate) fn intern_value(table: &mut Vec<Value>, value: &Value) -> u32 {
    match table.iter().position(|entry| entry == value) {
        Some(index) => index as u32,
        None => {
            table.push(value.clone());
            (table.len() - 1) as u32
        }
    }
}

/// Index of `name` in `table`, appending it if absent
pub(crate) fn intern_name(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|entry| entry == name) {
        Some(index) => index as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}
