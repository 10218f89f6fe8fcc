//! Pipeline runner
//!
//! Applies an ordered list of passes to a routine, threading the resolution
//! context through each. The caller gets back either the output of the last
//! pass or the first failure, tagged with the pass that raised it; nothing
//! produced before a failure escapes.

use crate::bytecode::disassemble;
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::{PipelineError, RewriteError, RewriteResult};
use crate::passes::{
    pass_by_name, FoldConstantsPass, InlinePass, Pass, PrecomputeConditionalsPass,
    PromoteGlobalsPass, RewriteStats, VerifyPass,
};
use tracing::{debug, debug_span};

/// Ordered list of rewrite passes
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    /// Create an empty pipeline (returns its input unchanged)
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Create a pipeline with the standard passes
    ///
    /// Passes run in order: inline → fold-constants → precompute-conditionals
    /// → promote-globals → verify
    pub fn with_default_passes() -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(Box::new(InlinePass));
        pipeline.add_pass(Box::new(FoldConstantsPass));
        pipeline.add_pass(Box::new(PrecomputeConditionalsPass));
        pipeline.add_pass(Box::new(PromoteGlobalsPass));
        pipeline.add_pass(Box::new(VerifyPass));
        pipeline
    }

    /// Create a pipeline from registered pass names
    pub fn from_names<I, S>(names: I) -> RewriteResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pipeline = Self::new();
        for name in names {
            let name = name.as_ref();
            let pass = pass_by_name(name).ok_or_else(|| RewriteError::UnknownPass(name.to_string()))?;
            pipeline.add_pass(pass);
        }
        Ok(pipeline)
    }

    /// Append a pass
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Returns the number of registered passes
    pub fn passes_count(&self) -> usize {
        self.passes.len()
    }

    /// Names of the registered passes, in run order
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Rewrite `code`, returning the result
    pub fn run(&self, code: CodeObject, ctx: &Context) -> Result<CodeObject, PipelineError> {
        self.run_with_stats(code, ctx).map(|(code, _)| code)
    }

    /// Rewrite `code` and return statistics for the whole run
    pub fn run_with_stats(
        &self,
        code: CodeObject,
        ctx: &Context,
    ) -> Result<(CodeObject, RewriteStats), PipelineError> {
        let span = debug_span!("rewrite", routine = %code.qualified_name);
        let _guard = span.enter();

        let mut total = RewriteStats::new();
        total.bytes_before = code.instructions.len();
        let mut current = code;

        for pass in &self.passes {
            let (next, stats) = pass.apply(current, ctx).map_err(|source| PipelineError {
                pass: pass.name().to_string(),
                source,
            })?;
            debug!(
                pass = pass.name(),
                rewrites = stats.total_rewrites(),
                bytes = next.instructions.len(),
                "pass finished"
            );
            if ctx.is_debug() {
                debug!(pass = pass.name(), "\n{}", disassemble(&next));
            }
            total.merge(&stats);
            current = next;
        }

        total.bytes_after = current.instructions.len();
        Ok((current, total))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
