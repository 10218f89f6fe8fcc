//! Host-supplied peephole optimization
//!
//! The optimizer itself lives outside this crate. The pass hands it the
//! instruction stream and tables, rebuilds the routine from what comes back
//! and re-verifies the result, so a misbehaving optimizer is caught here and
//! not at run time.

use super::{verify, Pass, RewriteStats};
use crate::code::{CodeObject, LineEntry};
use crate::context::Context;
use crate::error::{RewriteError, RewriteResult};
use crate::value::Value;

/// A local-pattern optimizer over encoded instructions
///
/// May append to `constants` and `names`; must not reorder or remove
/// existing entries.
pub trait PeepholeOptimizer: Send + Sync {
    fn optimize(
        &self,
        instructions: &[u8],
        constants: &mut Vec<Value>,
        names: &mut Vec<String>,
        line_table: &[LineEntry],
    ) -> Result<Vec<u8>, String>;
}

impl<F> PeepholeOptimizer for F
where
    F: Fn(&[u8], &mut Vec<Value>, &mut Vec<String>, &[LineEntry]) -> Result<Vec<u8>, String>
        + Send
        + Sync,
{
    fn optimize(
        &self,
        instructions: &[u8],
        constants: &mut Vec<Value>,
        names: &mut Vec<String>,
        line_table: &[LineEntry],
    ) -> Result<Vec<u8>, String> {
        self(instructions, constants, names, line_table)
    }
}

/// Runs a [`PeepholeOptimizer`] and verifies its output
pub struct PeepholePass {
    optimizer: Box<dyn PeepholeOptimizer>,
}

impl PeepholePass {
    pub const NAME: &'static str = "peephole";

    pub fn new(optimizer: impl PeepholeOptimizer + 'static) -> Self {
        Self {
            optimizer: Box::new(optimizer),
        }
    }
}

impl Pass for PeepholePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        let mut constants = code.constants.clone();
        let mut names = code.names.clone();
        let instructions = self
            .optimizer
            .optimize(&code.instructions, &mut constants, &mut names, &code.line_table)
            .map_err(|message| RewriteError::Collaborator {
                collaborator: "peephole optimizer",
                message,
            })?;

        let bytes_before = code.instructions.len();
        let rewritten = CodeObject {
            constants,
            names,
            ..code
        }
        .with_instructions(instructions);

        if let Some(err) = verify(&rewritten, ctx).into_iter().next() {
            return Err(err);
        }

        let stats = RewriteStats {
            bytes_before,
            bytes_after: rewritten.instructions.len(),
            passes_run: 1,
            ..Default::default()
        };
        Ok((rewritten, stats))
    }
}
