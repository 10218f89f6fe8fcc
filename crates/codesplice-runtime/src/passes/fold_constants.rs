//! Global-constant folding
//!
//! `LOAD_GLOBAL name` becomes `LOAD_CONST k` when `name` is bound to a
//! constant in the context. The value is added to the constant table at most
//! once per run, and reuses an equal entry when the table already has one.

use super::{intern_value, Pass, RewriteStats};
use crate::bytecode::Opcode;
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteResult;
use crate::tracker::{Emitted, OffsetTracker};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Replaces loads of constant globals with constant loads
pub struct FoldConstantsPass;

impl FoldConstantsPass {
    pub const NAME: &'static str = "fold-constants";
}

impl Pass for FoldConstantsPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        let instructions = code.decode()?;
        let mut constants = code.constants.clone();
        // name index -> constant index
        let mut folded: HashMap<u32, u32> = HashMap::new();
        let mut stream = Vec::with_capacity(instructions.len());
        let mut count = 0;

        for instruction in &instructions {
            let mut emitted = Emitted::from_instruction(instruction);
            if instruction.opcode == Opcode::LoadGlobal {
                let value = code
                    .names
                    .get(instruction.operand as usize)
                    .and_then(|name| ctx.constant(name));
                if let Some(value) = value {
                    trace!(offset = instruction.offset, value = %value.repr(), "fold global");
                    let index = *folded
                        .entry(instruction.operand)
                        .or_insert_with(|| intern_value(&mut constants, value));
                    emitted = emitted.rewritten(Opcode::LoadConst, index);
                    count += 1;
                }
            }
            stream.push(emitted);
        }

        if count == 0 {
            let stats = RewriteStats::sized(&code, &code);
            return Ok((code, stats));
        }

        let bytes = OffsetTracker::new().fix_jumps(&stream)?;
        let bytes_before = code.instructions.len();
        let rewritten = CodeObject { constants, ..code }.with_instructions(bytes);

        debug!(routine = %rewritten.qualified_name, folded = count, "folded constant globals");
        let stats = RewriteStats {
            globals_folded: count,
            bytes_before,
            bytes_after: rewritten.instructions.len(),
            passes_run: 1,
            ..Default::default()
        };
        Ok((rewritten, stats))
    }
}
