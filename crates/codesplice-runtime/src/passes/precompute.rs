//! Conditional precomputation
//!
//! A `POP_JUMP_IF_FALSE` / `POP_JUMP_IF_TRUE` fed directly by a load of a
//! statically-known value always goes the same way. The load and the branch
//! are removed, and when the branch is taken so is everything between the
//! branch and its target. Only forward branches are rewritten, and only
//! when no other jump lands on the branch itself: such a jump arrives with a
//! value of its own for the branch to test.

use super::{Pass, RewriteStats};
use crate::bytecode::{Instruction, Opcode};
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteResult;
use crate::tracker::{Emitted, OffsetTracker, Site};
use crate::value::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Removes conditional branches whose outcome is known before run time
pub struct PrecomputeConditionalsPass;

impl PrecomputeConditionalsPass {
    pub const NAME: &'static str = "precompute-conditionals";
}

/// Value pushed by `instruction`, if it is known without running anything
fn known_value<'a>(
    instruction: &Instruction,
    code: &'a CodeObject,
    ctx: &'a Context,
) -> Option<&'a Value> {
    match instruction.opcode {
        Opcode::LoadConst => code.constants.get(instruction.operand as usize),
        Opcode::LoadGlobal => code
            .names
            .get(instruction.operand as usize)
            .and_then(|name| ctx.constant(name)),
        _ => None,
    }
}

impl Pass for PrecomputeConditionalsPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        let instructions = code.decode()?;
        let targets: HashSet<usize> = instructions.iter().filter_map(|i| i.jump_target()).collect();
        let mut tracker = OffsetTracker::new();
        let mut stream: Vec<Emitted> = Vec::with_capacity(instructions.len());
        let mut count = 0;
        let mut index = 0;

        while index < instructions.len() {
            let branch = instructions[index];
            let conditional = matches!(branch.opcode, Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue);

            if conditional && index > 0 {
                let producer = instructions[index - 1];
                let target = branch.operand as usize;
                let adjacent = stream.last().map(|e| e.site) == Some(Site::original(producer.offset))
                    && !targets.contains(&branch.offset);

                if let (true, true, Some(value)) = (
                    adjacent,
                    target > branch.offset,
                    known_value(&producer, &code, ctx),
                ) {
                    let truthy = value.is_truthy();
                    let taken = match branch.opcode {
                        Opcode::PopJumpIfTrue => truthy,
                        _ => !truthy,
                    };
                    stream.pop();
                    count += 1;
                    trace!(offset = branch.offset, taken, "eliminate branch");

                    if taken {
                        tracker.strip(producer.offset, target)?;
                        index = instructions.partition_point(|i| i.offset < target);
                    } else {
                        tracker.strip(producer.offset, branch.end())?;
                        index += 1;
                    }
                    continue;
                }
            }

            stream.push(Emitted::from_instruction(&branch));
            index += 1;
        }

        if count == 0 {
            let stats = RewriteStats::sized(&code, &code);
            return Ok((code, stats));
        }

        let bytes = tracker.fix_jumps(&stream)?;
        let bytes_before = code.instructions.len();
        let rewritten = code.with_instructions(bytes);

        debug!(routine = %rewritten.qualified_name, eliminated = count, "precomputed conditionals");
        let stats = RewriteStats {
            branches_eliminated: count,
            bytes_before,
            bytes_after: rewritten.instructions.len(),
            passes_run: 1,
            ..Default::default()
        };
        Ok((rewritten, stats))
    }
}
