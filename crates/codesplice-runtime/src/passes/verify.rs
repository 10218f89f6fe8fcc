//! Integrity verification
//!
//! Read-only checks run after the rewriting passes: every table index is in
//! bounds, every jump lands on an instruction, and every global the routine
//! loads exists in the namespace or is a builtin. Violations are reported,
//! never repaired.

use super::{Pass, RewriteStats};
use crate::bytecode::{CompareOp, Instruction, OperandKind, Opcode};
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::{RewriteError, RewriteResult};
use std::collections::HashSet;

/// Check every table reference and jump of `code`
///
/// Returns all violations in instruction order (empty when the routine is
/// well formed). Name resolution is not checked here; see [`verify`].
pub fn verify_bounds(code: &CodeObject) -> Vec<RewriteError> {
    let mut errors = Vec::new();

    if code.local_names.len() != code.local_count as usize {
        errors.push(RewriteError::MalformedCode(format!(
            "{} local names for {} local slots",
            code.local_names.len(),
            code.local_count
        )));
    }

    let instructions = match code.decode() {
        Ok(instructions) => instructions,
        Err(err) => {
            errors.push(err);
            return errors;
        }
    };
    let starts: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();

    for instruction in &instructions {
        if let Some(err) = check_instruction(code, instruction, &starts) {
            errors.push(err);
        }
    }
    errors
}

fn check_instruction(
    code: &CodeObject,
    instruction: &Instruction,
    starts: &HashSet<usize>,
) -> Option<RewriteError> {
    let index = instruction.operand as usize;
    let len = match instruction.opcode.operand_kind() {
        OperandKind::Const => code.constants.len(),
        OperandKind::Name => code.names.len(),
        OperandKind::Local => code.local_count as usize,
        OperandKind::Free => code.captured_count(),
        OperandKind::AbsoluteJump | OperandKind::RelativeJump => {
            let target = instruction.jump_target()?;
            if starts.contains(&target) {
                return None;
            }
            return Some(RewriteError::MalformedCode(format!(
                "{} at offset {} targets {}, which is not an instruction start",
                instruction.opcode, instruction.offset, target
            )));
        }
        OperandKind::Compare => {
            if CompareOp::try_from(instruction.operand).is_ok() {
                return None;
            }
            return Some(RewriteError::MalformedCode(format!(
                "unknown comparison {} at offset {}",
                instruction.operand, instruction.offset
            )));
        }
        OperandKind::None | OperandKind::Count => return None,
    };

    (index >= len).then(|| RewriteError::IndexOutOfBounds {
        mnemonic: instruction.opcode.mnemonic(),
        index,
        len,
        offset: instruction.offset,
    })
}

/// Full integrity check of `code` against `ctx`
///
/// Everything [`verify_bounds`] checks, plus: each `LOAD_GLOBAL` names a
/// binding of the context's namespace or a builtin.
pub fn verify(code: &CodeObject, ctx: &Context) -> Vec<RewriteError> {
    let mut errors = verify_bounds(code);
    let Ok(instructions) = code.decode() else {
        return errors;
    };

    for instruction in instructions.iter().filter(|i| i.opcode == Opcode::LoadGlobal) {
        let Some(name) = code.names.get(instruction.operand as usize) else {
            continue;
        };
        if !ctx.resolves(name) {
            errors.push(RewriteError::UnresolvedName {
                mnemonic: instruction.opcode.mnemonic(),
                name: name.clone(),
                offset: instruction.offset,
            });
        }
    }
    errors
}

/// Fails on the first integrity violation; otherwise returns its input
pub struct VerifyPass;

impl VerifyPass {
    pub const NAME: &'static str = "verify";
}

impl Pass for VerifyPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        if let Some(err) = verify(&code, ctx).into_iter().next() {
            return Err(err);
        }
        let stats = RewriteStats::sized(&code, &code);
        Ok((code, stats))
    }
}
