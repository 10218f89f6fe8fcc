//! Global-to-local promotion
//!
//! `LOAD_GLOBAL name` becomes `LOAD_FAST i` when `name` is already declared
//! as local `i`. This is what lets a spliced body read a local it shares
//! with its caller. No local is ever created here.

use super::{Pass, RewriteStats};
use crate::bytecode::Opcode;
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteResult;
use crate::tracker::{Emitted, OffsetTracker};
use tracing::{debug, trace};

/// Retargets global loads of declared locals to the local slot
pub struct PromoteGlobalsPass;

impl PromoteGlobalsPass {
    pub const NAME: &'static str = "promote-globals";
}

impl Pass for PromoteGlobalsPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, _ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        let instructions = code.decode()?;
        let mut stream = Vec::with_capacity(instructions.len());
        let mut count = 0;

        for instruction in &instructions {
            let mut emitted = Emitted::from_instruction(instruction);
            if instruction.opcode == Opcode::LoadGlobal {
                let slot = code.names.get(instruction.operand as usize).and_then(|name| {
                    code.local_names.iter().position(|local| local == name)
                });
                if let Some(slot) = slot {
                    trace!(offset = instruction.offset, slot, "promote global");
                    emitted = emitted.rewritten(Opcode::LoadFast, slot as u32);
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
        let rewritten = code.with_instructions(bytes);

        debug!(routine = %rewritten.qualified_name, promoted = count, "promoted globals to locals");
        let stats = RewriteStats {
            globals_promoted: count,
            bytes_before,
            bytes_after: rewritten.instructions.len(),
            passes_run: 1,
            ..Default::default()
        };
        Ok((rewritten, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{decode_all, CodeBuilder};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_global_naming_a_local_is_promoted() {
        let mut builder = CodeBuilder::new("f");
        builder.param("a");
        builder.local("r");
        builder.load_global("r").emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();

        let (out, stats) = PromoteGlobalsPass.apply(code, &Context::default()).unwrap();
        let decoded = decode_all(&out.instructions).unwrap();
        assert_eq!((decoded[0].opcode, decoded[0].operand), (Opcode::LoadFast, 1));
        assert_eq!(stats.globals_promoted, 1);
        assert_eq!(out.local_count, 2);
        assert_eq!(out.names, vec!["r".to_string()]);
    }

    #[test]
    fn test_other_globals_are_untouched() {
        let mut builder = CodeBuilder::new("f");
        builder.param("a");
        builder.load_global("b").emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();
        let (out, stats) = PromoteGlobalsPass.apply(code.clone(), &Context::default()).unwrap();
        assert_eq!(out, code);
        assert_eq!(stats.total_rewrites(), 0);
    }

    #[test]
    fn test_stores_are_not_promoted() {
        let mut builder = CodeBuilder::new("f");
        builder.local("x");
        let name = builder.name("x");
        builder.load_const(Value::Int(1));
        builder.emit(Opcode::StoreGlobal, name);
        builder.load_const(Value::None).emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();
        let (out, _) = PromoteGlobalsPass.apply(code.clone(), &Context::default()).unwrap();
        assert_eq!(out, code);
    }
}
