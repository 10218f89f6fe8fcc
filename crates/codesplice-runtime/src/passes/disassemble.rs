//! Debug listing
//!
//! Logs the disassembly of the routine passing through and returns it
//! unchanged.

use super::{Pass, RewriteStats};
use crate::bytecode::disassemble;
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::RewriteResult;
use tracing::debug;

pub struct DisassemblePass;

impl DisassemblePass {
    pub const NAME: &'static str = "disassemble";
}

impl Pass for DisassemblePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, _ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        debug!(routine = %code.qualified_name, "\n{}", disassemble(&code));
        let stats = RewriteStats::sized(&code, &code);
        Ok((code, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CodeBuilder, Opcode};
    use crate::value::Value;

    #[test]
    fn test_returns_input_unchanged() {
        let mut builder = CodeBuilder::new("f");
        builder.load_const(Value::None).emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();
        let (out, stats) = DisassemblePass.apply(code.clone(), &Context::default()).unwrap();
        assert_eq!(out, code);
        assert_eq!(stats.bytes_saved(), 0);
    }
}
