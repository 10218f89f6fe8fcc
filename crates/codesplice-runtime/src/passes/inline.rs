//! Call-site inlining
//!
//! The sequence `LOAD_GLOBAL f; CALL_FUNCTION 0; POP_TOP`, where `f` is in
//! the context's inline table, is replaced by the body of `f`. The body's
//! constants, names and locals are matched by value against the caller's
//! tables (and appended when missing), so a local the body shares with its
//! caller by name is the same slot after splicing. Parameters are no
//! different: nothing is passed, the body reads whatever the caller's local
//! of that name holds. The body's final
//! `RETURN_VALUE` and the loads feeding it are dropped, so the spliced code
//! falls through into the caller.

use super::{intern_name, intern_value, Pass, RewriteStats};
use crate::bytecode::{Instruction, OperandKind, Opcode};
use crate::code::CodeObject;
use crate::context::Context;
use crate::error::{RewriteError, RewriteResult};
use crate::tracker::{Emitted, OffsetTracker, Site};
use std::sync::Arc;
use tracing::{debug, trace};

/// Splices inline-table routines into their zero-argument call sites
pub struct InlinePass;

impl InlinePass {
    pub const NAME: &'static str = "inline";
}

impl Pass for InlinePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        let bytes_before = code.instructions.len();
        let mut visiting = Vec::new();
        let (rewritten, count) = inline_calls(code, ctx, &mut visiting)?;

        if count > 0 {
            debug!(routine = %rewritten.qualified_name, inlined = count, "inlined call sites");
        }
        let stats = RewriteStats {
            calls_inlined: count,
            bytes_before,
            bytes_after: rewritten.instructions.len(),
            passes_run: 1,
            ..Default::default()
        };
        Ok((rewritten, stats))
    }
}

/// Inline every matching call site of `code`, bodies first
///
/// `visiting` holds the routines currently being expanded; reaching one of
/// them again means the inline table is cyclic.
fn inline_calls(
    code: CodeObject,
    ctx: &Context,
    visiting: &mut Vec<String>,
) -> RewriteResult<(CodeObject, usize)> {
    let instructions = code.decode()?;
    let mut constants = code.constants.clone();
    let mut names = code.names.clone();
    let mut local_names = code.local_names.clone();
    let mut tracker = OffsetTracker::new();
    let mut stream = Vec::with_capacity(instructions.len());
    let mut count = 0;
    let mut extra_stack = 0;
    let mut index = 0;

    while index < instructions.len() {
        let Some((name, body)) = call_site(&instructions[index..], &code, ctx) else {
            stream.push(Emitted::from_instruction(&instructions[index]));
            index += 1;
            continue;
        };

        if visiting.contains(&name) {
            return Err(RewriteError::InlineCycle(name));
        }
        visiting.push(name.clone());
        let (body, nested) = inline_calls(CodeObject::clone(&body), ctx, visiting)?;
        visiting.pop();

        let splice = Splice::prepare(&name, &body)?;
        let load = instructions[index];
        let pop = instructions[index + 2];
        trace!(offset = load.offset, callee = %name, bytes = splice.len, "inline call");

        for instruction in &splice.instructions {
            let site = Site::spliced(load.offset, instruction.offset);
            let target = instruction
                .jump_target()
                .map(|target| Site::spliced(load.offset, target.min(splice.len)));
            let operand = match instruction.opcode.operand_kind() {
                OperandKind::Const => {
                    intern_value(&mut constants, &body.constants[instruction.operand as usize])
                }
                OperandKind::Name => intern_name(&mut names, &body.names[instruction.operand as usize]),
                OperandKind::Local => {
                    intern_name(&mut local_names, &body.local_names[instruction.operand as usize])
                }
                _ => instruction.operand,
            };
            stream.push(Emitted {
                site,
                opcode: instruction.opcode,
                operand,
                size: instruction.size,
                target,
            });
        }

        tracker.strip(load.offset, pop.end())?;
        tracker.widen(pop.end(), splice.len / crate::bytecode::UNIT);
        extra_stack = extra_stack.max(body.stack_size);
        count += 1 + nested;
        index += 3;
    }

    if count == 0 {
        return Ok((code, 0));
    }

    let bytes = tracker.fix_jumps(&stream)?;
    let local_count = code.local_count.max(local_names.len() as u32);
    let stack_size = code.stack_size.saturating_add(extra_stack);
    let rewritten = CodeObject {
        constants,
        names,
        local_names,
        local_count,
        stack_size,
        ..code
    }
    .with_instructions(bytes);
    Ok((rewritten, count))
}

/// Inline-table routine called by the triple starting at `window[0]`
fn call_site(
    window: &[Instruction],
    code: &CodeObject,
    ctx: &Context,
) -> Option<(String, Arc<CodeObject>)> {
    let [load, call, pop, ..] = window else {
        return None;
    };
    if load.opcode != Opcode::LoadGlobal
        || call.opcode != Opcode::CallFunction
        || call.operand != 0
        || pop.opcode != Opcode::PopTop
    {
        return None;
    }
    let name = code.names.get(load.operand as usize)?;
    let body = ctx.inline_body(name)?;
    Some((name.clone(), Arc::clone(body)))
}

/// The part of a body that gets spliced
struct Splice {
    /// Body instructions, final return (and its feeding loads) removed
    instructions: Vec<Instruction>,
    /// Byte length of the spliced part in body coordinates
    len: usize,
}

impl Splice {
    fn prepare(name: &str, body: &CodeObject) -> RewriteResult<Self> {
        let uninlinable = |reason: String| RewriteError::Uninlinable {
            name: name.to_string(),
            reason,
        };

        if let Some(err) = super::verify_bounds(body).into_iter().next() {
            return Err(uninlinable(err.to_string()));
        }

        let mut instructions = body.decode()?;
        if instructions
            .iter()
            .any(|i| i.opcode.operand_kind() == OperandKind::Free)
        {
            return Err(uninlinable("uses captured variables".to_string()));
        }
        match instructions.last() {
            Some(last) if last.opcode == Opcode::ReturnValue => {}
            _ => return Err(uninlinable("does not end with RETURN_VALUE".to_string())),
        }
        if instructions[..instructions.len() - 1]
            .iter()
            .any(|i| i.opcode == Opcode::ReturnValue)
        {
            return Err(uninlinable("returns before its last instruction".to_string()));
        }

        let Some(ret) = instructions.pop() else {
            return Err(uninlinable("is empty".to_string()));
        };
        // A trailing load can go only if no jump lands between it and the
        // return; such a jump expects the value to still be pushed.
        let targets: Vec<usize> = instructions.iter().filter_map(|i| i.jump_target()).collect();
        let mut trimmed_load = false;
        while let Some(last) = instructions.last().copied() {
            let jumped_over = targets
                .iter()
                .any(|t| *t > last.offset && *t <= ret.offset);
            if !last.opcode.is_load() || jumped_over {
                break;
            }
            instructions.pop();
            trimmed_load = true;
        }
        if !trimmed_load {
            // The returned value was computed; discard it instead.
            instructions.push(Instruction {
                opcode: Opcode::PopTop,
                operand: 0,
                ..ret
            });
        }

        let len = instructions.last().map_or(0, |i| i.end());
        Ok(Splice { instructions, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{decode_all, pack, CodeBuilder};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn assemble(instructions: &[(Opcode, i64)]) -> Vec<u8> {
        instructions
            .iter()
            .flat_map(|(op, arg)| pack(*op, *arg).unwrap())
            .collect()
    }

    /// `bar(b, c)`: `a = b + c; return a`
    fn bar() -> CodeObject {
        let mut builder = CodeBuilder::new("bar");
        builder.param("b").param("c");
        builder.local("a");
        builder
            .load_fast("b")
            .load_fast("c")
            .emit(Opcode::BinaryAdd, 0)
            .store_fast("a")
            .load_fast("a")
            .emit(Opcode::ReturnValue, 0);
        builder.build().unwrap()
    }

    /// `b = 10; c = 20; bar(); return a`
    fn foo() -> CodeObject {
        let mut builder = CodeBuilder::new("foo");
        builder.constant(Value::None);
        builder
            .load_const(Value::Int(10))
            .store_fast("b")
            .load_const(Value::Int(20))
            .store_fast("c")
            .load_global("bar")
            .call(0)
            .emit(Opcode::PopTop, 0)
            .load_global("a")
            .emit(Opcode::ReturnValue, 0);
        builder.build().unwrap()
    }

    fn ctx_with(name: &str, body: CodeObject) -> Context {
        Context::builder().inline(name, body).build().unwrap()
    }

    #[test]
    fn test_body_replaces_call_triple() {
        let (out, stats) = InlinePass.apply(foo(), &ctx_with("bar", bar())).unwrap();

        assert_eq!(
            out.instructions,
            assemble(&[
                (Opcode::LoadConst, 1),
                (Opcode::StoreFast, 0),
                (Opcode::LoadConst, 2),
                (Opcode::StoreFast, 1),
                (Opcode::LoadFast, 0),
                (Opcode::LoadFast, 1),
                (Opcode::BinaryAdd, 0),
                (Opcode::StoreFast, 2),
                (Opcode::LoadGlobal, 1),
                (Opcode::ReturnValue, 0),
            ])
        );
        assert_eq!(out.constants, vec![Value::None, Value::Int(10), Value::Int(20)]);
        assert_eq!(out.local_names, vec!["b", "c", "a"]);
        assert_eq!(out.local_count, 3);
        assert_eq!(stats.calls_inlined, 1);
    }

    #[test]
    fn test_computed_return_value_is_discarded() {
        let mut builder = CodeBuilder::new("sum");
        builder
            .load_global("x")
            .load_global("y")
            .emit(Opcode::BinaryAdd, 0)
            .emit(Opcode::ReturnValue, 0);
        let body = builder.build().unwrap();

        let mut caller = CodeBuilder::new("caller");
        caller.load_global("sum").call(0).emit(Opcode::PopTop, 0);
        caller.load_const(Value::None).emit(Opcode::ReturnValue, 0);

        let (out, _) = InlinePass
            .apply(caller.build().unwrap(), &ctx_with("sum", body))
            .unwrap();
        assert_eq!(
            out.instructions,
            assemble(&[
                (Opcode::LoadGlobal, 1),
                (Opcode::LoadGlobal, 2),
                (Opcode::BinaryAdd, 0),
                (Opcode::PopTop, 0),
                (Opcode::LoadConst, 0),
                (Opcode::ReturnValue, 0),
            ])
        );
        assert_eq!(out.names, vec!["sum", "x", "y"]);
    }

    #[test]
    fn test_calls_with_arguments_or_used_results_are_kept() {
        let mut builder = CodeBuilder::new("caller");
        builder.load_global("bar").load_const(Value::Int(1)).call(1);
        builder.emit(Opcode::PopTop, 0);
        builder.load_global("bar").call(0).emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();

        let (out, stats) = InlinePass.apply(code.clone(), &ctx_with("bar", bar())).unwrap();
        assert_eq!(out, code);
        assert_eq!(stats.calls_inlined, 0);
    }

    #[test]
    fn test_caller_jumps_are_shifted_past_the_body() {
        let mut builder = CodeBuilder::new("caller");
        let end = builder.label();
        builder.load_fast("flag");
        builder.jump(Opcode::PopJumpIfFalse, end);
        builder.load_global("bar").call(0).emit(Opcode::PopTop, 0);
        builder.bind(end);
        builder.load_const(Value::None).emit(Opcode::ReturnValue, 0);
        let code = builder.build().unwrap();

        let (out, _) = InlinePass.apply(code, &ctx_with("bar", bar())).unwrap();
        let decoded = decode_all(&out.instructions).unwrap();
        // 2 caller + 4 body instructions precede the target
        assert_eq!(decoded[1].jump_target(), Some(12));
        assert_eq!(decoded[6].offset, 12);
        assert_eq!(decoded[6].opcode, Opcode::LoadConst);
    }

    #[test]
    fn test_body_jump_to_trimmed_return_falls_through() {
        // if c: a = 1; return None
        let mut body = CodeBuilder::new("maybe");
        let done = body.label();
        body.load_global("c");
        body.jump(Opcode::PopJumpIfFalse, done);
        body.load_const(Value::Int(1)).store_fast("a");
        body.bind(done);
        body.load_const(Value::None).emit(Opcode::ReturnValue, 0);
        let body = body.build().unwrap();

        let mut caller = CodeBuilder::new("caller");
        caller.emit(Opcode::Nop, 0);
        caller.load_global("maybe").call(0).emit(Opcode::PopTop, 0);
        caller.load_global("a").emit(Opcode::ReturnValue, 0);

        let (out, _) = InlinePass
            .apply(caller.build().unwrap(), &ctx_with("maybe", body))
            .unwrap();
        assert_eq!(
            out.instructions,
            assemble(&[
                (Opcode::Nop, 0),
                (Opcode::LoadGlobal, 2),
                (Opcode::PopJumpIfFalse, 10),
                (Opcode::LoadConst, 0),
                (Opcode::StoreFast, 0),
                (Opcode::LoadGlobal, 1),
                (Opcode::ReturnValue, 0),
            ])
        );
    }

    #[test]
    fn test_value_reaching_return_by_jump_is_popped() {
        // return 1 if c else 2
        let mut body = CodeBuilder::new("pick");
        let other = body.label();
        let done = body.label();
        body.load_global("c");
        body.jump(Opcode::PopJumpIfFalse, other);
        body.load_const(Value::Int(1));
        body.jump(Opcode::JumpForward, done);
        body.bind(other);
        body.load_const(Value::Int(2));
        body.bind(done);
        body.emit(Opcode::ReturnValue, 0);
        let body = body.build().unwrap();

        let mut caller = CodeBuilder::new("caller");
        caller.load_global("pick").call(0).emit(Opcode::PopTop, 0);
        caller.load_const(Value::None).emit(Opcode::ReturnValue, 0);

        let (out, _) = InlinePass
            .apply(caller.build().unwrap(), &ctx_with("pick", body))
            .unwrap();
        let decoded = decode_all(&out.instructions).unwrap();
        let opcodes: Vec<Opcode> = decoded.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::LoadGlobal,
                Opcode::PopJumpIfFalse,
                Opcode::LoadConst,
                Opcode::JumpForward,
                Opcode::LoadConst,
                Opcode::PopTop,
                Opcode::LoadConst,
                Opcode::ReturnValue,
            ]
        );
        assert_eq!(decoded[3].jump_target(), Some(decoded[5].offset));
    }

    #[test]
    fn test_nested_inline_calls_expand() {
        let mut inner = CodeBuilder::new("inner");
        inner.load_const(Value::Int(7)).store_fast("x");
        inner.load_const(Value::None).emit(Opcode::ReturnValue, 0);

        let mut outer = CodeBuilder::new("outer");
        outer.load_global("inner").call(0).emit(Opcode::PopTop, 0);
        outer.load_const(Value::None).emit(Opcode::ReturnValue, 0);

        let ctx = Context::builder()
            .inline("inner", inner.build().unwrap())
            .inline("outer", outer.build().unwrap())
            .build()
            .unwrap();

        let mut caller = CodeBuilder::new("caller");
        caller.load_global("outer").call(0).emit(Opcode::PopTop, 0);
        caller.load_fast("x").emit(Opcode::ReturnValue, 0);

        let (out, stats) = InlinePass.apply(caller.build().unwrap(), &ctx).unwrap();
        assert_eq!(stats.calls_inlined, 2);
        assert_eq!(
            out.instructions,
            assemble(&[
                (Opcode::LoadConst, 0),
                (Opcode::StoreFast, 0),
                (Opcode::LoadFast, 0),
                (Opcode::ReturnValue, 0),
            ])
        );
    }

    #[test]
    fn test_body_with_captured_variables_is_rejected() {
        let mut body = CodeBuilder::new("closure");
        let slot = body.free_var("v");
        body.emit(Opcode::LoadDeref, slot).emit(Opcode::ReturnValue, 0);
        let ctx = ctx_with("closure", body.build().unwrap());

        let mut caller = CodeBuilder::new("caller");
        caller.load_global("closure").call(0).emit(Opcode::PopTop, 0);
        caller.load_const(Value::None).emit(Opcode::ReturnValue, 0);

        let err = InlinePass.apply(caller.build().unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, RewriteError::Uninlinable { ref name, .. } if name == "closure"));
    }

    #[test]
    fn test_parameters_bind_to_caller_locals_by_name() {
        // scale(x): x = x * 2
        let mut body = CodeBuilder::new("scale");
        body.param("x");
        body.load_fast("x")
            .load_const(Value::Int(2))
            .emit(Opcode::BinaryMultiply, 0)
            .store_fast("x")
            .load_const(Value::None)
            .emit(Opcode::ReturnValue, 0);
        let ctx = ctx_with("scale", body.build().unwrap());

        let mut caller = CodeBuilder::new("caller");
        caller.load_const(Value::Int(5)).store_fast("y");
        caller.load_const(Value::Int(3)).store_fast("x");
        caller.load_global("scale").call(0).emit(Opcode::PopTop, 0);
        caller.load_fast("x").emit(Opcode::ReturnValue, 0);

        let (out, stats) = InlinePass.apply(caller.build().unwrap(), &ctx).unwrap();
        assert_eq!(
            out.instructions,
            assemble(&[
                (Opcode::LoadConst, 0),
                (Opcode::StoreFast, 0),
                (Opcode::LoadConst, 1),
                (Opcode::StoreFast, 1),
                (Opcode::LoadFast, 1),
                (Opcode::LoadConst, 2),
                (Opcode::BinaryMultiply, 0),
                (Opcode::StoreFast, 1),
                (Opcode::LoadFast, 1),
                (Opcode::ReturnValue, 0),
            ])
        );
        assert_eq!(out.local_names, vec!["y", "x"]);
        assert_eq!(out.arg_count, 0);
        assert_eq!(stats.calls_inlined, 1);
    }
}
