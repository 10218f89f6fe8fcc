//! Shared routines for the integration tests

#![allow(dead_code)]

use codesplice_runtime::{CodeBuilder, CodeObject, Context, Opcode, RuntimeError, Value, Vm};

pub use pretty_assertions::assert_eq;

/// `f(n, b)`: `r = n ** b; if DEBUG: print(r); return r`
///
/// `guard` selects how the print is controlled: `Some(true)` tests the
/// `DEBUG` global, `Some(false)` prints unconditionally and `None` omits
/// the print entirely.
pub fn power(guard: Option<bool>) -> CodeObject {
    let mut builder = CodeBuilder::new("f");
    builder.param("n").param("b");
    let skip = builder.label();
    builder
        .load_fast("n")
        .load_fast("b")
        .emit(Opcode::BinaryPower, 0)
        .store_fast("r");
    if let Some(guarded) = guard {
        if guarded {
            builder.load_global("DEBUG").jump(Opcode::PopJumpIfFalse, skip);
        }
        builder
            .load_global("print")
            .load_fast("r")
            .call(1)
            .emit(Opcode::PopTop, 0);
    }
    builder.bind(skip);
    builder.load_fast("r").emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

/// `bar(b, c)`: `a = b + c; return a`
///
/// Spliced without arguments, `b` and `c` are the caller's locals.
pub fn bar() -> CodeObject {
    let mut builder = CodeBuilder::new("bar");
    builder.param("b").param("c");
    builder
        .load_fast("b")
        .load_fast("c")
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("a")
        .load_fast("a")
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

/// `foo()`: `b = 10; c = 20; bar(); return a`
///
/// With `inlined` set the body of `bar` is written out by hand.
pub fn foo(inlined: bool) -> CodeObject {
    let mut builder = CodeBuilder::new("foo");
    builder
        .load_const(Value::Int(10))
        .store_fast("b")
        .load_const(Value::Int(20))
        .store_fast("c");
    if inlined {
        builder
            .load_fast("b")
            .load_fast("c")
            .emit(Opcode::BinaryAdd, 0)
            .store_fast("a")
            .load_fast("a")
            .emit(Opcode::ReturnValue, 0);
    } else {
        builder
            .load_global("bar")
            .call(0)
            .emit(Opcode::PopTop, 0)
            .load_global("a")
            .emit(Opcode::ReturnValue, 0);
    }
    builder.build().unwrap()
}

/// `log()`: `total = total + 4`
pub fn log() -> CodeObject {
    let mut builder = CodeBuilder::new("log");
    builder
        .load_fast("total")
        .load_const(Value::Int(4))
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("total")
        .load_const(Value::None)
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

/// ```text
/// total = 0
/// for i in range(LIMIT):
///     if DEBUG: print(i)
///     total = total + i
/// log()
/// return total
/// ```
pub fn counting_loop() -> CodeObject {
    let mut builder = CodeBuilder::new("count");
    let top = builder.label();
    let skip = builder.label();
    let done = builder.label();
    builder
        .load_const(Value::Int(0))
        .store_fast("total")
        .load_global("range")
        .load_global("LIMIT")
        .call(1)
        .emit(Opcode::GetIter, 0)
        .bind(top)
        .jump(Opcode::ForIter, done)
        .store_fast("i")
        .load_global("DEBUG")
        .jump(Opcode::PopJumpIfFalse, skip)
        .load_global("print")
        .load_fast("i")
        .call(1)
        .emit(Opcode::PopTop, 0)
        .bind(skip)
        .load_fast("total")
        .load_fast("i")
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("total")
        .jump(Opcode::JumpAbsolute, top)
        .bind(done)
        .load_global("log")
        .call(0)
        .emit(Opcode::PopTop, 0)
        .load_fast("total")
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

/// Context for [`counting_loop`]
pub fn loop_context(debug: bool) -> Context {
    Context::builder()
        .with_builtins()
        .constant("LIMIT", Value::Int(5))
        .constant("DEBUG", Value::Bool(debug))
        .inline("log", log())
        .build()
        .unwrap()
}

/// Run `code` in a VM over the context namespace
pub fn execute(
    code: &CodeObject,
    ctx: &Context,
    args: Vec<Value>,
) -> (Result<Value, RuntimeError>, Vec<String>) {
    let mut vm = Vm::from_context(ctx);
    let result = vm.call(code, args);
    (result, vm.take_output())
}
