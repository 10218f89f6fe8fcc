//! Rewrite pipeline benchmarks
//!
//! Measures the default pipeline on routines that exercise:
//! - Branch elimination inside a loop
//! - Inlining with jump fixup in the caller
//! - Operand widening once tables outgrow one byte
//!
//! Run with: cargo bench --bench pipeline

use codesplice_runtime::{CodeBuilder, CodeObject, Context, Opcode, Pipeline, Value, Vm};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `count` routine with `guards` DEBUG-guarded prints in its loop body
fn guarded_loop(guards: usize) -> CodeObject {
    let mut builder = CodeBuilder::new("count");
    let top = builder.label();
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
        .store_fast("i");
    for _ in 0..guards {
        let skip = builder.label();
        builder
            .load_global("DEBUG")
            .jump(Opcode::PopJumpIfFalse, skip)
            .load_global("print")
            .load_fast("i")
            .call(1)
            .emit(Opcode::PopTop, 0)
            .bind(skip);
    }
    builder
        .load_fast("total")
        .load_fast("i")
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("total")
        .jump(Opcode::JumpAbsolute, top)
        .bind(done)
        .load_global("tick")
        .call(0)
        .emit(Opcode::PopTop, 0)
        .load_fast("total")
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

fn tick() -> CodeObject {
    let mut builder = CodeBuilder::new("tick");
    builder
        .load_fast("total")
        .load_const(Value::Int(1))
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("total")
        .load_const(Value::None)
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

fn context() -> Context {
    Context::builder()
        .with_builtins()
        .constant("LIMIT", Value::Int(100))
        .constant("DEBUG", Value::Bool(false))
        .inline("tick", tick())
        .build()
        .unwrap()
}

// ============================================================================
// Pipeline Benchmarks
// ============================================================================

fn bench_default_pipeline(c: &mut Criterion) {
    let ctx = context();
    let pipeline = Pipeline::with_default_passes();
    let mut group = c.benchmark_group("default_pipeline");
    for guards in [1, 16, 128] {
        let code = guarded_loop(guards);
        group.bench_with_input(BenchmarkId::from_parameter(guards), &code, |b, code| {
            b.iter(|| pipeline.run(black_box(code.clone()), &ctx).unwrap())
        });
    }
    group.finish();
}

fn bench_wide_tables(c: &mut Criterion) {
    let mut builder = CodeBuilder::new("wide");
    for n in 0..1000 {
        builder.load_const(Value::Int(n)).emit(Opcode::PopTop, 0);
    }
    builder.load_global("LIMIT").emit(Opcode::ReturnValue, 0);
    let code = builder.build().unwrap();
    let ctx = context();
    let pipeline = Pipeline::with_default_passes();

    c.bench_function("wide_tables_1000", |b| {
        b.iter(|| pipeline.run(black_box(code.clone()), &ctx).unwrap())
    });
}

// ============================================================================
// Execution Benchmarks
// ============================================================================

fn bench_rewritten_loop(c: &mut Criterion) {
    let ctx = context();
    let rewritten = Pipeline::with_default_passes()
        .run(guarded_loop(16), &ctx)
        .unwrap();
    let namespace = Context::builder()
        .with_builtins()
        .constant("LIMIT", Value::Int(100))
        .constant("DEBUG", Value::Bool(false))
        .build()
        .unwrap();

    c.bench_function("vm_rewritten_loop", |b| {
        b.iter(|| Vm::from_context(&namespace).call(black_box(&rewritten), vec![]))
    });
}

criterion_group!(
    benches,
    bench_default_pipeline,
    bench_wide_tables,
    bench_rewritten_loop
);
criterion_main!(benches);
