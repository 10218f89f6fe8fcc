//! End-to-end tests for the codesplice binary
//!
//! Each test writes routines and a splice.toml into a temporary project
//! directory and runs the binary from there.

use assert_cmd::prelude::*;
use codesplice_runtime::{CodeBuilder, CodeObject, Opcode, Value};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn codesplice_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("codesplice").unwrap();
    cmd.current_dir(dir)
        .env_remove("SPLICE_CONFIG")
        .env_remove("SPLICE_DEBUG")
        .env_remove("SPLICE_PASSES")
        .env_remove("RUST_LOG");
    cmd
}

fn write_routine(dir: &Path, file: &str, code: &CodeObject) {
    fs::write(dir.join(file), serde_json::to_string_pretty(code).unwrap()).unwrap();
}

/// `f(n, b)`: `r = n ** b; if DEBUG: print(r); return r`
fn power() -> CodeObject {
    let mut builder = CodeBuilder::new("f");
    builder.param("n").param("b");
    let skip = builder.label();
    builder
        .load_fast("n")
        .load_fast("b")
        .emit(Opcode::BinaryPower, 0)
        .store_fast("r")
        .load_global("DEBUG")
        .jump(Opcode::PopJumpIfFalse, skip)
        .load_global("print")
        .load_fast("r")
        .call(1)
        .emit(Opcode::PopTop, 0)
        .bind(skip)
        .load_fast("r")
        .emit(Opcode::ReturnValue, 0);
    builder.build().unwrap()
}

fn project(debug_flag: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("splice.toml"),
        format!("[context]\nconstants = {{ DEBUG = {} }}\n", debug_flag),
    )
    .unwrap();
    write_routine(dir.path(), "f.json", &power());
    dir
}

// ============================================================================
// disasm / verify
// ============================================================================

#[test]
fn test_disasm_prints_listing() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["disasm", "f.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Instructions ==="))
        .stdout(predicate::str::contains("LOAD_GLOBAL"))
        .stdout(predicate::str::contains("(DEBUG)"));
}

#[test]
fn test_verify_accepts_bound_names() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["verify", "f.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("f.json: OK"));
}

#[test]
fn test_verify_reports_unbound_names() {
    let dir = TempDir::new().unwrap();
    write_routine(dir.path(), "f.json", &power());
    codesplice_cmd(dir.path())
        .args(["verify", "f.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'DEBUG' is not defined"))
        .stderr(predicate::str::contains("1 violation(s) found"));
}

// ============================================================================
// rewrite
// ============================================================================

#[test]
fn test_rewrite_writes_json_without_globals() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["rewrite", "f.json", "-o", "out.json", "--stats"])
        .assert()
        .success()
        .stderr(predicate::str::contains("branches eliminated: 1"));

    let text = fs::read_to_string(dir.path().join("out.json")).unwrap();
    let rewritten: CodeObject = serde_json::from_str(&text).unwrap();
    let opcodes: Vec<Opcode> = rewritten
        .decode()
        .unwrap()
        .into_iter()
        .map(|i| i.opcode)
        .collect();
    assert!(!opcodes.contains(&Opcode::LoadGlobal));
    assert!(!opcodes.contains(&Opcode::CallFunction));
}

#[test]
fn test_rewrite_listing_with_explicit_passes() {
    let dir = project(true);
    codesplice_cmd(dir.path())
        .args(["rewrite", "f.json", "--listing", "--passes", "fold-constants"])
        .assert()
        .success()
        .stdout(predicate::str::contains("POP_JUMP_IF_FALSE"))
        .stdout(predicate::str::contains("LOAD_CONST"))
        .stdout(predicate::str::contains("LOAD_GLOBAL").not());
}

#[test]
fn test_unknown_pass_fails() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["rewrite", "f.json", "--passes", "unroll"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pass 'unroll'"));
}

#[test]
fn test_debug_writes_listing_file() {
    let dir = project(false);
    fs::write(
        dir.path().join("splice.toml"),
        "[pipeline]\nlisting_dir = \"listings\"\n[context]\nconstants = { DEBUG = false }\n",
    )
    .unwrap();

    codesplice_cmd(dir.path())
        .env("SPLICE_DEBUG", "1")
        .args(["rewrite", "f.json", "-o", "out.json"])
        .assert()
        .success();

    let listings: Vec<_> = fs::read_dir(dir.path().join("listings"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(listings.len(), 1);
    assert!(listings[0].starts_with("f-") && listings[0].ends_with(".dis"));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_prints_output_then_result() {
    let dir = project(true);
    codesplice_cmd(dir.path())
        .args(["run", "f.json", "3", "2", "--rewrite"])
        .assert()
        .success()
        .stdout("9\n9\n");
}

#[test]
fn test_run_quiet_when_flag_is_off() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["run", "f.json", "3", "2"])
        .assert()
        .success()
        .stdout("9\n");
}

#[test]
fn test_run_inlines_configured_routine() {
    let dir = TempDir::new().unwrap();

    let mut bar = CodeBuilder::new("bar");
    bar.param("b").param("c");
    bar.load_fast("b")
        .load_fast("c")
        .emit(Opcode::BinaryAdd, 0)
        .store_fast("a")
        .load_fast("a")
        .emit(Opcode::ReturnValue, 0);
    write_routine(dir.path(), "bar.json", &bar.build().unwrap());

    let mut foo = CodeBuilder::new("foo");
    foo.load_const(Value::Int(10))
        .store_fast("b")
        .load_const(Value::Int(20))
        .store_fast("c")
        .load_global("bar")
        .call(0)
        .emit(Opcode::PopTop, 0)
        .load_global("a")
        .emit(Opcode::ReturnValue, 0);
    write_routine(dir.path(), "foo.json", &foo.build().unwrap());

    fs::write(
        dir.path().join("splice.toml"),
        "[context]\ninline = { bar = \"bar.json\" }\n",
    )
    .unwrap();

    codesplice_cmd(dir.path())
        .args(["run", "foo.json", "--rewrite"])
        .assert()
        .success()
        .stdout("30\n");
}

#[test]
fn test_runtime_error_is_reported() {
    let dir = project(false);
    codesplice_cmd(dir.path())
        .args(["run", "f.json", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "f() takes 2 positional arguments but 1 were given",
        ));
}
