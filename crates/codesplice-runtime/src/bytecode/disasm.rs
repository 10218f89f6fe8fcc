//! Disassembler
//!
//! Human-readable listing of a code object. Used by debug logging, the
//! listing source mapper and `codesplice disasm`.

use super::{CompareOp, Instruction, OperandKind};
use crate::code::CodeObject;

/// Disassemble a code object
///
/// # Format
/// ```text
/// === f (2 args, 3 locals, stack 2) ===
/// === Constants ===
/// 0: None
///
/// === Names ===
/// 0: DEBUG
///
/// === Instructions ===
/// 0000  LOAD_FAST             0 (n)
/// 0002  POP_JUMP_IF_FALSE    10 (to 10)
/// ```
pub fn disassemble(code: &CodeObject) -> String {
    let mut output = format!(
        "=== {} ({} args, {} locals, stack {}) ===\n",
        code.qualified_name, code.arg_count, code.local_count, code.stack_size
    );

    if !code.constants.is_empty() {
        output.push_str("=== Constants ===\n");
        for (index, constant) in code.constants.iter().enumerate() {
            output.push_str(&format!("{}: {}\n", index, constant.repr()));
        }
        output.push('\n');
    }

    for (title, table) in [
        ("Names", &code.names),
        ("Locals", &code.local_names),
        ("Cells", &code.cell_vars),
        ("Free", &code.free_vars),
    ] {
        if table.is_empty() {
            continue;
        }
        output.push_str(&format!("=== {} ===\n", title));
        for (index, name) in table.iter().enumerate() {
            output.push_str(&format!("{}: {}\n", index, name));
        }
        output.push('\n');
    }

    output.push_str("=== Instructions ===\n");
    match code.decode() {
        Ok(instructions) => {
            for instruction in &instructions {
                output.push_str(&format_instruction(code, instruction));
                output.push('\n');
            }
        }
        Err(err) => output.push_str(&format!("<undecodable: {}>\n", err)),
    }

    output
}

/// One listing line for `instruction`
///
/// Operands that index a table are annotated with the entry they select;
/// indices outside the table are flagged rather than hidden.
pub fn format_instruction(code: &CodeObject, instruction: &Instruction) -> String {
    let opcode = instruction.opcode;
    let operand = instruction.operand;
    let head = format!("{:04}  {:<20}", instruction.offset, opcode.mnemonic());

    let detail = match opcode.operand_kind() {
        OperandKind::None => return head.trim_end().to_string(),
        OperandKind::Const => code
            .constants
            .get(operand as usize)
            .map(|value| value.repr()),
        OperandKind::Name => code.names.get(operand as usize).cloned(),
        OperandKind::Local => code.local_names.get(operand as usize).cloned(),
        OperandKind::Free => code.captured_name(operand as usize).map(str::to_string),
        OperandKind::AbsoluteJump | OperandKind::RelativeJump => instruction
            .jump_target()
            .map(|target| format!("to {}", target)),
        OperandKind::Compare => CompareOp::try_from(operand)
            .ok()
            .map(|op| op.symbol().to_string()),
        OperandKind::Count => return format!("{}{:>3}", head, operand),
    };

    match detail {
        Some(detail) => format!("{}{:>3} ({})", head, operand, detail),
        None => format!("{}{:>3} (<out of range>)", head, operand),
    }
}
