//! Disasm command - print the listing of a routine

use crate::setup::load_routine;
use anyhow::Result;
use codesplice_runtime::disassemble;
use std::path::Path;

/// Print the disassembly of a routine file
pub fn run(file: &Path) -> Result<()> {
    let code = load_routine(file)?;
    print!("{}", disassemble(&code));
    Ok(())
}
