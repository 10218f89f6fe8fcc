//! Verify command - check a routine against the project context

use crate::setup::{build_context, load_routine, Settings};
use anyhow::{anyhow, Result};
use codesplice_runtime::passes::verify;
use std::path::Path;

/// Report every integrity violation in a routine file
pub fn run(file: &Path, settings: &Settings) -> Result<()> {
    let config = settings.load_config()?;
    let ctx = build_context(&config, settings.debug(&config))?;
    let code = load_routine(file)?;

    let errors = verify(&code, &ctx);
    if errors.is_empty() {
        println!("{}: OK", file.display());
        return Ok(());
    }

    for error in &errors {
        eprintln!("{}: {}", file.display(), error);
    }
    Err(anyhow!("{} violation(s) found", errors.len()))
}
