//! Rewrite command - run the pipeline over a routine file

use crate::setup::{build_context, build_pipeline, load_routine, Settings};
use anyhow::{Context, Result};
use codesplice_runtime::disassemble;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the rewrite command
#[derive(Debug, Clone, Default)]
pub struct RewriteArgs {
    /// Routine to rewrite (JSON)
    pub file: PathBuf,
    /// Write the rewritten routine here instead of stdout
    pub output: Option<PathBuf>,
    /// Print the listing instead of JSON
    pub listing: bool,
    /// Report rewrite statistics on stderr
    pub stats: bool,
}

/// Rewrite a routine file and emit the result
pub fn run(args: RewriteArgs, settings: &Settings) -> Result<()> {
    let config = settings.load_config()?;
    let ctx = build_context(&config, settings.debug(&config))?;
    let pipeline = build_pipeline(settings, &config)?;
    let code = load_routine(&args.file)?;

    let (rewritten, stats) = pipeline
        .run_with_stats(code, &ctx)
        .with_context(|| format!("Failed to rewrite {}", args.file.display()))?;
    info!(
        routine = %rewritten.qualified_name,
        rewrites = stats.total_rewrites(),
        saved = stats.bytes_saved(),
        "rewrite finished"
    );

    if args.stats {
        eprintln!("passes run:          {}", stats.passes_run);
        eprintln!("calls inlined:       {}", stats.calls_inlined);
        eprintln!("globals folded:      {}", stats.globals_folded);
        eprintln!("globals promoted:    {}", stats.globals_promoted);
        eprintln!("branches eliminated: {}", stats.branches_eliminated);
        eprintln!(
            "bytes:               {} -> {}",
            stats.bytes_before, stats.bytes_after
        );
    }

    let text = if args.listing {
        disassemble(&rewritten)
    } else {
        let mut json = serde_json::to_string_pretty(&rewritten)?;
        json.push('\n');
        json
    };

    match &args.output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => print!("{}", text),
    }
    Ok(())
}
