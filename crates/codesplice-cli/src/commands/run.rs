//! Run command - execute a routine on the reference VM

use crate::setup::{build_context, build_pipeline, json_value, load_routine, Settings};
use anyhow::{anyhow, Context, Result};
use codesplice_runtime::{Value, Vm};
use std::path::PathBuf;

/// Arguments for the run command
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Routine to execute (JSON)
    pub file: PathBuf,
    /// Positional arguments; JSON literals, anything else is a string
    pub args: Vec<String>,
    /// Rewrite the routine before running it
    pub rewrite: bool,
}

/// Parse one command-line argument
fn parse_argument(text: &str) -> Result<Value> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => json_value(&json).with_context(|| format!("Invalid argument: {}", text)),
        Err(_) => Ok(Value::str(text)),
    }
}

/// Execute a routine file, printing its output and result
pub fn run(args: RunArgs, settings: &Settings) -> Result<()> {
    let config = settings.load_config()?;
    let ctx = build_context(&config, settings.debug(&config))?;
    let mut code = load_routine(&args.file)?;
    if args.rewrite {
        code = build_pipeline(settings, &config)?
            .run(code, &ctx)
            .with_context(|| format!("Failed to rewrite {}", args.file.display()))?;
    }

    let values = args
        .args
        .iter()
        .map(|text| parse_argument(text))
        .collect::<Result<Vec<_>>>()?;

    let mut vm = Vm::from_context(&ctx);
    let result = vm.call(&code, values);
    for line in vm.output() {
        println!("{}", line);
    }

    let value = result.map_err(|e| anyhow!("{}: {}", code.qualified_name, e))?;
    if value != Value::None {
        println!("{}", value.repr());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_fall_back_to_strings() {
        assert_eq!(parse_argument("3").unwrap(), Value::Int(3));
        assert_eq!(parse_argument("\"3\"").unwrap(), Value::str("3"));
        assert_eq!(parse_argument("abc").unwrap(), Value::str("abc"));
        assert!(parse_argument("{\"a\": 1}").is_err());
    }
}
