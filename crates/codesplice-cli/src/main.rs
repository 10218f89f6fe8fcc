use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod setup;

/// Bytecode rewriter for stack-machine routines.
///
/// Routines are exchanged as JSON code objects. Constant bindings, inline
/// routines and the pass list come from the nearest splice.toml.
///
/// EXAMPLES:
///     codesplice rewrite f.json -o f.opt.json   Rewrite with the default pipeline
///     codesplice rewrite f.json --listing       Show the rewritten listing
///     codesplice disasm f.json                  Disassemble a routine
///     codesplice verify f.json                  Check table references and names
///     codesplice run f.json 3 2 --rewrite       Rewrite, then execute
///
/// ENVIRONMENT VARIABLES:
///     SPLICE_CONFIG     Path to splice.toml (skips discovery)
///     SPLICE_DEBUG      Set to '1' to enable debug mode
///     SPLICE_PASSES     Comma-separated pass list
///     RUST_LOG          Log filter (overridden by -v)
#[derive(Parser)]
#[command(name = "codesplice")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options that shape the context and pipeline
#[derive(Args, Debug, Clone, Default)]
struct ProjectArgs {
    /// Path to splice.toml
    #[arg(long, env = "SPLICE_CONFIG")]
    config: Option<PathBuf>,
    /// Comma-separated pass list (overrides splice.toml)
    #[arg(long, value_delimiter = ',')]
    passes: Option<Vec<String>>,
    /// Enable debug mode (listings and source mapping)
    #[arg(long)]
    debug: bool,
}

impl From<ProjectArgs> for setup::Settings {
    fn from(args: ProjectArgs) -> Self {
        Self {
            config: args.config,
            passes: args.passes,
            debug: args.debug,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a routine
    ///
    /// Runs the configured pipeline (or the default one: inline,
    /// fold-constants, precompute-conditionals, promote-globals, verify)
    /// and writes the rewritten routine as JSON.
    ///
    /// EXAMPLES:
    ///     codesplice rewrite f.json
    ///     codesplice rewrite f.json --passes fold-constants,verify --stats
    Rewrite {
        /// Routine file (JSON code object)
        file: PathBuf,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Print the rewritten listing instead of JSON
        #[arg(long)]
        listing: bool,
        /// Report rewrite statistics on stderr
        #[arg(long)]
        stats: bool,
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Print the disassembly of a routine
    Disasm {
        /// Routine file (JSON code object)
        file: PathBuf,
    },

    /// Verify a routine against the project context
    ///
    /// Reports every out-of-range table reference and every global name
    /// that the context does not bind.
    Verify {
        /// Routine file (JSON code object)
        file: PathBuf,
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Execute a routine on the reference VM
    ///
    /// Arguments are JSON literals; anything that is not valid JSON is
    /// passed as a string. Printed lines appear first, then the result.
    Run {
        /// Routine file (JSON code object)
        file: PathBuf,
        /// Positional arguments
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// Rewrite before running
        #[arg(long)]
        rewrite: bool,
        #[command(flatten)]
        project: ProjectArgs,
    },
}

/// Install the stderr log subscriber
///
/// `-v` flags win over `RUST_LOG`; with neither only warnings are shown.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Rewrite {
            file,
            output,
            listing,
            stats,
            project,
        } => {
            let args = commands::rewrite::RewriteArgs {
                file,
                output,
                listing,
                stats,
            };
            commands::rewrite::run(args, &project.into())?;
        }
        Commands::Disasm { file } => {
            commands::disasm::run(&file)?;
        }
        Commands::Verify { file, project } => {
            commands::verify::run(&file, &project.into())?;
        }
        Commands::Run {
            file,
            args,
            rewrite,
            project,
        } => {
            let args = commands::run::RunArgs {
                file,
                args,
                rewrite,
            };
            commands::run::run(args, &project.into())?;
        }
    }

    Ok(())
}
