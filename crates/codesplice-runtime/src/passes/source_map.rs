//! Source mapping
//!
//! After rewriting, a routine's line table no longer matches any source
//! file. In debug mode a [`SourceMapper`] produces a replacement: the
//! built-in [`ListingMapper`] writes the disassembly to a file and points
//! every instruction at its line in that listing, so tracebacks and
//! debuggers show the rewritten code.

use super::{Pass, RewriteStats};
use crate::bytecode::disassemble;
use crate::code::{CodeObject, LineEntry};
use crate::context::Context;
use crate::error::{RewriteError, RewriteResult};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Where a routine's instructions now come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    pub filename: String,
    pub first_line: u32,
    pub line_table: Vec<LineEntry>,
}

/// Why a routine could not be mapped
#[derive(Error, Debug)]
pub enum SourceMapError {
    #[error("failed to write listing: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Unmapped(String),
}

/// Produces a source mapping for a routine
pub trait SourceMapper: Send + Sync {
    fn map(&self, code: &CodeObject) -> Result<SourceMap, SourceMapError>;
}

/// Writes the disassembly listing to a kept temporary file
#[derive(Debug, Clone, Default)]
pub struct ListingMapper {
    dir: Option<PathBuf>,
}

impl ListingMapper {
    /// Write listings into `dir` instead of the system temp directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

/// Line table for a listing produced by [`disassemble`]
///
/// Every instruction line starts with its zero-padded offset.
pub fn listing_line_table(listing: &str) -> Vec<LineEntry> {
    listing
        .lines()
        .enumerate()
        .skip_while(|(_, line)| *line != "=== Instructions ===")
        .skip(1)
        .filter_map(|(index, line)| {
            let offset = line.split_whitespace().next()?.parse().ok()?;
            Some(LineEntry {
                offset,
                line: index as u32 + 1,
            })
        })
        .collect()
}

impl SourceMapper for ListingMapper {
    fn map(&self, code: &CodeObject) -> Result<SourceMap, SourceMapError> {
        let listing = disassemble(code);
        let line_table = listing_line_table(&listing);

        let stem: String = code
            .qualified_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .suffix(".dis")
            .tempfile_in(dir)?;
        file.write_all(listing.as_bytes())?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        Ok(SourceMap {
            filename: path.display().to_string(),
            first_line: line_table.first().map_or(1, |entry| entry.line),
            line_table,
        })
    }
}

/// Remaps the routine onto a generated source; does nothing outside debug mode
pub struct MapSourcePass {
    mapper: Box<dyn SourceMapper>,
}

impl MapSourcePass {
    pub const NAME: &'static str = "map-source";

    pub fn new(mapper: impl SourceMapper + 'static) -> Self {
        Self {
            mapper: Box::new(mapper),
        }
    }
}

impl Default for MapSourcePass {
    fn default() -> Self {
        Self::new(ListingMapper::default())
    }
}

impl Pass for MapSourcePass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, code: CodeObject, ctx: &Context) -> RewriteResult<(CodeObject, RewriteStats)> {
        if !ctx.is_debug() {
            let stats = RewriteStats::sized(&code, &code);
            return Ok((code, stats));
        }

        let map = self
            .mapper
            .map(&code)
            .map_err(|err| RewriteError::Collaborator {
                collaborator: "source mapper",
                message: err.to_string(),
            })?;
        debug!(routine = %code.qualified_name, file = %map.filename, "mapped source");

        let mapped = CodeObject {
            filename: map.filename,
            first_line: map.first_line,
            line_table: map.line_table,
            ..code
        };
        let stats = RewriteStats::sized(&mapped, &mapped);
        Ok((mapped, stats))
    }
}
