//! Codesplice Configuration System
//!
//! Provides configuration management for codesplice projects including:
//! - Project configuration (splice.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Project config (./splice.toml, found by walking up from the working directory)
//! 2. Environment variables (SPLICE_*)
//! 3. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use codesplice_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! ```

pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("'{name}' is bound more than once (in [context.{first}] and [context.{second}])")]
    DuplicateBinding {
        name: String,
        first: &'static str,
        second: &'static str,
    },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "splice.toml";

// Re-export main types
pub use loader::{apply_overrides, Config, ConfigLoader};
pub use project::{ContextConfig, Literal, PipelineConfig, ProjectConfig};
