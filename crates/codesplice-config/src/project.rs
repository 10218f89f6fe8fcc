//! Project Configuration (splice.toml)
//!
//! Handles project-level configuration stored in `splice.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Project configuration from splice.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Pipeline configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    /// Resolution context bindings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pass names, in run order (default: the standard pipeline)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passes: Option<Vec<String>>,

    /// Log listings and remap sources after rewriting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,

    /// Where debug listings are written (default: the system temp directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_dir: Option<PathBuf>,
}

/// Resolution context bindings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Treat the builtin callables as constants (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtins: Option<bool>,

    /// Names bound to statically-known values
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, Literal>,

    /// Run-time bindings that are visible but never folded
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace: BTreeMap<String, Literal>,

    /// Inlinable routines: name -> JSON code object file
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inline: BTreeMap<String, PathBuf>,
}

/// A TOML value usable as a binding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Bound as a tuple
    Array(Vec<Literal>),
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(passes) = self.pipeline.as_ref().and_then(|p| p.passes.as_ref()) {
            for pass in passes {
                if !is_valid_pass_name(pass) {
                    return Err(ConfigError::InvalidValue {
                        field: "pipeline.passes".to_string(),
                        reason: format!("'{}' is not a pass name", pass),
                    });
                }
            }
        }

        if let Some(context) = &self.context {
            let tables: [(&'static str, Vec<&String>); 3] = [
                ("constants", context.constants.keys().collect()),
                ("namespace", context.namespace.keys().collect()),
                ("inline", context.inline.keys().collect()),
            ];
            let mut seen: BTreeMap<&str, &'static str> = BTreeMap::new();
            for (table, names) in tables {
                for name in names {
                    if !is_identifier(name) {
                        return Err(ConfigError::InvalidValue {
                            field: format!("context.{}", table),
                            reason: format!("'{}' is not an identifier", name),
                        });
                    }
                    if let Some(first) = seen.insert(name.as_str(), table) {
                        return Err(ConfigError::DuplicateBinding {
                            name: name.to_string(),
                            first,
                            second: table,
                        });
                    }
                }
            }

            for (name, path) in &context.inline {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("context.inline.{}", name),
                        reason: "path cannot be empty".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Configured pass names, if any
    pub fn passes(&self) -> Option<&[String]> {
        self.pipeline.as_ref()?.passes.as_deref()
    }

    /// Whether debug mode is on (default: false)
    pub fn debug(&self) -> bool {
        self.pipeline
            .as_ref()
            .and_then(|p| p.debug)
            .unwrap_or(false)
    }

    /// Configured listing directory, if any
    pub fn listing_dir(&self) -> Option<&Path> {
        self.pipeline.as_ref()?.listing_dir.as_deref()
    }

    /// Whether builtins are registered as constants (default: true)
    pub fn builtins(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|c| c.builtins)
            .unwrap_or(true)
    }

    /// Pipeline section, created if absent
    pub fn pipeline_mut(&mut self) -> &mut PipelineConfig {
        self.pipeline.get_or_insert_with(PipelineConfig::default)
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if let Some(pipeline) = &other.pipeline {
            let own = self.pipeline_mut();
            if pipeline.passes.is_some() {
                own.passes = pipeline.passes.clone();
            }
            if pipeline.debug.is_some() {
                own.debug = pipeline.debug;
            }
            if pipeline.listing_dir.is_some() {
                own.listing_dir = pipeline.listing_dir.clone();
            }
        }
        if let Some(context) = &other.context {
            let own = self.context.get_or_insert_with(ContextConfig::default);
            if context.builtins.is_some() {
                own.builtins = context.builtins;
            }
            own.constants.extend(context.constants.clone());
            own.namespace.extend(context.namespace.clone());
            own.inline.extend(context.inline.clone());
        }
    }
}

/// Pass names are lower-case words joined by `-`
fn is_valid_pass_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('-').all(|word| {
            !word.is_empty() && word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
