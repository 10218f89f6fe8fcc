//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::project::ProjectConfig;
use crate::{ConfigError, ConfigResult, CONFIG_FILE};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Project config (./splice.toml) - lowest priority
/// 2. Environment variables (SPLICE_*) - overrides project
/// 3. CLI flags - highest priority (handled by caller)
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Skip environment overrides
    ignore_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Project root directory (where splice.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that ignores `SPLICE_*` variables
    pub fn without_env() -> Self {
        Self { ignore_env: true }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find splice.toml. Without one the
    /// defaults apply.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let project = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let project = self.apply_env_overrides(project_config)?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config)
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Apply environment variable overrides to project config
    ///
    /// - `SPLICE_DEBUG=true|false` (also `1|0`, `yes|no`)
    /// - `SPLICE_PASSES=inline,fold-constants,verify`
    fn apply_env_overrides(&self, config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if self.ignore_env {
            return Ok(config);
        }
        apply_overrides(config, |key| env::var(key).ok())
    }
}

/// Apply `SPLICE_*` overrides read through `lookup`
pub fn apply_overrides(
    mut config: ProjectConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ConfigResult<ProjectConfig> {
    if let Some(debug) = lookup("SPLICE_DEBUG") {
        let debug = match debug.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" | "" => false,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "SPLICE_DEBUG".to_string(),
                    reason: format!("expected a boolean, got '{}'", other),
                })
            }
        };
        config.pipeline_mut().debug = Some(debug);
    }

    if let Some(passes) = lookup("SPLICE_PASSES") {
        let passes: Vec<String> = passes
            .split(',')
            .map(str::trim)
            .filter(|pass| !pass.is_empty())
            .map(str::to_string)
            .collect();
        config.pipeline_mut().passes = Some(passes);
    }

    config.validate()?;
    Ok(config)
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has splice.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Configured pass names, if any
    pub fn passes(&self) -> Option<&[String]> {
        self.project.passes()
    }

    /// Whether debug mode is on
    pub fn debug(&self) -> bool {
        self.project.debug()
    }

    /// Resolve a configured path against the project root
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Listing directory, resolved against the project root
    pub fn listing_dir(&self) -> Option<PathBuf> {
        self.project.listing_dir().map(|dir| self.resolve_path(dir))
    }

    /// Inline table entries with resolved file paths
    pub fn inline_files(&self) -> Vec<(String, PathBuf)> {
        self.project
            .context
            .iter()
            .flat_map(|context| &context.inline)
            .map(|(name, path)| (name.clone(), self.resolve_path(path)))
            .collect()
    }
}
