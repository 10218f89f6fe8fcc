//! Turning splice.toml settings into a context and a pipeline

use anyhow::{bail, Context as _, Result};
use codesplice_config::{Config, ConfigLoader, Literal};
use codesplice_runtime::passes::{pass_by_name, ListingMapper, MapSourcePass};
use codesplice_runtime::{CodeObject, Context, Pipeline, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings shared by every command
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Explicit splice.toml; otherwise discovered from the working directory
    pub config: Option<PathBuf>,
    /// Pass list overriding the configured one
    pub passes: Option<Vec<String>>,
    /// Force debug mode on
    pub debug: bool,
}

impl Settings {
    /// Load the project configuration these settings point at
    pub fn load_config(&self) -> Result<Config> {
        let loader = ConfigLoader::new();
        let config = match &self.config {
            Some(path) => loader
                .load_from_file(path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
            None => {
                let cwd = std::env::current_dir()?;
                loader
                    .load_from_directory(&cwd)
                    .context("Failed to load splice.toml")?
            }
        };
        if let Some(root) = config.project_root() {
            debug!(root = %root.display(), "loaded project configuration");
        }
        Ok(config)
    }

    /// Debug mode after flags and configuration
    pub fn debug(&self, config: &Config) -> bool {
        self.debug || config.debug()
    }
}

/// Convert a configured literal into a value
pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(n) => Value::Int(*n),
        Literal::Float(x) => Value::float(*x),
        Literal::String(s) => Value::str(s.clone()),
        Literal::Array(items) => Value::Tuple(items.iter().map(literal_value).collect()),
    }
}

/// Convert a JSON argument into a value
pub fn json_value(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(x)) => Value::float(x),
            _ => bail!("number {} is out of range", n),
        },
        serde_json::Value::String(s) => Value::str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Tuple(items.iter().map(json_value).collect::<Result<_>>()?)
        }
        serde_json::Value::Object(_) => bail!("objects cannot be passed as arguments"),
    })
}

/// Read a routine serialized as JSON
pub fn load_routine(path: &Path) -> Result<CodeObject> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read routine: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse routine: {}", path.display()))
}

/// Build the resolution context described by the configuration
pub fn build_context(config: &Config, debug: bool) -> Result<Context> {
    let mut builder = Context::builder().debug(debug);
    if config.project.builtins() {
        builder = builder.with_builtins();
    }
    if let Some(context) = &config.project.context {
        for (name, literal) in &context.constants {
            builder = builder.constant(name.clone(), literal_value(literal));
        }
        for (name, literal) in &context.namespace {
            builder = builder.namespace(name.clone(), literal_value(literal));
        }
    }
    for (name, path) in config.inline_files() {
        let body = load_routine(&path)
            .with_context(|| format!("Failed to load inline routine '{}'", name))?;
        builder = builder.inline(name, body);
    }
    builder.build().context("Invalid resolution context")
}

/// Build the pipeline from flags, then configuration, then defaults
///
/// In debug mode the source is remapped onto a listing after the last pass.
pub fn build_pipeline(settings: &Settings, config: &Config) -> Result<Pipeline> {
    let debug = settings.debug(config);
    let mapper = match config.listing_dir() {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create listing directory: {}", dir.display()))?;
            ListingMapper::in_dir(dir)
        }
        None => ListingMapper::default(),
    };

    let names = settings
        .passes
        .as_deref()
        .or_else(|| config.passes());
    let mut pipeline = match names {
        None => Pipeline::with_default_passes(),
        Some(names) => {
            let mut pipeline = Pipeline::new();
            for name in names {
                if name == MapSourcePass::NAME {
                    pipeline.add_pass(Box::new(MapSourcePass::new(mapper.clone())));
                    continue;
                }
                let pass = pass_by_name(name).with_context(|| {
                    format!(
                        "Unknown pass '{}' (known passes: {})",
                        name,
                        codesplice_runtime::passes::PASS_NAMES.join(", ")
                    )
                })?;
                pipeline.add_pass(pass);
            }
            pipeline
        }
    };

    if debug && !pipeline.pass_names().contains(&MapSourcePass::NAME) {
        pipeline.add_pass(Box::new(MapSourcePass::new(mapper)));
    }
    debug!(passes = ?pipeline.pass_names(), "pipeline ready");
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesplice_config::ProjectConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_literal_conversion() {
        let literal = Literal::Array(vec![
            Literal::Integer(1),
            Literal::Float(0.5),
            Literal::String("x".to_string()),
        ]);
        assert_eq!(
            literal_value(&literal),
            Value::Tuple(vec![Value::Int(1), Value::float(0.5), Value::str("x")])
        );
    }

    #[test]
    fn test_json_arguments() {
        let json: serde_json::Value = serde_json::from_str("[3, 2.5, true, null]").unwrap();
        assert_eq!(
            json_value(&json).unwrap(),
            Value::Tuple(vec![Value::Int(3), Value::float(2.5), Value::Bool(true), Value::None])
        );
        assert!(json_value(&serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn test_flag_passes_override_configuration() {
        let mut project = ProjectConfig::default();
        project.pipeline_mut().passes = Some(vec!["verify".to_string()]);
        let config = Config {
            project,
            project_root: None,
        };
        let settings = Settings {
            passes: Some(vec!["fold-constants".to_string(), "verify".to_string()]),
            ..Default::default()
        };
        let pipeline = build_pipeline(&settings, &config).unwrap();
        assert_eq!(pipeline.pass_names(), vec!["fold-constants", "verify"]);
    }

    #[test]
    fn test_debug_appends_source_mapping() {
        let settings = Settings {
            debug: true,
            ..Default::default()
        };
        let pipeline = build_pipeline(&settings, &Config::default()).unwrap();
        assert_eq!(pipeline.pass_names().last(), Some(&"map-source"));
        assert_eq!(pipeline.passes_count(), 6);
    }

    #[test]
    fn test_unknown_pass() {
        let settings = Settings {
            passes: Some(vec!["unroll".to_string()]),
            ..Default::default()
        };
        let err = build_pipeline(&settings, &Config::default()).err().unwrap();
        assert!(err.to_string().starts_with("Unknown pass 'unroll'"));
    }
}
