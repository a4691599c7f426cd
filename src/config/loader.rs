// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::consts::{TOML_EXTENSION, YAML_EXTENSIONS};
use crate::errors::ConfigurationError;
use crate::graph::{IterationSpace, Value};
use crate::observability::messages::config::ConfigLoaded;
use crate::observability::messages::StructuredLog;

/// Run-level configuration of a pipeline.
///
/// Only the run is configured here: how many workers, where the cache lives,
/// which nodes to re-execute and what to iterate over. The graph itself is
/// built in code. `params` are opaque to the engine and handed to whatever
/// builds the graph.
///
/// # Example
/// ```yaml
/// name: psd
/// workers: 4
/// cache_dir: .ephyflow/cache
/// force_rerun: [psd]
/// manifest: runs/latest.json
/// iterables:
///   - field: subject_id
///     values: [sub-01, sub-02]
///   - field: session_id
///     values: [ses-01]
/// params:
///   fmin: 1.0
///   fmax: 40.0
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub force_rerun: Vec<String>,
    /// Where to write the JSON run manifest; disabled when absent
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Where to write the state-coloured DOT graph; disabled when absent
    #[serde(default)]
    pub dot: Option<PathBuf>,
    /// Iteration fields in declaration order. Earlier fields vary slowest.
    #[serde(default)]
    pub iterables: Vec<IterableConfig>,
    #[serde(default)]
    pub params: BTreeMap<String, ConfigValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IterableConfig {
    pub field: String,
    pub values: Vec<ConfigValue>,
}

/// A parameter value as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl From<ConfigValue> for Value {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Null => Value::Null,
            ConfigValue::Bool(b) => Value::Bool(b),
            ConfigValue::Int(i) => Value::Int(i),
            ConfigValue::Float(x) => Value::Float(x),
            ConfigValue::Text(s) => Value::Text(s),
            ConfigValue::List(items) => Value::List(items.into_iter().map(Value::from).collect()),
            ConfigValue::Map(map) => Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if YAML_EXTENSIONS.contains(&extension.as_str()) {
            Some(ConfigFormat::Yaml)
        } else if extension == TOML_EXTENSION {
            Some(ConfigFormat::Toml)
        } else {
            None
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFormat::Yaml => f.write_str("yaml"),
            ConfigFormat::Toml => f.write_str("toml"),
        }
    }
}

impl PipelineConfig {
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
        }
    }

    /// Checks what deserialization cannot.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| Err(ConfigurationError::Invalid { reason });

        if self.name.trim().is_empty() {
            return invalid("pipeline name is empty".to_string());
        }
        if self.workers == Some(0) {
            return invalid("workers must be at least 1".to_string());
        }

        let mut fields = HashSet::new();
        for iterable in &self.iterables {
            if iterable.field.trim().is_empty() {
                return invalid("iterable field name is empty".to_string());
            }
            if !fields.insert(iterable.field.as_str()) {
                return invalid(format!("iterable field '{}' is declared twice", iterable.field));
            }
        }

        if self.force_rerun.iter().any(|name| name.trim().is_empty()) {
            return invalid("force_rerun contains an empty node name".to_string());
        }
        Ok(())
    }

    /// The configured iterables as an iteration space, fields in declaration order.
    pub fn iteration_space(&self) -> IterationSpace {
        self.iterables.iter().fold(IterationSpace::new(), |space, iterable| {
            space.field(iterable.field.clone(), iterable.values.iter().cloned().map(Value::from))
        })
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.params.get(key).cloned().map(Value::from)
    }

    pub fn params(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.clone())))
            .collect()
    }
}

/// Loads and validates a pipeline configuration, YAML or TOML by extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigurationError> {
    let path = path.as_ref();
    let load_error = |reason: String| ConfigurationError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| load_error("unsupported file extension, expected .yaml, .yml or .toml".to_string()))?;
    let contents = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let config = PipelineConfig::parse(&contents, format).map_err(load_error)?;
    config.validate()?;

    ConfigLoaded {
        path,
        format: &format.to_string(),
        pipeline: &config.name,
    }
    .log();
    Ok(config)
}
