// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::collection::Collection;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RunError};
use crate::variables::{Variable, VariableScope};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// Checks iteration and partition counts, timeout durations, proxy entries
/// and URL match patterns.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(ConfigFile::default());
    }
    load_and_validate(path)
}

/// `Runwright.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Runwright.toml")
}

pub fn load_collection(path: impl AsRef<Path>) -> Result<Collection> {
    let contents = fs::read_to_string(path.as_ref())?;
    let collection: Collection = serde_json::from_str(&contents)?;
    Ok(collection)
}

/// Environment or globals file. Accepts either an exported environment
/// (`{ "name": ..., "values": [...] }`) or a bare array of variables.
pub fn load_variables_file(path: impl AsRef<Path>) -> Result<VariableScope> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum VariablesFile {
        Export { values: Vec<Variable> },
        List(Vec<Variable>),
    }

    let contents = fs::read_to_string(path.as_ref())?;
    let values = match serde_json::from_str::<VariablesFile>(&contents)? {
        VariablesFile::Export { values } | VariablesFile::List(values) => values,
    };
    Ok(VariableScope::from_variables(values))
}

/// Iteration data file: a JSON array of flat objects, one per iteration.
pub fn load_data_file(path: impl AsRef<Path>) -> Result<Vec<VariableScope>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let rows: Vec<Value> = serde_json::from_str(&contents)?;

    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| match row {
            Value::Object(fields) => Ok(VariableScope::from_pairs(fields)),
            other => Err(RunError::ConfigError(format!(
                "data file {}: row {idx} must be an object, got {other}",
                path.display()
            ))),
        })
        .collect()
}
