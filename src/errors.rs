// src/errors.rs

//! Crate-wide error types.
//!
//! Each layer has its own small `thiserror` enum; [`RunError`] is what the
//! run controller hands to observers and to `done`.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("callback timed out")]
    CallbackTimedOut,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Structural failures of the preparation pipeline.
///
/// Correctable problems (missing files, certificate IO) never surface here;
/// stages downgrade those to console warnings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("no item to operate on at stage '{stage}'")]
    MissingItem { stage: &'static str },

    #[error("item '{item}' has no request")]
    MissingRequest { item: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{name}: {message}")]
    Thrown { name: String, message: String },

    #[error("script execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("script host failure: {0}")]
    Host(String),
}

impl ScriptError {
    pub fn thrown(message: impl Into<String>) -> Self {
        ScriptError::Thrown {
            name: "Error".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors reported back to the script that asked for a nested run.
///
/// These never reach the top-level `done`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NestedError {
    #[error("Exceeded max depth of {max} for nested request execution")]
    DepthExceeded { max: usize },

    #[error("unable to resolve request '{request_id}': {message}")]
    Resolve { request_id: String, message: String },

    #[error("request '{request_id}' did not resolve to a runnable collection: {message}")]
    Malformed { request_id: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("auth parameter '{0}' is missing")]
    MissingParam(String),

    #[error("{0}")]
    Invalid(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunError>;
