//! Error types for the configuration engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::watcher::WatchError;

/// Errors from registering, loading, saving and reloading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Path traversal detected: '{path}' resolves outside the config root")]
    PathTraversal { path: String },

    #[error("Invalid schema for {type_name}: {reason}")]
    InvalidSchema {
        type_name: &'static str,
        reason: String,
    },

    #[error("{format} support is not available (enable the '{feature}' cargo feature)")]
    FormatUnavailable {
        format: &'static str,
        feature: &'static str,
    },

    #[error("Required config value missing at path: {path}")]
    MissingRequired { path: String },

    #[error("Invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No config registered for {type_name}")]
    NotRegistered { type_name: &'static str },

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        ConfigError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from a malformed document rather than I/O.
    pub fn is_parse(&self) -> bool {
        matches!(self, ConfigError::Parse { .. })
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
