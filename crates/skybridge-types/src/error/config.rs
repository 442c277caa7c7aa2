//! Configuration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading, parsing, or persisting the configuration file.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// The configuration file does not exist at the resolved path
    #[error("configuration file not found at {path}")]
    MissingFile { path: String },

    /// The file exists but could not be read
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    /// The file content is not valid TOML for the expected schema
    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    /// Writing the file (or its temporary sibling) failed
    #[error("cannot write {path}: {message}")]
    Write { path: String, message: String },

    /// No platform configuration directory could be resolved
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}
