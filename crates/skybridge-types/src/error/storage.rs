//! Storage engine errors.

use crate::models::Dialect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the underlying database engines, already stripped of
/// driver-specific types so they can cross the facade boundary.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum StorageError {
    /// Statement execution failed on the target engine
    #[error("{dialect} query failed: {message}")]
    Query { dialect: Dialect, message: String },

    /// A unique/primary key constraint fired. Push absorbs these via its
    /// natural-key check; anywhere else they indicate a real conflict
    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },

    /// A result column could not be decoded into a supported value class
    #[error("cannot decode column {column}: {message}")]
    Decode { column: String, message: String },

    /// Connection pool construction or checkout failed
    #[error("pool error: {message}")]
    Pool { message: String },

    /// Filesystem-level failure on the embedded store
    #[error("storage I/O error: {message}")]
    Io { message: String },
}

impl StorageError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
