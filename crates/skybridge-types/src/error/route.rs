//! Connection routing errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the connection router and the per-node operation locks.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum RouteError {
    /// The cloud node did not answer; the caller decides whether to fall back
    /// to the Local cache
    #[error("node {label} unreachable: {reason}")]
    Unreachable { label: String, reason: String },

    /// Another exclusive operation (sync or replication) currently holds this
    /// physical node
    #[error("{operation} already in progress against {endpoint}")]
    OperationInProgress { endpoint: String, operation: String },

    /// The requested node has no entry in the loaded configuration
    #[error("no node configured for label {label}")]
    UnknownNode { label: String },
}

impl RouteError {
    /// Whether waiting and retrying (or falling back to Local) is the right
    /// response, as opposed to fixing configuration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::OperationInProgress { .. }
        )
    }
}
