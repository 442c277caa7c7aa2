//! Typed error definitions for Skybridge.
//!
//! This module provides a structured error hierarchy with specific error types
//! for each domain of the core. All errors are designed to be:
//!
//! - **Serializable** for operator-facing summaries via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for fallback/retry decisions via enum variants
//! - **Composable** via thiserror derive macros

mod config;
mod dialect;
mod identity;
mod route;
mod storage;
mod sync;
mod tunnel;

pub use config::ConfigError;
pub use dialect::DialectError;
pub use identity::IdentityError;
pub use route::RouteError;
pub use storage::StorageError;
pub use sync::{ReplicationError, SyncError};
pub use tunnel::TunnelError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific errors.
///
/// Use this at the facade and CLI boundary when a single error type must
/// represent any Skybridge failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "domain", content = "error")]
pub enum CoreError {
    /// Wraps a dialect translation error
    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),

    /// Wraps a tunnel lifecycle error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Wraps a connection routing error
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    /// Wraps a storage engine error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Wraps a sync engine error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Wraps a replication engine error
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    /// Wraps an identity store error
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Wraps a configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Whether the failure is expected to clear on its own (retry later,
    /// fall back to Local in the meantime).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Tunnel(e) => e.is_transient(),
            Self::Route(e) => e.is_transient(),
            Self::Sync(SyncError::CloudUnavailable { .. }) => true,
            Self::Replication(ReplicationError::CloudUnavailable { .. }) => true,
            _ => false,
        }
    }

    /// Whether the operation completed some work before failing, leaving
    /// state an operator must inspect (sync phase halt, partial replication).
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::Replication(ReplicationError::Partial { .. })
                | Self::Sync(SyncError::PhaseFailed { .. })
        )
    }

    /// Process exit code for the CLI: 2 for partial success with detail,
    /// 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        if self.is_partial() {
            2
        } else {
            1
        }
    }
}

/// Standard Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = CoreError::Route(RouteError::Unreachable {
            label: "VPS".to_string(),
            reason: "connect timeout".to_string(),
        });

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Route"));
        assert!(json.contains("connect timeout"));

        let deserialized: CoreError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_recoverable_classification() {
        let unreachable = CoreError::Route(RouteError::Unreachable {
            label: "Hostek".to_string(),
            reason: "refused".to_string(),
        });
        let auth = CoreError::Identity(IdentityError::AuthFailure {
            username: "alice".to_string(),
        });

        assert!(unreachable.is_recoverable());
        assert!(!auth.is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        let partial = CoreError::Replication(ReplicationError::Partial {
            table: "tickets".to_string(),
            completed: vec!["assets".to_string()],
            message: "copy failed".to_string(),
        });
        let config = CoreError::Config(ConfigError::MissingFile {
            path: "/tmp/skybridge.toml".to_string(),
        });

        assert_eq!(partial.exit_code(), 2);
        assert_eq!(config.exit_code(), 1);
    }
}
