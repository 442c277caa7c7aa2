//! Identity store errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the identity store adapter.
///
/// `AuthFailure` is always surfaced to the caller and never retried
/// automatically; a wrong password must not look like a transient outage.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum IdentityError {
    /// Credentials did not verify. The message stays generic on purpose
    #[error("authentication failed for {username}")]
    AuthFailure { username: String },

    /// No account with this username exists on the identity node
    #[error("account {username} not found")]
    NotFound { username: String },

    /// An account with this username already exists
    #[error("account {username} already exists")]
    AlreadyExists { username: String },

    /// The built-in administrator account cannot be removed
    #[error("account {username} is protected and cannot be deleted")]
    ProtectedAccount { username: String },

    /// Password hashing or hash parsing failed
    #[error("password hash error: {message}")]
    Hash { message: String },

    /// The identity node's storage rejected the operation
    #[error("identity store error: {message}")]
    Store { message: String },
}
