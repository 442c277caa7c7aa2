//! Tunnel lifecycle errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while opening or running a forwarding tunnel.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum TunnelError {
    /// Every candidate local port was already taken; callers treat this as
    /// "remote node unreachable", not as a fatal error
    #[error("no local forwarding port could be bound for {endpoint} after {attempts} attempts")]
    BindExhausted { endpoint: String, attempts: u32 },

    /// TCP connect to the secure-shell host did not complete in time
    #[error("connect to {host}:{port} timed out after {timeout_secs}s")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout_secs: u64,
    },

    /// Secure-shell handshake failed after the TCP connect succeeded
    #[error("handshake with {host} failed: {message}")]
    Handshake { host: String, message: String },

    /// The secure-shell server rejected the configured credentials
    #[error("authentication to {host} rejected: {message}")]
    Auth { host: String, message: String },

    /// Socket-level failure while binding or forwarding
    #[error("tunnel I/O error: {message}")]
    Io { message: String },
}

impl TunnelError {
    /// Whether a later retry has a reasonable chance of succeeding without
    /// operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BindExhausted { .. } | Self::ConnectTimeout { .. } | Self::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let exhausted = TunnelError::BindExhausted {
            endpoint: "74.208.225.182:3306".to_string(),
            attempts: 5,
        };
        let auth = TunnelError::Auth {
            host: "74.208.225.182".to_string(),
            message: "all authentication methods failed".to_string(),
        };

        assert!(exhausted.is_transient());
        assert!(!auth.is_transient());
    }
}
