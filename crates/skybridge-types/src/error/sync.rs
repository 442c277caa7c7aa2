//! Sync and replication engine errors.

use crate::models::SyncPhase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a sync run.
///
/// Per-record problems are not errors at this level; they are captured in the
/// run's outcome log and only counted. These variants describe the run itself
/// halting.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum SyncError {
    /// Another sync run already holds the Local cache
    #[error("a sync run is already in progress for this cache")]
    AlreadyRunning,

    /// The resolved cloud node could not be reached, so no phase started
    #[error("cloud node {label} unavailable before sync started: {reason}")]
    CloudUnavailable { label: String, reason: String },

    /// A phase failed mid-run; completed phases keep their progress and the
    /// run is safe to repeat
    #[error("sync halted during {phase:?}: {message}")]
    PhaseFailed { phase: SyncPhase, message: String },
}

/// Errors that abort or degrade a replication run.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ReplicationError {
    /// Source and destination resolve to the same physical endpoint
    #[error("source and destination are the same node ({label})")]
    SameEndpoint { label: String },

    /// One side of the copy could not be reached before any table was touched
    #[error("node {label} unavailable before replication started: {reason}")]
    CloudUnavailable { label: String, reason: String },

    /// Some tables copied and then one failed, leaving the destination
    /// inconsistent. Must be surfaced prominently; requires manual remediation
    #[error("replication partial: table {table} failed after {} table(s) copied: {message}", completed.len())]
    Partial {
        table: String,
        completed: Vec<String>,
        message: String,
    },
}

impl ReplicationError {
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_display_counts_completed_tables() {
        let err = ReplicationError::Partial {
            table: "tickets".to_string(),
            completed: vec!["assets".to_string(), "policies".to_string()],
            message: "connection reset".to_string(),
        };

        let msg = format!("{err}");
        assert!(msg.contains("tickets"));
        assert!(msg.contains("2 table(s)"));
    }

    #[test]
    fn test_phase_failed_names_phase() {
        let err = SyncError::PhaseFailed {
            phase: SyncPhase::Pull,
            message: "cloud went away".to_string(),
        };
        assert!(format!("{err}").contains("Pull"));
    }
}
