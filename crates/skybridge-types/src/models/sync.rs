//! Sync run bookkeeping.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a sync run currently is, or how it ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncPhase {
    Push,
    Reconcile,
    Pull,
    Done,
    Failed,
}

/// Per-record sync lifecycle, stored in the Local cache as text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Created locally, cloud has never seen it
    Unsynced,
    /// Inserted on cloud this run, key rewrite still pending
    Pushed,
    /// Local and cloud agree on this record's key
    Reconciled,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Pushed => "pushed",
            Self::Reconciled => "reconciled",
        }
    }
}

/// What happened to one record during a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Inserted on cloud, new key assigned
    Pushed,
    /// Natural key already existed on cloud; nothing inserted
    Duplicate,
    /// Local key (and dependent foreign keys) rewritten to the cloud key
    Reconciled,
    /// Upserted into Local from cloud
    Pulled,
    /// Record-level failure; the run continued
    Error,
}

/// One line of the per-record outcome log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub entity: String,
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_key: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_key: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One invocation of the sync engine. Surfaced to the caller when the run
/// finishes (or halts); not persisted as a first-class entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phase: SyncPhase,
    pub pushed: u64,
    pub duplicates: u64,
    pub pulled: u64,
    pub errors: u64,
    pub outcomes: Vec<SyncOutcome>,
    /// Set when the run halted mid-phase; completed phases keep their progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<SyncError>,
}

impl SyncRun {
    pub fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: SyncPhase::Push,
            pushed: 0,
            duplicates: 0,
            pulled: 0,
            errors: 0,
            outcomes: Vec::new(),
            halted: None,
        }
    }

    /// Append an outcome and bump the matching counter.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome.kind {
            OutcomeKind::Pushed => self.pushed += 1,
            OutcomeKind::Duplicate => self.duplicates += 1,
            OutcomeKind::Pulled => self.pulled += 1,
            OutcomeKind::Error => self.errors += 1,
            OutcomeKind::Reconciled => {}
        }
        self.outcomes.push(outcome);
    }

    /// One-line operator summary.
    pub fn summary(&self) -> String {
        format!(
            "pushed {} (duplicates {}), pulled {}, errors {}",
            self.pushed, self.duplicates, self.pulled, self.errors
        )
    }

    pub fn is_clean(&self) -> bool {
        self.phase == SyncPhase::Done && self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind) -> SyncOutcome {
        SyncOutcome {
            entity: "tickets".to_string(),
            kind,
            local_key: Some(1),
            cloud_key: Some(42),
            detail: None,
        }
    }

    #[test]
    fn test_record_bumps_counters() {
        let mut run = SyncRun::begin();
        run.record(outcome(OutcomeKind::Pushed));
        run.record(outcome(OutcomeKind::Duplicate));
        run.record(outcome(OutcomeKind::Reconciled));
        run.record(outcome(OutcomeKind::Pulled));
        run.record(outcome(OutcomeKind::Error));

        assert_eq!(run.pushed, 1);
        assert_eq!(run.duplicates, 1);
        assert_eq!(run.pulled, 1);
        assert_eq!(run.errors, 1);
        assert_eq!(run.outcomes.len(), 5);
    }

    #[test]
    fn test_summary_mentions_all_counts() {
        let mut run = SyncRun::begin();
        run.record(outcome(OutcomeKind::Pushed));
        let text = run.summary();
        assert!(text.contains("pushed 1"));
        assert!(text.contains("errors 0"));
    }
}
