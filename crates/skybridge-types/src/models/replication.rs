//! Replication run bookkeeping.

use crate::error::ReplicationError;
use crate::models::node::PhysicalLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one table's rows land on the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Delete every destination row, then insert all source rows
    Truncate,
    /// Replace destination rows whose primary key matches, insert the rest
    #[default]
    Upsert,
    /// Insert only rows whose primary key is absent; never touch existing
    /// rows (the add-missing restore mode)
    Append,
}

impl CopyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncate => "truncate",
            Self::Upsert => "upsert",
            Self::Append => "append",
        }
    }
}

impl std::fmt::Display for CopyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replication run state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicationState {
    Copying,
    Verifying,
    Done,
    Failed,
}

/// Per-table result within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCopy {
    pub table: String,
    pub mode: CopyMode,
    pub source_rows: u64,
    pub destination_rows: u64,
    pub copied: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One invocation of the replication engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationRun {
    pub id: Uuid,
    pub source: PhysicalLabel,
    pub destination: PhysicalLabel,
    pub started_at: DateTime<Utc>,
    pub state: ReplicationState,
    pub tables: Vec<TableCopy>,
    /// Set when the run halted; names the failed table and what had copied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<ReplicationError>,
}

impl ReplicationRun {
    pub fn begin(source: PhysicalLabel, destination: PhysicalLabel) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            destination,
            started_at: Utc::now(),
            state: ReplicationState::Copying,
            tables: Vec::new(),
            halted: None,
        }
    }

    pub fn total_copied(&self) -> u64 {
        self.tables.iter().map(|t| t.copied).sum()
    }

    /// Table names that completed before a failure, in copy order.
    pub fn completed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.error.is_none())
            .map(|t| t.table.clone())
            .collect()
    }

    /// One-line operator summary.
    pub fn summary(&self) -> String {
        format!(
            "{} -> {}: {} table(s), {} row(s) copied",
            self.source,
            self.destination,
            self.tables.len(),
            self.total_copied()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_tables_excludes_failed() {
        let mut run = ReplicationRun::begin(PhysicalLabel::Hostek, PhysicalLabel::Vps);
        run.tables.push(TableCopy {
            table: "assets".to_string(),
            mode: CopyMode::Upsert,
            source_rows: 10,
            destination_rows: 10,
            copied: 10,
            error: None,
        });
        run.tables.push(TableCopy {
            table: "tickets".to_string(),
            mode: CopyMode::Upsert,
            source_rows: 5,
            destination_rows: 0,
            copied: 0,
            error: Some("connection reset".to_string()),
        });

        assert_eq!(run.completed_tables(), vec!["assets".to_string()]);
        assert_eq!(run.total_copied(), 10);
    }

    #[test]
    fn test_copy_mode_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&CopyMode::Append).unwrap(), "\"append\"");
    }
}
