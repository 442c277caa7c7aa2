//! Full-dataset copy between two cloud nodes.
//!
//! Built for provisioning a fresh Secondary from a healthy Primary, or
//! restoring one node from the other after an incident. The destination is
//! provisioned first, then tables are copied in registry order (parents
//! before children) per a manifest of copy modes, then row counts on both
//! sides are recorded for the operator.
//!
//! A table failure stops the run immediately. Tables copied before the
//! failure stay copied; the run comes back with [`ReplicationError::Partial`]
//! naming the failed table so the inconsistent destination is impossible to
//! miss.

use crate::connection::LiveConnection;
use crate::dialect::placeholders;
use crate::schema::{self, TableDef};
use skybridge_types::{
    CopyMode, PhysicalLabel, ReplicationError, ReplicationRun, ReplicationState,
    ReplicationTableConfig, Result, SqlRow, SqlValue, TableCopy,
};
use tracing::{debug, info, warn};

struct ManifestEntry {
    def: &'static TableDef,
    mode: CopyMode,
}

/// Manifest comes from config, order always from the registry so parent rows
/// land before the rows that reference them. An empty manifest means every
/// registry table with the default mode.
fn resolve_manifest(entries: &[ReplicationTableConfig]) -> Vec<ManifestEntry> {
    if entries.is_empty() {
        return schema::registry()
            .iter()
            .map(|def| ManifestEntry {
                def,
                mode: CopyMode::default(),
            })
            .collect();
    }
    for entry in entries {
        if schema::table(&entry.table).is_none() {
            warn!(table = %entry.table, "unknown table in replication manifest, skipped");
        }
    }
    schema::registry()
        .iter()
        .filter_map(|def| {
            entries
                .iter()
                .find(|e| e.table == def.name)
                .map(|e| ManifestEntry { def, mode: e.mode })
        })
        .collect()
}

#[derive(Default)]
pub struct ReplicationEngine;

impl ReplicationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Copy every manifest table from `source_conn` to `dest_conn`. Errors are
    /// returned only when the run could not start at all; a mid-run failure
    /// comes back as a [`ReplicationRun`] with `halted` set.
    pub async fn replicate(
        &self,
        source: PhysicalLabel,
        source_conn: &LiveConnection,
        destination: PhysicalLabel,
        dest_conn: &LiveConnection,
        manifest: &[ReplicationTableConfig],
    ) -> std::result::Result<ReplicationRun, ReplicationError> {
        if source == destination {
            return Err(ReplicationError::SameEndpoint {
                label: source.as_str().to_string(),
            });
        }
        let mut run = ReplicationRun::begin(source, destination);
        info!(run = %run.id, %source, %destination, "replication starting");

        // A destination that cannot even be provisioned has not been touched
        schema::ensure_schema(dest_conn).await.map_err(|e| {
            ReplicationError::CloudUnavailable {
                label: destination.as_str().to_string(),
                reason: e.to_string(),
            }
        })?;

        for entry in resolve_manifest(manifest) {
            let copy = copy_table(source_conn, dest_conn, entry.def, entry.mode).await;
            let failure = copy.error.clone();
            run.tables.push(copy);
            if let Some(message) = failure {
                return Ok(halt(run, entry.def.name, message));
            }
        }

        run.state = ReplicationState::Verifying;
        for idx in 0..run.tables.len() {
            let table = run.tables[idx].table.clone();
            match table_count(dest_conn, &table).await {
                Ok(n) => run.tables[idx].destination_rows = n,
                Err(e) => {
                    let message = e.to_string();
                    run.tables[idx].error = Some(message.clone());
                    return Ok(halt(run, &table, message));
                }
            }
            if run.tables[idx].destination_rows < run.tables[idx].source_rows {
                warn!(
                    table = %table,
                    source_rows = run.tables[idx].source_rows,
                    destination_rows = run.tables[idx].destination_rows,
                    "destination holds fewer rows than source after copy"
                );
            }
        }

        run.state = ReplicationState::Done;
        info!(run = %run.id, summary = %run.summary(), "replication finished");
        Ok(run)
    }
}

fn halt(mut run: ReplicationRun, table: &str, message: String) -> ReplicationRun {
    let halted = ReplicationError::Partial {
        table: table.to_string(),
        completed: run.completed_tables(),
        message,
    };
    warn!(run = %run.id, error = %halted, "replication halted");
    run.halted = Some(halted);
    run.state = ReplicationState::Failed;
    run
}

/// Copy one table; any failure is captured on the returned [`TableCopy`].
async fn copy_table(
    source: &LiveConnection,
    dest: &LiveConnection,
    def: &'static TableDef,
    mode: CopyMode,
) -> TableCopy {
    let mut copy = TableCopy {
        table: def.name.to_string(),
        mode,
        source_rows: 0,
        destination_rows: 0,
        copied: 0,
        error: None,
    };

    let rows = match source
        .fetch_all(&format!("SELECT * FROM {}", def.name), vec![])
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            copy.error = Some(e.to_string());
            return copy;
        }
    };
    copy.source_rows = rows.len() as u64;

    if mode == CopyMode::Truncate {
        // Cascades take dependent rows with the parents; the children's own
        // manifest entries re-fill them afterwards
        if let Err(e) = dest
            .execute(&format!("DELETE FROM {}", def.name), vec![])
            .await
        {
            copy.error = Some(e.to_string());
            return copy;
        }
    }

    for row in &rows {
        match copy_row(dest, def, row, mode).await {
            Ok(true) => copy.copied += 1,
            Ok(false) => {}
            Err(e) => {
                copy.error = Some(e.to_string());
                return copy;
            }
        }
    }
    debug!(table = def.name, rows = copy.copied, ?mode, "table copied");
    copy
}

/// Land one source row on the destination. `false` means append mode left an
/// existing row untouched.
async fn copy_row(
    dest: &LiveConnection,
    def: &TableDef,
    row: &SqlRow,
    mode: CopyMode,
) -> Result<bool> {
    let pk = row.get(def.primary_key).cloned().unwrap_or(SqlValue::Null);
    match mode {
        CopyMode::Append | CopyMode::Upsert => {
            let rows = dest
                .fetch_all(
                    &format!(
                        "SELECT COUNT(*) AS n FROM {} WHERE {} = $1",
                        def.name, def.primary_key
                    ),
                    vec![pk.clone()],
                )
                .await?;
            let present = rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0) > 0;
            if present {
                if mode == CopyMode::Append {
                    return Ok(false);
                }
                dest.execute(
                    &format!("DELETE FROM {} WHERE {} = $1", def.name, def.primary_key),
                    vec![pk],
                )
                .await?;
            }
        }
        CopyMode::Truncate => {}
    }

    let cols: Vec<&str> = row.columns().iter().map(String::as_str).collect();
    dest.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            def.name,
            cols.join(", "),
            placeholders(cols.len())
        ),
        row.values().to_vec(),
    )
    .await?;
    Ok(true)
}

async fn table_count(conn: &LiveConnection, table: &str) -> Result<u64> {
    let rows = conn
        .fetch_all(&format!("SELECT COUNT(*) AS n FROM {table}"), vec![])
        .await?;
    Ok(rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0) as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn node(dir: &tempfile::TempDir, file: &str, provision: bool) -> LiveConnection {
        let conn = LiveConnection::sqlite_file(&dir.path().join(file)).unwrap();
        if provision {
            schema::ensure_schema(&conn).await.unwrap();
        }
        conn
    }

    async fn insert_asset(conn: &LiveConnection, id: i64, name: &str) {
        conn.execute(
            "INSERT INTO assets (id, name, type, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4)",
            vec![
                id.into(),
                name.into(),
                "Hardware".into(),
                "2026-02-01 08:00:00".into(),
            ],
        )
        .await
        .unwrap();
    }

    async fn count(conn: &LiveConnection, table: &str) -> u64 {
        table_count(conn, table).await.unwrap()
    }

    fn manifest(table: &str, mode: CopyMode) -> Vec<ReplicationTableConfig> {
        vec![ReplicationTableConfig {
            table: table.to_string(),
            mode,
        }]
    }

    #[tokio::test]
    async fn test_fresh_destination_matches_source_counts() {
        let dir = tempfile::tempdir().unwrap();
        let source = node(&dir, "source.db", true).await;
        // Destination starts as a bare file; the engine provisions it
        let dest = node(&dir, "dest.db", false).await;

        insert_asset(&source, 1, "Mail Server").await;
        insert_asset(&source, 2, "Firewall").await;
        source
            .execute(
                "INSERT INTO tickets (asset_id, title, logged_by, created_at) \
                 VALUES ($1, $2, $3, $4)",
                vec![
                    1.into(),
                    "Mailbox full".into(),
                    "alice".into(),
                    "2026-03-01 10:00:00".into(),
                ],
            )
            .await
            .unwrap();
        source
            .execute(
                "INSERT INTO policies (name, created_at) VALUES ($1, $2)",
                vec!["Acceptable Use".into(), "2026-02-01 08:00:00".into()],
            )
            .await
            .unwrap();

        let run = ReplicationEngine::new()
            .replicate(PhysicalLabel::Hostek, &source, PhysicalLabel::Vps, &dest, &[])
            .await
            .unwrap();

        assert_eq!(run.state, ReplicationState::Done);
        assert!(run.halted.is_none());
        assert_eq!(run.tables.len(), schema::registry().len());
        for copy in &run.tables {
            assert_eq!(
                copy.destination_rows, copy.source_rows,
                "{} counts diverged",
                copy.table
            );
        }
        assert_eq!(run.total_copied(), 4);
        assert_eq!(count(&dest, "assets").await, 2);
        assert_eq!(count(&dest, "tickets").await, 1);
    }

    #[tokio::test]
    async fn test_same_endpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = node(&dir, "a.db", true).await;
        let b = node(&dir, "b.db", true).await;

        let err = ReplicationEngine::new()
            .replicate(PhysicalLabel::Vps, &a, PhysicalLabel::Vps, &b, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::SameEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_append_leaves_existing_rows_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let source = node(&dir, "source.db", true).await;
        let dest = node(&dir, "dest.db", true).await;

        insert_asset(&dest, 1, "Kept").await;
        insert_asset(&source, 1, "Incoming").await;
        insert_asset(&source, 2, "Missing On Dest").await;

        let run = ReplicationEngine::new()
            .replicate(
                PhysicalLabel::Hostek,
                &source,
                PhysicalLabel::Vps,
                &dest,
                &manifest("assets", CopyMode::Append),
            )
            .await
            .unwrap();

        assert_eq!(run.state, ReplicationState::Done);
        assert_eq!(run.tables[0].copied, 1);
        assert_eq!(run.tables[0].destination_rows, 2);

        let names = dest
            .fetch_all("SELECT name FROM assets ORDER BY id", vec![])
            .await
            .unwrap();
        assert_eq!(names[0].get_text("name"), Some("Kept"));
        assert_eq!(names[1].get_text("name"), Some("Missing On Dest"));
    }

    #[tokio::test]
    async fn test_truncate_leaves_exactly_the_source_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = node(&dir, "source.db", true).await;
        let dest = node(&dir, "dest.db", true).await;

        insert_asset(&dest, 5, "Stale A").await;
        insert_asset(&dest, 6, "Stale B").await;
        insert_asset(&source, 1, "Fresh").await;

        let run = ReplicationEngine::new()
            .replicate(
                PhysicalLabel::Hostek,
                &source,
                PhysicalLabel::Vps,
                &dest,
                &manifest("assets", CopyMode::Truncate),
            )
            .await
            .unwrap();

        assert_eq!(run.state, ReplicationState::Done);
        let rows = dest.fetch_all("SELECT id FROM assets", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("id"), Some(1));
    }

    #[tokio::test]
    async fn test_upsert_replaces_matching_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = node(&dir, "source.db", true).await;
        let dest = node(&dir, "dest.db", true).await;

        insert_asset(&dest, 1, "Stale").await;
        insert_asset(&dest, 9, "Dest Only").await;
        insert_asset(&source, 1, "Fresh").await;

        let run = ReplicationEngine::new()
            .replicate(
                PhysicalLabel::Hostek,
                &source,
                PhysicalLabel::Vps,
                &dest,
                &manifest("assets", CopyMode::Upsert),
            )
            .await
            .unwrap();

        assert_eq!(run.state, ReplicationState::Done);
        assert_eq!(run.tables[0].copied, 1);

        let rows = dest
            .fetch_all("SELECT id, name FROM assets ORDER BY id", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_text("name"), Some("Fresh"));
        assert_eq!(rows[1].get_text("name"), Some("Dest Only"));
    }

    #[tokio::test]
    async fn test_failed_table_halts_with_partial_detail() {
        let dir = tempfile::tempdir().unwrap();
        // Source is missing the problems table; everything before it copies
        let source = node(&dir, "source.db", false).await;
        for def in schema::registry() {
            if def.name != "problems" {
                source.execute(def.ddl, vec![]).await.unwrap();
            }
        }
        insert_asset(&source, 1, "Mail Server").await;
        let dest = node(&dir, "dest.db", false).await;

        let run = ReplicationEngine::new()
            .replicate(PhysicalLabel::Hostek, &source, PhysicalLabel::Vps, &dest, &[])
            .await
            .unwrap();

        assert_eq!(run.state, ReplicationState::Failed);
        match run.halted {
            Some(ReplicationError::Partial {
                ref table,
                ref completed,
                ..
            }) => {
                assert_eq!(table, "problems");
                assert!(completed.contains(&"assets".to_string()));
            }
            ref other => panic!("expected partial failure, got {other:?}"),
        }
        // Progress before the failure is kept, later tables were never reached
        assert_eq!(count(&dest, "assets").await, 1);
        assert_eq!(count(&dest, "tickets").await, 0);
    }
}
