//! Three-phase synchronization between the Local cache and the cloud.
//!
//! A run is Push, then Reconcile, then Pull:
//!
//! - **Push** walks every registry table for records still unsynced (or left
//!   half-pushed by an interrupted run) and lands them on the cloud node,
//!   matching by composite natural key so the same record is never inserted
//!   twice no matter which side minted it first.
//! - **Reconcile** rewrites locally-minted keys to the cloud-assigned ones,
//!   carrying dependent link columns (an attachment follows its ticket).
//! - **Pull** upserts cloud records into the cache, incrementally where the
//!   table has a modified-at column and a watermark exists, by full scan
//!   otherwise. Pull never deletes local records.
//!
//! A phase failure halts the run at that phase; progress from completed
//! phases is kept and the run is safe to repeat. Per-record failures are
//! recorded in the run's outcome log and do not halt anything.
//!
//! The caller resolves the cloud connection (and maps resolution failures to
//! [`SyncError::CloudUnavailable`]); the engine only speaks to the two
//! connections it is handed.


use crate::connection::LiveConnection;
use crate::dialect::placeholders;
use crate::local::LocalStore;
use crate::schema::{self, KeyKind, TableDef};
use skybridge_types::{
    CoreError, OutcomeKind, Result, SqlRow, SqlValue, SyncError, SyncOutcome, SyncPhase, SyncRun,
    SyncState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One key rewrite owed to the Reconcile phase.
struct KeyRemap {
    def: &'static TableDef,
    old: i64,
    new: i64,
}

/// Rewrites accumulated during Push, in registry (parents-first) order.
/// Lookups let a child row's link columns be translated into cloud key space
/// before the child itself is probed or inserted.
#[derive(Default)]
struct RemapSet {
    ordered: Vec<KeyRemap>,
    by_table: HashMap<&'static str, HashMap<i64, i64>>,
}

impl RemapSet {
    fn insert(&mut self, def: &'static TableDef, old: i64, new: i64) {
        self.by_table.entry(def.name).or_default().insert(old, new);
        self.ordered.push(KeyRemap { def, old, new });
    }

    fn lookup(&self, parent: &str, old: i64) -> Option<i64> {
        self.by_table.get(parent).and_then(|m| m.get(&old)).copied()
    }
}

enum PushProbe {
    Inserted(i64),
    AlreadyPresent(i64),
}

pub struct SyncEngine {
    local: Arc<LocalStore>,
}

impl SyncEngine {
    pub fn new(local: Arc<LocalStore>) -> Self {
        Self { local }
    }

    /// Run all three phases against `cloud`. `pull_entities` narrows the Pull
    /// scope; an empty list means every registry table. Errors are returned
    /// only when the run could not start at all; a mid-run halt comes back as
    /// a [`SyncRun`] with `halted` set.
    pub async fn run(
        &self,
        cloud: &LiveConnection,
        pull_entities: &[String],
    ) -> std::result::Result<SyncRun, SyncError> {
        let _slot = self.local.try_begin_sync()?;
        let mut run = SyncRun::begin();
        let stamp = run.started_at.format("%Y-%m-%d %H:%M:%S").to_string();
        info!(run = %run.id, "sync starting");

        let mut remaps = RemapSet::default();
        {
            let _gate = self.local.begin_phase().await;
            debug!(run = %run.id, "push phase");
            if let Err(message) = self.push(cloud, &mut run, &mut remaps).await {
                return Ok(halt(run, SyncPhase::Push, message));
            }
        }

        run.phase = SyncPhase::Reconcile;
        {
            let _gate = self.local.begin_phase().await;
            debug!(run = %run.id, rewrites = remaps.ordered.len(), "reconcile phase");
            self.reconcile(&mut run, &remaps).await;
        }

        run.phase = SyncPhase::Pull;
        let mut clean_entities = Vec::new();
        {
            let _gate = self.local.begin_phase().await;
            debug!(run = %run.id, "pull phase");
            if let Err(message) = self
                .pull(cloud, &mut run, pull_entities, &mut clean_entities)
                .await
            {
                return Ok(halt(run, SyncPhase::Pull, message));
            }
        }

        // Watermarks advance to the run's start time, and only for entities
        // whose pull recorded no failures; anything skipped here is simply
        // re-fetched next run.
        if let Err(e) = self
            .local
            .set_watermarks(clean_entities.iter().copied(), &stamp)
            .await
        {
            return Ok(halt(run, SyncPhase::Pull, e.to_string()));
        }

        run.phase = SyncPhase::Done;
        info!(run = %run.id, summary = %run.summary(), "sync finished");
        Ok(run)
    }

    /// Push every unsynced (or half-pushed) record to the cloud, table by
    /// table in registry order so parent keys are known before children need
    /// them. Fails at phase level only when the local cache itself cannot be
    /// read.
    async fn push(
        &self,
        cloud: &LiveConnection,
        run: &mut SyncRun,
        remaps: &mut RemapSet,
    ) -> std::result::Result<(), String> {
        let local = self.local.connection();
        for def in schema::registry() {
            let rows = local
                .fetch_all(
                    &format!("SELECT * FROM {} WHERE sync_state IN ($1, $2)", def.name),
                    vec![
                        SyncState::Unsynced.as_str().into(),
                        SyncState::Pushed.as_str().into(),
                    ],
                )
                .await
                .map_err(|e| e.to_string())?;
            for row in rows {
                match def.key {
                    KeyKind::AutoId => {
                        self.push_auto_id(cloud, &local, def, &row, run, remaps).await;
                    }
                    KeyKind::Natural => {
                        self.push_natural(cloud, &local, def, &row, run).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn push_auto_id(
        &self,
        cloud: &LiveConnection,
        local: &LiveConnection,
        def: &'static TableDef,
        row: &SqlRow,
        run: &mut SyncRun,
        remaps: &mut RemapSet,
    ) {
        let Some(local_id) = row.get_i64(def.primary_key) else {
            run.record(record_error(
                def.name,
                None,
                "row has no integer primary key",
            ));
            return;
        };
        match push_one(cloud, def, row, remaps).await {
            Ok(PushProbe::Inserted(cloud_id)) => {
                // Marked half-way so an interrupted run can pick it back up
                if let Err(e) = mark_state(local, def, &local_id.into(), SyncState::Pushed).await {
                    warn!(table = def.name, local_id, error = %e, "pushed-state mark failed");
                }
                run.record(SyncOutcome {
                    entity: def.name.to_string(),
                    kind: OutcomeKind::Pushed,
                    local_key: Some(local_id),
                    cloud_key: Some(cloud_id),
                    detail: None,
                });
                remaps.insert(def, local_id, cloud_id);
            }
            Ok(PushProbe::AlreadyPresent(cloud_id)) => {
                run.record(SyncOutcome {
                    entity: def.name.to_string(),
                    kind: OutcomeKind::Duplicate,
                    local_key: Some(local_id),
                    cloud_key: Some(cloud_id),
                    detail: None,
                });
                remaps.insert(def, local_id, cloud_id);
            }
            Err(e) => run.record(record_error(def.name, Some(local_id), &e.to_string())),
        }
    }

    /// Identity-keyed tables carry the same key on every node, so there is
    /// nothing to remap: present-or-insert, then straight to reconciled.
    async fn push_natural(
        &self,
        cloud: &LiveConnection,
        local: &LiveConnection,
        def: &'static TableDef,
        row: &SqlRow,
        run: &mut SyncRun,
    ) {
        let key = row.get(def.primary_key).cloned().unwrap_or(SqlValue::Null);
        let detail = row.get_text(def.primary_key).map(str::to_string);
        let no_remaps = RemapSet::default();

        let kind = match find_by_natural_key(cloud, def, row, &no_remaps).await {
            Ok(Some(_)) => OutcomeKind::Duplicate,
            Ok(None) => {
                let (statement, binds) = push_insert(def, row, &no_remaps);
                match cloud.execute(&statement, binds).await {
                    Ok(_) => OutcomeKind::Pushed,
                    Err(ref e) if is_duplicate(e) => OutcomeKind::Duplicate,
                    Err(e) => {
                        run.record(record_error(def.name, None, &e.to_string()));
                        return;
                    }
                }
            }
            Err(e) => {
                run.record(record_error(def.name, None, &e.to_string()));
                return;
            }
        };

        if let Err(e) = mark_state(local, def, &key, SyncState::Reconciled).await {
            run.record(record_error(def.name, None, &e.to_string()));
            return;
        }
        run.record(SyncOutcome {
            entity: def.name.to_string(),
            kind,
            local_key: None,
            cloud_key: None,
            detail,
        });
    }

    /// Apply every key rewrite owed from Push. Collisions (the target key is
    /// already occupied locally) are recorded and skipped; the record stays
    /// half-pushed and is retried once the occupying row has itself moved on.
    async fn reconcile(&self, run: &mut SyncRun, remaps: &RemapSet) {
        let local = self.local.connection();
        for remap in &remaps.ordered {
            let def = remap.def;
            if remap.old != remap.new {
                let occupied = match local
                    .fetch_all(
                        &format!(
                            "SELECT COUNT(*) AS n FROM {} WHERE {} = $1",
                            def.name, def.primary_key
                        ),
                        vec![remap.new.into()],
                    )
                    .await
                {
                    Ok(rows) => rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0) > 0,
                    Err(e) => {
                        run.record(record_error(def.name, Some(remap.old), &e.to_string()));
                        continue;
                    }
                };
                if occupied {
                    run.record(SyncOutcome {
                        entity: def.name.to_string(),
                        kind: OutcomeKind::Error,
                        local_key: Some(remap.old),
                        cloud_key: Some(remap.new),
                        detail: Some("cloud key already occupied locally, left for a later run".to_string()),
                    });
                    continue;
                }
                if let Err(e) = self.local.rewrite_key(def, remap.old, remap.new) {
                    run.record(record_error(def.name, Some(remap.old), &e.to_string()));
                    continue;
                }
                run.record(SyncOutcome {
                    entity: def.name.to_string(),
                    kind: OutcomeKind::Reconciled,
                    local_key: Some(remap.old),
                    cloud_key: Some(remap.new),
                    detail: None,
                });
            }
            if let Err(e) = mark_state(&local, def, &remap.new.into(), SyncState::Reconciled).await
            {
                run.record(record_error(def.name, Some(remap.new), &e.to_string()));
            }
        }
    }

    /// Upsert cloud records into the cache. Fails at phase level when a
    /// table's cloud fetch fails; individual row problems are recorded and
    /// the table keeps going.
    async fn pull(
        &self,
        cloud: &LiveConnection,
        run: &mut SyncRun,
        pull_entities: &[String],
        clean_entities: &mut Vec<&'static str>,
    ) -> std::result::Result<(), String> {
        let local = self.local.connection();
        for def in pull_scope(pull_entities) {
            let errors_before = run.errors;
            let since = self
                .local
                .watermark(def.name)
                .await
                .map_err(|e| e.to_string())?;
            let rows = match (since, def.modified_col) {
                (Some(ts), Some(col)) => {
                    cloud
                        .fetch_all(
                            &format!("SELECT * FROM {} WHERE {} > $1", def.name, col),
                            vec![ts.into()],
                        )
                        .await
                }
                _ => cloud.fetch_all(&format!("SELECT * FROM {}", def.name), vec![]).await,
            }
            .map_err(|e| e.to_string())?;

            for row in &rows {
                match pull_one(&local, def, row).await {
                    Ok(Some(outcome)) => run.record(outcome),
                    Ok(None) => {}
                    Err(e) => run.record(record_error(def.name, None, &e.to_string())),
                }
            }
            if run.errors == errors_before {
                clean_entities.push(def.name);
            }
        }
        Ok(())
    }
}

fn halt(mut run: SyncRun, phase: SyncPhase, message: String) -> SyncRun {
    warn!(?phase, %message, "sync halted");
    run.halted = Some(SyncError::PhaseFailed { phase, message });
    run.phase = SyncPhase::Failed;
    run
}

fn record_error(entity: &str, key: Option<i64>, detail: &str) -> SyncOutcome {
    warn!(entity, ?key, detail, "sync record failure");
    SyncOutcome {
        entity: entity.to_string(),
        kind: OutcomeKind::Error,
        local_key: key,
        cloud_key: None,
        detail: Some(detail.to_string()),
    }
}

fn is_duplicate(err: &CoreError) -> bool {
    matches!(err, CoreError::Storage(s) if s.is_duplicate_key())
}

/// Pull scope comes from config, order always from the registry so parents
/// land before the rows that reference them.
fn pull_scope(entities: &[String]) -> Vec<&'static TableDef> {
    if entities.is_empty() {
        return schema::registry().iter().collect();
    }
    for name in entities {
        if schema::table(name).is_none() {
            warn!(entity = %name, "unknown pull entity in config, skipped");
        }
    }
    schema::registry()
        .iter()
        .filter(|def| entities.iter().any(|e| e == def.name))
        .collect()
}

/// Translate a link column into cloud key space when its parent was remapped
/// this run; keys of already-reconciled parents pass through unchanged.
fn mapped_value(def: &TableDef, column: &str, value: &SqlValue, remaps: &RemapSet) -> SqlValue {
    if let Some(link) = def.links.iter().find(|l| l.column == column) {
        if let Some(old) = value.as_i64() {
            if let Some(new) = remaps.lookup(link.parent, old) {
                return SqlValue::Integer(new);
            }
        }
    }
    value.clone()
}

/// The row on `conn` matching `row`'s composite natural key, if any.
async fn find_by_natural_key(
    conn: &LiveConnection,
    def: &TableDef,
    row: &SqlRow,
    remaps: &RemapSet,
) -> Result<Option<SqlRow>> {
    let mut clauses = Vec::with_capacity(def.natural_key.len());
    let mut binds = Vec::with_capacity(def.natural_key.len());
    for (idx, col) in def.natural_key.iter().enumerate() {
        clauses.push(format!("{col} = ${}", idx + 1));
        let value = row.get(col).cloned().unwrap_or(SqlValue::Null);
        binds.push(mapped_value(def, col, &value, remaps));
    }
    let statement = format!(
        "SELECT * FROM {} WHERE {}",
        def.name,
        clauses.join(" AND ")
    );
    Ok(conn.fetch_all(&statement, binds).await?.into_iter().next())
}

/// Probe-then-insert for one auto-id record, absorbing the duplicate-key race
/// where the same natural key lands on the cloud between probe and insert.
async fn push_one(
    cloud: &LiveConnection,
    def: &'static TableDef,
    row: &SqlRow,
    remaps: &RemapSet,
) -> Result<PushProbe> {
    let cloud_id_of = |found: &SqlRow| found.get_i64(def.primary_key);
    if let Some(found) = find_by_natural_key(cloud, def, row, remaps).await? {
        return match cloud_id_of(&found) {
            Some(id) => Ok(PushProbe::AlreadyPresent(id)),
            None => Err(CoreError::Storage(skybridge_types::StorageError::Decode {
                column: def.primary_key.to_string(),
                message: "cloud row carries no integer key".to_string(),
            })),
        };
    }

    let (statement, binds) = push_insert(def, row, remaps);
    match cloud.insert_returning_id(&statement, binds).await {
        Ok(id) => Ok(PushProbe::Inserted(id)),
        Err(e) if is_duplicate(&e) => {
            match find_by_natural_key(cloud, def, row, remaps).await? {
                Some(found) => match cloud_id_of(&found) {
                    Some(id) => Ok(PushProbe::AlreadyPresent(id)),
                    None => Err(e),
                },
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// INSERT mirroring the local row's columns, link columns remapped; the
/// engine-assigned key is left out for the cloud to mint on auto-id tables.
fn push_insert(def: &TableDef, row: &SqlRow, remaps: &RemapSet) -> (String, Vec<SqlValue>) {
    let skip_pk = def.key == KeyKind::AutoId;
    let mut cols = Vec::new();
    let mut binds = Vec::new();
    for (col, value) in row.columns().iter().zip(row.values()) {
        if col.as_str() == "sync_state" || (skip_pk && col.as_str() == def.primary_key) {
            continue;
        }
        cols.push(col.as_str());
        binds.push(mapped_value(def, col, value, remaps));
    }
    let statement = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        def.name,
        cols.join(", "),
        placeholders(cols.len())
    );
    (statement, binds)
}

/// Upsert one cloud row into the cache by natural key. `None` means the local
/// copy is already current (idempotent pull).
async fn pull_one(
    local: &LiveConnection,
    def: &'static TableDef,
    cloud_row: &SqlRow,
) -> Result<Option<SyncOutcome>> {
    let no_remaps = RemapSet::default();
    match find_by_natural_key(local, def, cloud_row, &no_remaps).await? {
        None => {
            let (statement, binds) = pull_insert(def, cloud_row);
            match local.execute(&statement, binds).await {
                Ok(_) => Ok(Some(pulled_outcome(def, cloud_row))),
                Err(ref e) if is_duplicate(e) => Ok(Some(record_error(
                    def.name,
                    cloud_row.get_i64(def.primary_key),
                    "authoritative key occupied by an unsynced local record",
                ))),
                Err(e) => Err(e),
            }
        }
        Some(existing) => {
            let mut sets = Vec::new();
            let mut binds = Vec::new();
            for (col, value) in cloud_row.columns().iter().zip(cloud_row.values()) {
                if col.as_str() == def.primary_key || col.as_str() == "sync_state" {
                    continue;
                }
                if existing.get(col) == Some(value) {
                    continue;
                }
                sets.push(format!("{col} = ${}", binds.len() + 1));
                binds.push(value.clone());
            }
            if sets.is_empty() {
                return Ok(None);
            }
            let pk = existing
                .get(def.primary_key)
                .cloned()
                .unwrap_or(SqlValue::Null);
            binds.push(pk);
            local
                .execute(
                    &format!(
                        "UPDATE {} SET {} WHERE {} = ${}",
                        def.name,
                        sets.join(", "),
                        def.primary_key,
                        binds.len()
                    ),
                    binds,
                )
                .await?;
            Ok(Some(pulled_outcome(def, cloud_row)))
        }
    }
}

/// INSERT carrying the authoritative key and every column verbatim, tagged
/// reconciled on arrival so it is never pushed back.
fn pull_insert(def: &TableDef, row: &SqlRow) -> (String, Vec<SqlValue>) {
    let mut cols = Vec::new();
    let mut binds = Vec::new();
    for (col, value) in row.columns().iter().zip(row.values()) {
        if col.as_str() == "sync_state" {
            continue;
        }
        cols.push(col.as_str());
        binds.push(value.clone());
    }
    cols.push("sync_state");
    binds.push(SyncState::Reconciled.as_str().into());
    let statement = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        def.name,
        cols.join(", "),
        placeholders(cols.len())
    );
    (statement, binds)
}

fn pulled_outcome(def: &TableDef, row: &SqlRow) -> SyncOutcome {
    let key = row.get_i64(def.primary_key);
    SyncOutcome {
        entity: def.name.to_string(),
        kind: OutcomeKind::Pulled,
        local_key: key,
        cloud_key: key,
        detail: match key {
            Some(_) => None,
            None => row.get_text(def.primary_key).map(str::to_string),
        },
    }
}

async fn mark_state(
    local: &LiveConnection,
    def: &TableDef,
    key: &SqlValue,
    state: SyncState,
) -> Result<u64> {
    local
        .execute(
            &format!(
                "UPDATE {} SET sync_state = $1 WHERE {} = $2",
                def.name, def.primary_key
            ),
            vec![state.as_str().into(), key.clone()],
        )
        .await
}
