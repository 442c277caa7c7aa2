//! The on-device cache: pool ownership, provisioning, and sync bookkeeping.
//!
//! Beyond the shared registry tables, the local file carries two things the
//! cloud nodes never see: a `sync_state` column on every table (unsynced,
//! pushed, reconciled) and the `sync_meta` table holding per-entity pull
//! watermarks.

use crate::connection::{build_sqlite_pool, storage_from_sqlite, LiveConnection};
use crate::schema;
use r2d2_sqlite::SqliteConnectionManager;
use skybridge_types::{Result, StorageError, SyncError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;

const SYNC_META_DDL: &str = "CREATE TABLE IF NOT EXISTS sync_meta (\
    entity VARCHAR(100) PRIMARY KEY, \
    last_synced_at TIMESTAMP)";

pub struct LocalStore {
    path: PathBuf,
    pool: r2d2::Pool<SqliteConnectionManager>,
    /// Ordinary access holds this shared; a sync write phase holds it
    /// exclusively for the duration of the phase.
    phase_gate: Arc<RwLock<()>>,
    /// Held for a whole sync run; a second run fails fast instead of queueing.
    sync_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Open (creating if needed) and provision the cache file.
    pub async fn open(path: &Path) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            pool: build_sqlite_pool(path)?,
            phase_gate: Arc::new(RwLock::new(())),
            sync_lock: Arc::new(Mutex::new(())),
        };
        store.provision().await?;
        info!(path = %store.path.display(), "local cache ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A dialect-tagged handle over the same underlying pool.
    pub fn connection(&self) -> LiveConnection {
        LiveConnection::sqlite_from_pool(self.pool.clone())
    }

    /// Shared access for ordinary reads and writes. Waits while a sync write
    /// phase holds the gate exclusively.
    pub async fn shared_access(&self) -> OwnedRwLockReadGuard<()> {
        self.phase_gate.clone().read_owned().await
    }

    /// Exclusive access for one sync write phase.
    pub async fn begin_phase(&self) -> OwnedRwLockWriteGuard<()> {
        self.phase_gate.clone().write_owned().await
    }

    /// Claim the per-cache sync slot, or report a run already in flight.
    pub fn try_begin_sync(&self) -> std::result::Result<OwnedMutexGuard<()>, SyncError> {
        self.sync_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning)
    }

    /// Registry tables plus the local-only sync columns and meta table. Every
    /// step is idempotent, so reopening an existing file is a no-op.
    async fn provision(&self) -> Result<()> {
        let conn = self.connection();
        schema::ensure_schema(&conn).await?;
        for def in schema::registry() {
            add_sync_state_column(&conn, def.name).await?;
        }
        conn.execute(SYNC_META_DDL, vec![]).await?;
        Ok(())
    }

    /// Last successful pull watermark for one entity.
    pub async fn watermark(&self, entity: &str) -> Result<Option<String>> {
        let rows = self
            .connection()
            .fetch_all(
                "SELECT last_synced_at FROM sync_meta WHERE entity = $1",
                vec![entity.into()],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get_text("last_synced_at"))
            .map(str::to_string))
    }

    /// Advance the watermark for each entity to `stamp`. Called only after a
    /// run completes cleanly.
    pub async fn set_watermarks<'a, I>(&self, entities: I, stamp: &str) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let conn = self.connection();
        for entity in entities {
            conn.execute(
                "INSERT IGNORE INTO sync_meta (entity, last_synced_at) VALUES ($1, $2)",
                vec![entity.into(), stamp.into()],
            )
            .await?;
            conn.execute(
                "UPDATE sync_meta SET last_synced_at = $1 WHERE entity = $2",
                vec![stamp.into(), entity.into()],
            )
            .await?;
        }
        Ok(())
    }

    /// Rewrite one record's engine-assigned key to the authoritative cloud
    /// key, carrying every dependent link column with it. Runs as a single
    /// transaction with foreign-key checks deferred to commit, so the parent
    /// key and its references move together.
    pub fn rewrite_key(&self, def: &schema::TableDef, old: i64, new: i64) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| StorageError::Pool {
            message: e.to_string(),
        })?;
        let tx = conn.transaction().map_err(storage_from_sqlite)?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")
            .map_err(storage_from_sqlite)?;
        tx.execute(
            &format!(
                "UPDATE {} SET {pk} = ?1 WHERE {pk} = ?2",
                def.name,
                pk = def.primary_key
            ),
            rusqlite::params![new, old],
        )
        .map_err(storage_from_sqlite)?;
        for (dependent, link) in schema::links_to(def.name) {
            tx.execute(
                &format!(
                    "UPDATE {} SET {col} = ?1 WHERE {col} = ?2",
                    dependent.name,
                    col = link.column
                ),
                rusqlite::params![new, old],
            )
            .map_err(storage_from_sqlite)?;
        }
        tx.commit().map_err(storage_from_sqlite)?;
        Ok(())
    }

    /// Most recent completed sync across all entities, as timestamp text.
    pub async fn last_sync(&self) -> Result<Option<String>> {
        let rows = self
            .connection()
            .fetch_all(
                "SELECT MAX(last_synced_at) AS last_sync FROM sync_meta",
                vec![],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get_text("last_sync"))
            .map(str::to_string))
    }
}

/// `ALTER TABLE ... ADD COLUMN` has no IF NOT EXISTS, so presence is checked
/// through the table-info pragma first.
async fn add_sync_state_column(conn: &LiveConnection, table: &str) -> Result<()> {
    let rows = conn
        .fetch_all(
            "SELECT COUNT(*) AS n FROM pragma_table_info($1) WHERE name = 'sync_state'",
            vec![table.into()],
        )
        .await?;
    let present = rows.first().and_then(|r| r.get_i64("n")).unwrap_or(0) > 0;
    if !present {
        conn.execute(
            &format!(
                "ALTER TABLE {table} ADD COLUMN sync_state VARCHAR(20) NOT NULL DEFAULT 'unsynced'"
            ),
            vec![],
        )
        .await?;
    }
    Ok(())
}
