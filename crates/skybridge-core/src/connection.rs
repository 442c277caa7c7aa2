//! Live connections over both storage engines.
//!
//! [`LiveConnection`] is the dialect-tagged handle every layer above works
//! with. Callers hand it canonical statement text plus a bind list; the
//! connection translates for its own engine before executing, so no caller
//! ever writes engine-specific SQL. The server variant wraps a shared sqlx
//! pool, the embedded variant a shared r2d2 pool over the on-disk file.

use crate::dialect::translate;
use r2d2_sqlite::SqliteConnectionManager;
use skybridge_types::{Dialect, Result, SqlRow, SqlValue, StorageError};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::{Column, MySqlPool, Row, TypeInfo};
use std::path::Path;
use tracing::trace;

#[derive(Debug)]
pub struct MySqlExec {
    pool: MySqlPool,
}

#[derive(Debug, Clone)]
pub struct SqliteExec {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

/// A dialect-tagged executor for one node.
#[derive(Debug)]
pub enum LiveConnection {
    MySql(MySqlExec),
    Sqlite(SqliteExec),
}

impl LiveConnection {
    pub fn mysql(pool: MySqlPool) -> Self {
        Self::MySql(MySqlExec { pool })
    }

    /// Open (or create) an embedded store file behind a small pool, with
    /// foreign keys enforced on every checkout.
    pub fn sqlite_file(path: &Path) -> Result<Self> {
        Ok(Self::Sqlite(SqliteExec {
            pool: build_sqlite_pool(path)?,
        }))
    }

    /// Wrap an already-built embedded pool (the local store shares its pool
    /// with connections handed out by the router).
    pub fn sqlite_from_pool(pool: r2d2::Pool<SqliteConnectionManager>) -> Self {
        Self::Sqlite(SqliteExec { pool })
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::MySql(_) => Dialect::MySql,
            Self::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Run a canonical SELECT, decoding every result row into the portable
    /// value classes.
    pub async fn fetch_all(&self, statement: &str, binds: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let sql = translate(statement, self.dialect())?;
        let rows = match self {
            Self::MySql(exec) => exec.fetch_all(&sql, &binds).await?,
            Self::Sqlite(exec) => exec.fetch_all(&sql, &binds)?,
        };
        trace!(dialect = %self.dialect(), rows = rows.len(), "fetched");
        Ok(rows)
    }

    /// Run a canonical statement, returning the affected row count.
    pub async fn execute(&self, statement: &str, binds: Vec<SqlValue>) -> Result<u64> {
        let sql = translate(statement, self.dialect())?;
        let affected = match self {
            Self::MySql(exec) => exec.execute(&sql, &binds).await?,
            Self::Sqlite(exec) => exec.execute(&sql, &binds)?,
        };
        Ok(affected)
    }

    /// Run a canonical INSERT and return the engine-assigned integer key.
    pub async fn insert_returning_id(
        &self,
        statement: &str,
        binds: Vec<SqlValue>,
    ) -> Result<i64> {
        let sql = translate(statement, self.dialect())?;
        let id = match self {
            Self::MySql(exec) => exec.insert_returning_id(&sql, &binds).await?,
            Self::Sqlite(exec) => exec.insert_returning_id(&sql, &binds)?,
        };
        Ok(id)
    }
}

impl MySqlExec {
    fn query<'q>(
        sql: &'q str,
        binds: &'q [SqlValue],
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        let mut q = sqlx::query(sql);
        for value in binds {
            q = match value {
                SqlValue::Null => q.bind(None::<String>),
                SqlValue::Integer(i) => q.bind(*i),
                SqlValue::Real(r) => q.bind(*r),
                SqlValue::Text(s) => q.bind(s.as_str()),
                SqlValue::Blob(b) => q.bind(b.as_slice()),
            };
        }
        q
    }

    async fn fetch_all(&self, sql: &str, binds: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let rows = Self::query(sql, binds)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_from_sqlx)?;
        rows.iter().map(decode_mysql_row).collect()
    }

    async fn execute(&self, sql: &str, binds: &[SqlValue]) -> Result<u64> {
        let result = Self::query(sql, binds)
            .execute(&self.pool)
            .await
            .map_err(storage_from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn insert_returning_id(&self, sql: &str, binds: &[SqlValue]) -> Result<i64> {
        let result = Self::query(sql, binds)
            .execute(&self.pool)
            .await
            .map_err(storage_from_sqlx)?;
        Ok(result.last_insert_id() as i64)
    }
}

impl SqliteExec {
    fn checkout(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            StorageError::Pool {
                message: e.to_string(),
            }
            .into()
        })
    }

    fn fetch_all(&self, sql: &str, binds: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(sql).map_err(storage_from_sqlite)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let params: Vec<rusqlite::types::Value> = binds.iter().map(sqlite_value).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(storage_from_sqlite)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_from_sqlite)? {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(|e| StorageError::Decode {
                    column: name.clone(),
                    message: e.to_string(),
                })?;
                values.push(from_sqlite_ref(value));
            }
            out.push(SqlRow::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, binds: &[SqlValue]) -> Result<u64> {
        let conn = self.checkout()?;
        let params: Vec<rusqlite::types::Value> = binds.iter().map(sqlite_value).collect();
        let affected = conn
            .execute(sql, rusqlite::params_from_iter(params))
            .map_err(storage_from_sqlite)?;
        Ok(affected as u64)
    }

    fn insert_returning_id(&self, sql: &str, binds: &[SqlValue]) -> Result<i64> {
        let conn = self.checkout()?;
        let params: Vec<rusqlite::types::Value> = binds.iter().map(sqlite_value).collect();
        conn.execute(sql, rusqlite::params_from_iter(params))
            .map_err(storage_from_sqlite)?;
        Ok(conn.last_insert_rowid())
    }
}

/// Shared pool construction for every embedded store we open.
pub fn build_sqlite_pool(path: &Path) -> Result<r2d2::Pool<SqliteConnectionManager>> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    r2d2::Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| {
            StorageError::Pool {
                message: e.to_string(),
            }
            .into()
        })
}

fn sqlite_value(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(r) => rusqlite::types::Value::Real(*r),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        SqlValue::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_sqlite_ref(value: rusqlite::types::ValueRef<'_>) -> SqlValue {
    match value {
        rusqlite::types::ValueRef::Null => SqlValue::Null,
        rusqlite::types::ValueRef::Integer(i) => SqlValue::Integer(i),
        rusqlite::types::ValueRef::Real(r) => SqlValue::Real(r),
        rusqlite::types::ValueRef::Text(t) => {
            SqlValue::Text(String::from_utf8_lossy(t).into_owned())
        }
        rusqlite::types::ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

fn decode_mysql_row(row: &MySqlRow) -> Result<SqlRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        values.push(decode_mysql_value(row, idx, &name, col.type_info().name())?);
        columns.push(name);
    }
    Ok(SqlRow::new(columns, values))
}

const INTEGER_TYPES: [&str; 7] = [
    "TINYINT",
    "SMALLINT",
    "MEDIUMINT",
    "INT",
    "INTEGER",
    "BIGINT",
    "BOOLEAN",
];
const FLOAT_TYPES: [&str; 2] = ["FLOAT", "DOUBLE"];
const DATETIME_TYPES: [&str; 2] = ["TIMESTAMP", "DATETIME"];
const BLOB_TYPES: [&str; 6] = [
    "BLOB",
    "TINYBLOB",
    "MEDIUMBLOB",
    "LONGBLOB",
    "BINARY",
    "VARBINARY",
];

/// Decode one server column into a portable value class. Temporal columns
/// come back as `"%Y-%m-%d %H:%M:%S"` text, the form both engines accept on
/// the way back in. Anything unrecognized is read as text.
fn decode_mysql_value(
    row: &MySqlRow,
    idx: usize,
    name: &str,
    type_name: &str,
) -> Result<SqlValue> {
    let base = type_name
        .strip_suffix(" UNSIGNED")
        .unwrap_or(type_name)
        .to_ascii_uppercase();
    let decode_err = |e: sqlx::Error| StorageError::Decode {
        column: name.to_string(),
        message: e.to_string(),
    };

    let value = if INTEGER_TYPES.contains(&base.as_str()) {
        row.try_get::<Option<i64>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::Integer)
    } else if FLOAT_TYPES.contains(&base.as_str()) {
        row.try_get::<Option<f64>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::Real)
    } else if DATETIME_TYPES.contains(&base.as_str()) {
        row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, |ts| {
                SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string())
            })
    } else if base == "DATE" {
        row.try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, |d| {
                SqlValue::Text(d.format("%Y-%m-%d").to_string())
            })
    } else if BLOB_TYPES.contains(&base.as_str()) {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::Blob)
    } else {
        row.try_get::<Option<String>, _>(idx)
            .map_err(decode_err)?
            .map_or(SqlValue::Null, SqlValue::Text)
    };
    Ok(value)
}

fn storage_from_sqlx(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey {
            message: db.message().to_string(),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StorageError::Pool {
            message: e.to_string(),
        },
        sqlx::Error::Io(io) => StorageError::Io {
            message: io.to_string(),
        },
        other => StorageError::Query {
            dialect: Dialect::MySql,
            message: other.to_string(),
        },
    }
}

// SQLITE_CONSTRAINT_UNIQUE and SQLITE_CONSTRAINT_PRIMARYKEY extended codes
const SQLITE_UNIQUE: i32 = 2067;
const SQLITE_PRIMARY_KEY: i32 = 1555;

pub(crate) fn storage_from_sqlite(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(code, message)
            if code.extended_code == SQLITE_UNIQUE
                || code.extended_code == SQLITE_PRIMARY_KEY =>
        {
            StorageError::DuplicateKey {
                message: message.clone().unwrap_or_else(|| e.to_string()),
            }
        }
        _ => StorageError::Query {
            dialect: Dialect::Sqlite,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use skybridge_types::CoreError;

    fn temp_store() -> (tempfile::TempDir, LiveConnection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = LiveConnection::sqlite_file(&dir.path().join("exec.db")).unwrap();
        (dir, conn)
    }

    #[tokio::test]
    async fn test_canonical_ddl_and_insert_round_trip() {
        let (_dir, conn) = temp_store();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS notes (\
             id INT AUTO_INCREMENT PRIMARY KEY, body TEXT, score REAL)",
            vec![],
        )
        .await
        .unwrap();

        let first = conn
            .insert_returning_id(
                "INSERT INTO notes (body, score) VALUES ($1, $2)",
                vec!["hello".into(), 0.5.into()],
            )
            .await
            .unwrap();
        let second = conn
            .insert_returning_id(
                "INSERT INTO notes (body, score) VALUES ($1, $2)",
                vec![SqlValue::Null, 1.5.into()],
            )
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let rows = conn
            .fetch_all("SELECT id, body, score FROM notes ORDER BY id", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_text("body"), Some("hello"));
        assert_eq!(rows[1].get("body"), Some(&SqlValue::Null));
        assert_eq!(rows[1].get("score"), Some(&SqlValue::Real(1.5)));
    }

    #[tokio::test]
    async fn test_placeholder_reuse_binds_once() {
        let (_dir, conn) = temp_store();
        conn.execute("CREATE TABLE pair (a INTEGER, b INTEGER)", vec![])
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO pair (a, b) VALUES ($1, $1)",
            vec![7.into()],
        )
        .await
        .unwrap();

        let rows = conn.fetch_all("SELECT a, b FROM pair", vec![]).await.unwrap();
        assert_eq!(rows[0].get_i64("a"), Some(7));
        assert_eq!(rows[0].get_i64("b"), Some(7));
    }

    #[tokio::test]
    async fn test_unique_violation_surfaces_as_duplicate_key() {
        let (_dir, conn) = temp_store();
        conn.execute(
            "CREATE TABLE tagged (id INT AUTO_INCREMENT PRIMARY KEY, \
             tag VARCHAR(50) NOT NULL, CONSTRAINT uq_tag UNIQUE (tag))",
            vec![],
        )
        .await
        .unwrap();
        conn.execute("INSERT INTO tagged (tag) VALUES ($1)", vec!["x".into()])
            .await
            .unwrap();

        let err = conn
            .execute("INSERT INTO tagged (tag) VALUES ($1)", vec!["x".into()])
            .await
            .unwrap_err();
        match err {
            CoreError::Storage(storage) => assert!(storage.is_duplicate_key()),
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let (_dir, conn) = temp_store();
        conn.execute("CREATE TABLE t (n INTEGER)", vec![]).await.unwrap();
        for n in 0..3 {
            conn.execute("INSERT INTO t (n) VALUES ($1)", vec![n.into()])
                .await
                .unwrap();
        }

        let affected = conn
            .execute("UPDATE t SET n = n + 1 WHERE n >= $1", vec![1.into()])
            .await
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let (_dir, conn) = temp_store();
        conn.execute("CREATE TABLE bin (payload BLOB)", vec![])
            .await
            .unwrap();
        let payload = vec![0u8, 159, 146, 150];
        conn.execute(
            "INSERT INTO bin (payload) VALUES ($1)",
            vec![payload.clone().into()],
        )
        .await
        .unwrap();

        let rows = conn.fetch_all("SELECT payload FROM bin", vec![]).await.unwrap();
        assert_eq!(rows[0].get("payload"), Some(&SqlValue::Blob(payload)));
    }
}
