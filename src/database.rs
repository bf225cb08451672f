use log::{error, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::AlertSyncError;
use crate::schema::{CREATE_SCHEMA_SQL, SCHEMA_VERSION};

pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Pooled access to the alert store.
///
/// Units of work go through [`Database::immediate_transaction`], which takes the
/// SQLite write lock at BEGIN so that writers touching the same dashboard
/// serialize instead of interleaving.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(db_path: &Path, config: &DatabaseConfig) -> Result<Self, AlertSyncError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(AlertSyncError::Error(format!(
                    "Database folder '{}' does not exist or is not a directory",
                    parent.display()
                )));
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms());
        let manager = SqliteConnectionManager::file(db_path).with_init(move |c| {
            c.busy_timeout(busy_timeout)?;
            c.execute_batch("PRAGMA foreign_keys = ON;")
        });

        let pool = Pool::builder()
            .max_size(config.pool_size())
            .build(manager)?;

        info!("Database opened at: {}", db_path.display());

        let db = Database { pool };
        db.ensure_schema()?;

        Ok(db)
    }

    pub fn get_connection(&self) -> Result<PooledConn, AlertSyncError> {
        Ok(self.pool.get()?)
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`. Commits when `f` succeeds, rolls back
    /// when it (or the commit) fails and hands the original error back.
    pub fn immediate_transaction<T, F>(conn: &Connection, f: F) -> Result<T, AlertSyncError>
    where
        F: FnOnce(&Connection) -> Result<T, AlertSyncError>,
    {
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = f(conn).and_then(|value| {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        if result.is_err() && !conn.is_autocommit() {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                error!("Failed to roll back transaction: {}", rollback_err);
            }
        }

        result
    }

    fn ensure_schema(&self) -> Result<(), AlertSyncError> {
        let conn = self.get_connection()?;

        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)?;

        if !table_exists {
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
            return Ok(());
        }

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(AlertSyncError::Error(format!(
                "Schema version mismatch: found '{}', expected '{}'",
                other, SCHEMA_VERSION
            ))),
            None => Err(AlertSyncError::Error("Schema version missing".to_string())),
        }
    }
}
