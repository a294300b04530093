//! The conversion-history ledger.
//!
//! An append-only SQLite relation of conversion attempts, one row per unit
//! of work (one file in a batch, or one whole animation operation). Rows
//! are immutable once written; corrections are new rows, and the only
//! deletion is the explicit bulk [`HistoryStore::clear`].
//!
//! Writes from concurrent pipeline workers are serialized through an
//! interior mutex — throughput is bounded by codec work, not storage, so a
//! one-writer-at-a-time discipline is sufficient.
//!
//! Read paths ([`recent`](HistoryStore::recent),
//! [`statistics`](HistoryStore::statistics)) degrade to empty results on
//! persistence errors: history display is not safety-critical. Appends never
//! degrade — dropping the record of a finished conversion would be silent
//! data loss, so [`append`](HistoryStore::append) surfaces every failure.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("history database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
    Failed,
    Cancelled,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row to append: everything except the identity and timestamp, which the
/// store assigns at insert.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Source path, or a descriptor like `"12 source files"` for
    /// multi-input operations.
    pub source_path: String,
    pub target_path: String,
    pub source_format: String,
    pub target_format: String,
    pub source_size: u64,
    /// 0 when the operation failed before a file was produced.
    pub target_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: u64,
    pub status: RecordStatus,
}

/// One committed ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionRecord {
    pub id: i64,
    pub source_path: String,
    pub target_path: String,
    pub source_format: String,
    pub target_format: String,
    pub source_size: u64,
    pub target_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RecordStatus,
}

/// Aggregate view over completed rows. Recomputed on demand, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_completed: u64,
    pub by_format: BTreeMap<String, u64>,
    /// Sum of `source_size - target_size` over completed rows that shrank.
    pub bytes_saved: u64,
}

/// SQLite-backed conversion-history store. One store owns one database file.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the ledger at the given path, creating parent
    /// directories and the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// An in-memory store, for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversion_history (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                source_path   TEXT NOT NULL,
                target_path   TEXT NOT NULL,
                source_format TEXT NOT NULL,
                target_format TEXT NOT NULL,
                source_size   INTEGER NOT NULL,
                target_size   INTEGER NOT NULL,
                width         INTEGER,
                height        INTEGER,
                created_at    TIMESTAMP NOT NULL,
                duration_ms   INTEGER NOT NULL,
                status        TEXT NOT NULL DEFAULT 'completed'
            );
            CREATE INDEX IF NOT EXISTS idx_history_created_at
                ON conversion_history(created_at);
            CREATE INDEX IF NOT EXISTS idx_history_target_format
                ON conversion_history(target_format);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert one immutable row; the store assigns the identity and
    /// timestamp and returns the committed record.
    pub fn append(&self, record: &NewRecord) -> Result<ConversionRecord, StoreError> {
        let created_at = Utc::now();
        let conn = self.conn.lock().expect("history store mutex poisoned");
        conn.execute(
            "INSERT INTO conversion_history
             (source_path, target_path, source_format, target_format,
              source_size, target_size, width, height, created_at,
              duration_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.source_path,
                record.target_path,
                record.source_format,
                record.target_format,
                record.source_size,
                record.target_size,
                record.width,
                record.height,
                created_at,
                record.duration_ms,
                record.status.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, status = %record.status, "appended conversion record");

        Ok(ConversionRecord {
            id,
            source_path: record.source_path.clone(),
            target_path: record.target_path.clone(),
            source_format: record.source_format.clone(),
            target_format: record.target_format.clone(),
            source_size: record.source_size,
            target_size: record.target_size,
            width: record.width,
            height: record.height,
            created_at,
            duration_ms: record.duration_ms,
            status: record.status,
        })
    }

    /// The most recent rows, newest first, capped at `limit`.
    ///
    /// Degrades to an empty list on read failure.
    pub fn recent(&self, limit: usize) -> Vec<ConversionRecord> {
        match self.try_recent(limit) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "history query failed, returning empty list");
                Vec::new()
            }
        }
    }

    fn try_recent(&self, limit: usize) -> Result<Vec<ConversionRecord>, StoreError> {
        let conn = self.conn.lock().expect("history store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, source_path, target_path, source_format, target_format,
                    source_size, target_size, width, height, created_at,
                    duration_ms, status
             FROM conversion_history
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let status_text: String = row.get(11)?;
            Ok(ConversionRecord {
                id: row.get(0)?,
                source_path: row.get(1)?,
                target_path: row.get(2)?,
                source_format: row.get(3)?,
                target_format: row.get(4)?,
                source_size: row.get(5)?,
                target_size: row.get(6)?,
                width: row.get(7)?,
                height: row.get(8)?,
                created_at: row.get(9)?,
                duration_ms: row.get(10)?,
                status: RecordStatus::parse(&status_text).unwrap_or(RecordStatus::Failed),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Aggregate statistics over completed rows only.
    ///
    /// Degrades to zeroed statistics on read failure.
    pub fn statistics(&self) -> Statistics {
        match self.try_statistics() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "statistics query failed, returning zeros");
                Statistics::default()
            }
        }
    }

    fn try_statistics(&self) -> Result<Statistics, StoreError> {
        let conn = self.conn.lock().expect("history store mutex poisoned");

        let total_completed: u64 = conn.query_row(
            "SELECT COUNT(*) FROM conversion_history WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;

        let mut by_format = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT target_format, COUNT(*)
             FROM conversion_history
             WHERE status = 'completed'
             GROUP BY target_format",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (format, count) = row?;
            by_format.insert(format, count);
        }

        let bytes_saved: u64 = conn.query_row(
            "SELECT COALESCE(SUM(source_size - target_size), 0)
             FROM conversion_history
             WHERE status = 'completed' AND source_size > target_size",
            [],
            |row| row.get(0),
        )?;

        Ok(Statistics {
            total_completed,
            by_format,
            bytes_saved,
        })
    }

    /// Delete every row. Irreversible; returns the number of rows removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("history store mutex poisoned");
        let removed = conn.execute("DELETE FROM conversion_history", [])?;
        tracing::info!(removed, "conversion history cleared");
        Ok(removed)
    }

    /// Reclaim file space. Has no effect on query results.
    pub fn compact(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("history store mutex poisoned");
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Run arbitrary SQL against the underlying connection, for tests that
    /// need to damage the schema.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("history store mutex poisoned");
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore").finish_non_exhaustive()
    }
}
