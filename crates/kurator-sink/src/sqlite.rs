//! `SQLite`-backed implementation of [`SummarySink`].
//!
//! Uses a single `Mutex<Connection>` per opened sink. Each pipeline run opens
//! its own sink, so concurrent runs never share a connection; `SQLite` file
//! locking serialises their writes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use kurator_types::{Provenance, Record, RecordId, RunId, RunStats, RunStatus};
use rusqlite::{Connection, OptionalExtension};

use crate::backend::{StoredOutcome, SummarySink, WriteOutcome};
use crate::error::{self, SinkError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// How long a writer waits on another run's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_TARGET: &str = ":memory:";

/// Idempotent DDL for summary tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS record_outcomes (
    record_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    provenance_json TEXT NOT NULL,
    final_status TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS curation_runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    params_json TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    admitted INTEGER DEFAULT 0,
    passed INTEGER DEFAULT 0,
    dropped INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    elapsed_ms INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_outcomes_run ON record_outcomes (run_id);
";

/// `SQLite`-backed summary storage.
///
/// Create with [`SqliteSummarySink::open`] for file-backed persistence,
/// [`SqliteSummarySink::in_memory`] for tests, or
/// [`SqliteSummarySink::open_target`] to resolve an output target string.
pub struct SqliteSummarySink {
    target: String,
    conn: Mutex<Connection>,
}

impl SqliteSummarySink {
    /// Open or create a summary database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory can't be created,
    /// or [`SinkError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(path.display().to_string(), conn)
    }

    /// Create an in-memory summary database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Sqlite`] if the in-memory database can't be
    /// initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(MEMORY_TARGET.to_string(), conn)
    }

    /// Resolve an output target identifier.
    ///
    /// Accepts `:memory:`, `sqlite://<path>`, `sqlite:<path>`, or a bare path.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidTarget`] for an empty target, otherwise the
    /// errors of [`SqliteSummarySink::open`].
    pub fn open_target(target: &str) -> error::Result<Self> {
        let trimmed = target.trim();
        if trimmed == MEMORY_TARGET {
            return Self::in_memory();
        }
        let path = trimmed
            .strip_prefix("sqlite://")
            .or_else(|| trimmed.strip_prefix("sqlite:"))
            .unwrap_or(trimmed);
        if path.is_empty() {
            return Err(SinkError::InvalidTarget(target.to_string()));
        }
        Self::open(Path::new(path))
    }

    fn init(target: String, conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            target,
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SinkError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    #[cfg(test)]
    fn get_run_row(&self, run: &RunId) -> error::Result<(String, i64, i64, Option<String>)> {
        let conn = self.lock_conn()?;
        let row = conn.query_row(
            "SELECT status, admitted, passed, error_message FROM curation_runs WHERE run_id = ?1",
            [run.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(row)
    }
}

impl SummarySink for SqliteSummarySink {
    fn target(&self) -> &str {
        &self.target
    }

    fn write_outcome(
        &self,
        run: &RunId,
        record: &Record,
        provenance: &Provenance,
    ) -> error::Result<WriteOutcome> {
        let fields_json = serde_json::to_string(record.fields())?;
        let provenance_json = serde_json::to_string(provenance)?;
        let final_status = provenance
            .last()
            .map_or("unknown", |entry| entry.status.as_str());

        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM record_outcomes WHERE record_id = ?1",
                [record.id().as_str()],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO record_outcomes \
             (record_id, run_id, fields_json, provenance_json, final_status, stored_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(record_id) DO UPDATE SET run_id = ?2, fields_json = ?3, \
             provenance_json = ?4, final_status = ?5, stored_at = ?6",
            rusqlite::params![
                record.id().as_str(),
                run.as_str(),
                fields_json,
                provenance_json,
                final_status,
                Self::now_sqlite(),
            ],
        )?;
        tx.commit()?;

        Ok(if existing.is_some() {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Inserted
        })
    }

    fn get_outcome(&self, record: &RecordId) -> error::Result<Option<StoredOutcome>> {
        let conn = self.lock_conn()?;
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT run_id, fields_json, provenance_json, stored_at \
                 FROM record_outcomes WHERE record_id = ?1",
                [record.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((run_id, fields_json, provenance_json, stored_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredOutcome {
            record_id: record.clone(),
            run_id: RunId::new(run_id),
            fields: serde_json::from_str(&fields_json)?,
            provenance: serde_json::from_str(&provenance_json)?,
            stored_at: Self::sqlite_to_iso8601(&stored_at),
        }))
    }

    #[allow(clippy::cast_sign_loss)]
    fn count_outcomes(&self) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM record_outcomes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn start_run(&self, run: &RunId, params: &serde_json::Value) -> error::Result<()> {
        let params_json = serde_json::to_string(params)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO curation_runs (run_id, status, params_json) VALUES (?1, ?2, ?3) \
             ON CONFLICT(run_id) DO UPDATE SET status = ?2, params_json = ?3",
            rusqlite::params![run.as_str(), RunStatus::Running.as_str(), params_json],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run: &RunId,
        status: RunStatus,
        stats: &RunStats,
        elapsed_ms: u64,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE curation_runs SET status = ?1, finished_at = datetime('now'), \
             admitted = ?2, passed = ?3, dropped = ?4, failed = ?5, elapsed_ms = ?6, \
             error_message = ?7 WHERE run_id = ?8",
            rusqlite::params![
                status.as_str(),
                stats.admitted as i64,
                stats.passed as i64,
                stats.dropped as i64,
                stats.failed as i64,
                elapsed_ms as i64,
                stats.error_message,
                run.as_str(),
            ],
        )?;
        if updated == 0 {
            tracing::warn!(
                run_id = run.as_str(),
                "Completing a run that was never started; no run row updated"
            );
        }
        Ok(())
    }
}
