//! presencia-store — SQLite persistence for the attendance engine.
//!
//! Synchronous `rusqlite` code behind a `tokio-rusqlite` async facade. Two
//! concerns live here: attendance records (with the hard
//! `(subject, date)` uniqueness constraint) and biometric templates (with
//! atomic full-set replacement so no reader ever observes a half-replaced
//! vector set).

pub mod attendance;
pub mod template;

use chrono::NaiveDate;
use std::path::Path;
use thiserror::Error;

pub use attendance::NewAttendanceRow;
pub use template::TemplateMeta;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),
    /// A second record for the same (subject, date) was rejected by the
    /// uniqueness constraint. The caller re-reads and routes.
    #[error("attendance record already exists for {subject_id} on {date}")]
    InsertConflict { subject_id: String, date: NaiveDate },
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id                 INTEGER PRIMARY KEY,
    subject_id         TEXT NOT NULL,
    area_id            TEXT NOT NULL,
    date               TEXT NOT NULL,
    check_in           TEXT,
    check_out          TEXT,
    status             TEXT NOT NULL,
    expected_check_in  TEXT,
    expected_check_out TEXT,
    latitude           REAL,
    longitude          REAL,
    face_verified      INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    UNIQUE (subject_id, date)
);
CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance (date);

CREATE TABLE IF NOT EXISTS biometric_template (
    subject_id           TEXT PRIMARY KEY,
    confidence_threshold REAL NOT NULL,
    trained              INTEGER NOT NULL DEFAULT 0,
    sample_count         INTEGER NOT NULL DEFAULT 0,
    enrolled_at          TEXT
);

CREATE TABLE IF NOT EXISTS template_sample (
    sample_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_template_sample_subject
    ON template_sample (subject_id);
";

/// Handle to the engine's durable storage.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    /// In-memory database, used by tests and the `--ephemeral` dev mode.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "busy_timeout", 5_000)?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::debug!("storage schema ready");
        Ok(())
    }

    /// Run `f` against the underlying connection on the storage thread.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(StoreError::from)?
    }
}

pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_from_sql(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad date {s:?}: {e}")))
}

pub(crate) fn time_to_sql(time: chrono::NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

pub(crate) fn time_from_sql(s: &str) -> Result<chrono::NaiveTime, StoreError> {
    chrono::NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| StoreError::Corrupt(format!("bad time {s:?}: {e}")))
}
