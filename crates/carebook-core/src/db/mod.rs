//! Database layer for carebook.

pub mod migrations;
pub mod schema;
mod notes;
mod outbox;
mod patients;

pub use migrations::{MigrationError, MigrationReport};
pub use notes::NoteIndex;
pub use patients::PatientIndex;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrationError),
}

pub type DbResult<T> = Result<T, DbError>;

/// Receives one notification per committed local mutation.
///
/// The sync coordinator implements this so its pending counter moves in step
/// with the outbox.
pub trait ChangeSink: Send + Sync {
    fn record_local_changes(&self, count: u64);
}

/// Database connection wrapper.
///
/// Opening a database runs every outstanding migration before the handle is
/// returned; no record access happens on a stale schema.
pub struct Database {
    conn: Connection,
    clock: Arc<dyn Clock>,
    change_sink: Option<Arc<dyn ChangeSink>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("has_change_sink", &self.change_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open database at path, creating and migrating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn, clock)
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, clock)
    }

    /// Enable foreign keys and migrate to the current schema.
    fn initialize(mut conn: Connection, clock: Arc<dyn Clock>) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let report = migrations::migrate(&mut conn)?;
        if !report.is_noop() {
            tracing::info!(
                from = report.from_version,
                to = report.to_version,
                "store migrated"
            );
        }
        Ok(Self {
            conn,
            clock,
            change_sink: None,
        })
    }

    /// Route change notifications to `sink`.
    pub fn attach_change_sink(&mut self, sink: Arc<dyn ChangeSink>) {
        self.change_sink = Some(sink);
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Schema version stamped on the store.
    pub fn schema_version(&self) -> DbResult<u32> {
        Ok(migrations::schema_version(&self.conn)?)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn notify_changes(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(sink) = &self.change_sink {
            sink.record_local_changes(count);
        }
    }
}

/// Reject blank required text.
pub(crate) fn require_text(field: &str, value: &str) -> DbResult<()> {
    if value.trim().is_empty() {
        return Err(DbError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// `LIKE` pattern matching values that start with `prefix`.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let escaped = prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}%", escaped)
}

/// How an indexed field is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Equals(String),
    Prefix(String),
}

impl Matcher {
    /// SQL predicate on `column` and its bound parameter.
    pub(crate) fn predicate(&self, column: &str) -> (String, String) {
        match self {
            Matcher::Equals(value) => (format!("{} = ?1", column), value.clone()),
            Matcher::Prefix(prefix) => (
                format!("{} LIKE ?1 ESCAPE '\\'", column),
                like_prefix(prefix),
            ),
        }
    }
}
