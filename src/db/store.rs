//! SQLite database store implementation.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;
use super::{LogStore, Registry};

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
}

const TARGET_COLUMNS: &str =
    "id, name, url, created_at, is_down, last_status_change, alert_emails";

const LOG_COLUMNS: &str =
    "id, application_id, status, status_code, response_time, timestamp, meta";

/// Thread-safe database store.
///
/// The connection handle is created once per process and shared by cloning.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    ///
    /// New targets start in the UP state.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO applications (name, url, created_at, is_down, alert_emails) VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                target.name,
                target.url,
                target.created_at.timestamp_millis(),
                target.alert_emails,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(DbError::Conflict(format!("URL already exists: {}", target.url)));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        target.id = id;
        target.current_state = Status::Up;
        target.last_transition_at = None;
        Ok(id)
    }

    /// Update the user-editable fields of an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE applications SET name=?1, url=?2, alert_emails=?3 WHERE id=?4",
            params![target.name, target.url, target.alert_emails, target.id],
        );

        match updated {
            Ok(0) => Err(DbError::NotFound),
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(DbError::Conflict(format!("URL already exists: {}", target.url)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get all targets, newest first.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM applications ORDER BY id DESC"
        ))?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TARGET_COLUMNS} FROM applications WHERE id = ?1"),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Find a target by its exact URL.
    pub fn find_target_by_url(&self, url: &str) -> Result<Option<Target>, DbError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM applications WHERE url = ?1"),
                params![url],
                target_from_row,
            )
            .optional()?)
    }

    /// Delete a target and its logs.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM status_logs WHERE application_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM applications WHERE id = ?1", params![id])?;
        tx.commit()?;

        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Conditionally flip the persisted state of a target.
    pub fn set_state_if(
        &self,
        id: i64,
        expected: Status,
        new: Status,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE applications SET is_down=?1, last_status_change=?2 WHERE id=?3 AND is_down=?4",
            params![new.is_down(), at.timestamp_millis(), id, expected.is_down()],
        )?;
        Ok(updated == 1)
    }

    // --- Status Logs ---

    /// Insert a log row and return its ID.
    pub fn insert_log(&self, entry: &mut LogEntry) -> Result<i64, DbError> {
        let meta = match &entry.meta {
            Some(m) => Some(
                serde_json::to_string(m)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            ),
            None => None,
        };

        let conn = self.conn();
        conn.execute(
            "INSERT INTO status_logs (application_id, status, status_code, response_time, timestamp, meta) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.application_id,
                entry.status,
                entry.status_code,
                entry.response_time,
                entry.timestamp.timestamp_millis(),
                meta,
            ],
        )?;
        let id = conn.last_insert_rowid();
        entry.id = id;
        Ok(id)
    }

    /// Get the most recent logs for a target, newest first.
    pub fn recent_logs(&self, target_id: i64, limit: u32) -> Result<Vec<LogEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM status_logs WHERE application_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;

        let logs = stmt
            .query_map(params![target_id, limit], log_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// Get logs for a target within an inclusive time range, oldest first.
    pub fn logs_between(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM status_logs
             WHERE application_id = ?1 AND timestamp BETWEEN ?2 AND ?3
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let logs = stmt
            .query_map(
                params![target_id, from.timestamp_millis(), to.timestamp_millis()],
                log_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(logs)
    }
}

impl Registry for Store {
    fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        self.get_targets()
    }

    fn get_target(&self, id: i64) -> Result<Target, DbError> {
        Store::get_target(self, id)
    }

    fn compare_and_set_state(
        &self,
        id: i64,
        expected: Status,
        new: Status,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        self.set_state_if(id, expected, new, at)
    }
}

impl LogStore for Store {
    fn append_log(&self, entry: &mut LogEntry) -> Result<i64, DbError> {
        self.insert_log(entry)
    }

    fn query_logs(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, DbError> {
        self.logs_between(target_id, from, to)
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> SqlResult<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Status::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown status {:?}", s).into()))
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let is_down: bool = row.get(4)?;
    let last_change: Option<i64> = row.get(5)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        created_at: from_millis(row.get(3)?),
        current_state: if is_down { Status::Down } else { Status::Up },
        last_transition_at: last_change.map(from_millis),
        alert_emails: row.get(6)?,
    })
}

fn log_from_row(row: &Row<'_>) -> SqlResult<LogEntry> {
    let meta: Option<String> = row.get(6)?;
    Ok(LogEntry {
        id: row.get(0)?,
        application_id: row.get(1)?,
        status: row.get(2)?,
        status_code: row.get(3)?,
        response_time: row.get(4)?,
        timestamp: from_millis(row.get(5)?),
        meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

/// Convert a stored epoch-millisecond value back to a timestamp.
fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
