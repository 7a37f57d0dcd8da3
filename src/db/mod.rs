//! Database module for Vigil.
//!
//! Provides SQLite storage with automatic migrations, plus the two collaborator
//! interfaces the monitoring core consumes: the target [`Registry`] and the
//! append-only [`LogStore`].

mod models;
mod store;

pub use models::*;
pub use store::*;

use chrono::{DateTime, Utc};

/// Source of monitored targets and owner of their persisted UP/DOWN state.
pub trait Registry: Send + Sync {
    fn list_targets(&self) -> Result<Vec<Target>, DbError>;

    fn get_target(&self, id: i64) -> Result<Target, DbError>;

    /// Atomically move `id` from `expected` to `new`, stamping the transition time.
    ///
    /// Returns `false` without writing when the stored state is no longer `expected`.
    fn compare_and_set_state(
        &self,
        id: i64,
        expected: Status,
        new: Status,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;
}

/// Append-only storage of check results.
pub trait LogStore: Send + Sync {
    /// Persist `entry` and assign its id.
    fn append_log(&self, entry: &mut LogEntry) -> Result<i64, DbError>;

    /// Entries for `target_id` with `from <= timestamp <= to`, oldest first.
    fn query_logs(
        &self,
        target_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, DbError>;
}
