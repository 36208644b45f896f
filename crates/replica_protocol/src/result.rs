//! Outcome of one sync pass.

use crate::conflict::ConflictRecord;
use crate::table::TableName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure carried by a [`SyncResult`].
///
/// Per-table remote failures are non-fatal: the table is skipped and the
/// rest of the pass continues. Everything else aborts the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// No connectivity; nothing was attempted.
    #[error("offline: no network connectivity")]
    Offline,

    /// Another sync was already in flight.
    #[error("a sync is already in progress")]
    Busy,

    /// Fetching one table from the remote store failed.
    #[error("failed to fetch {table} from remote: {message}")]
    RemoteFetch {
        /// Table that was skipped.
        table: TableName,
        /// Underlying failure.
        message: String,
    },

    /// Uploading one table to the remote store failed.
    #[error("failed to upload {table} to remote: {message}")]
    RemoteUpload {
        /// Table that was skipped.
        table: TableName,
        /// Underlying failure.
        message: String,
    },

    /// Writing pulled records to the local store failed.
    #[error("failed to commit to local store: {message}")]
    LocalCommit {
        /// Underlying failure.
        message: String,
    },

    /// Reading the local store failed.
    #[error("failed to read local store: {message}")]
    LocalRead {
        /// Underlying failure.
        message: String,
    },

    /// Reading or persisting sync state failed.
    #[error("sync state error: {message}")]
    State {
        /// Underlying failure.
        message: String,
    },
}

impl SyncErrorKind {
    /// Returns true if this failure aborts the whole operation.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncErrorKind::RemoteFetch { .. } | SyncErrorKind::RemoteUpload { .. }
        )
    }

    /// Returns the table a per-table failure refers to.
    pub fn table(&self) -> Option<TableName> {
        match self {
            SyncErrorKind::RemoteFetch { table, .. } | SyncErrorKind::RemoteUpload { table, .. } => {
                Some(*table)
            }
            _ => None,
        }
    }
}

/// Summary of one pull, push or two-way sync.
///
/// Created once per operation and handed back to the caller; never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncResult {
    /// Tables that were fully processed, in processing order.
    pub synced_tables: Vec<TableName>,
    /// Records fetched (pull) or uploaded (push).
    pub record_count: usize,
    /// Conflicts detected and resolved during the pass.
    pub conflicts: Vec<ConflictRecord>,
    /// Non-fatal per-table failures; the listed tables were skipped.
    pub table_errors: Vec<SyncErrorKind>,
    /// Fatal failure, if the operation did not complete.
    pub error: Option<SyncErrorKind>,
}

impl SyncResult {
    /// Creates an empty, successful result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a failed result.
    pub fn failed(error: SyncErrorKind) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Result returned when there is no connectivity.
    pub fn offline() -> Self {
        Self::failed(SyncErrorKind::Offline)
    }

    /// Result returned when another sync is in flight.
    pub fn busy() -> Self {
        Self::failed(SyncErrorKind::Busy)
    }

    /// Returns true if no fatal error occurred.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if the operation was rejected as busy.
    pub fn is_busy(&self) -> bool {
        matches!(self.error, Some(SyncErrorKind::Busy))
    }

    /// Returns true if the operation was skipped for lack of connectivity.
    pub fn is_offline(&self) -> bool {
        matches!(self.error, Some(SyncErrorKind::Offline))
    }

    /// Records a fully processed table and the records it contributed.
    pub fn record_table(&mut self, table: TableName, records: usize) {
        if !self.synced_tables.contains(&table) {
            self.synced_tables.push(table);
        }
        self.record_count += records;
    }

    /// Records a non-fatal per-table failure.
    pub fn record_table_error(&mut self, error: SyncErrorKind) {
        self.table_errors.push(error);
    }

    /// Folds a later phase's result into this one.
    ///
    /// Tables are unioned, counts summed, conflicts and table errors
    /// concatenated. The first fatal error is kept.
    pub fn absorb(&mut self, other: SyncResult) {
        for table in other.synced_tables {
            if !self.synced_tables.contains(&table) {
                self.synced_tables.push(table);
            }
        }
        self.record_count += other.record_count;
        self.conflicts.extend(other.conflicts);
        self.table_errors.extend(other.table_errors);
        if self.error.is_none() {
            self.error = other.error;
        }
    }
}
