//! Error types for the sync engine.

use replica_protocol::{ProtocolError, SyncErrorKind, TableName};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Collaborators report raw failures as [`SyncError::Transport`] (remote) or
/// [`SyncError::Storage`] (local). The engines re-classify those into the
/// per-table variants before they reach a `SyncResult`.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No connectivity.
    #[error("offline: no network connectivity")]
    Offline,

    /// Another sync is already in flight.
    #[error("a sync is already in progress")]
    Busy,

    /// Network or remote store failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Fetching a table from the remote store failed.
    #[error("failed to fetch {table} from remote: {message}")]
    RemoteFetch {
        /// Table being fetched.
        table: TableName,
        /// Error message.
        message: String,
    },

    /// Uploading a table to the remote store failed.
    #[error("failed to upload {table} to remote: {message}")]
    RemoteUpload {
        /// Table being uploaded.
        table: TableName,
        /// Error message.
        message: String,
    },

    /// Committing pulled records to the local store failed.
    #[error("failed to commit {table} to local store: {message}")]
    LocalCommit {
        /// Table being committed.
        table: TableName,
        /// Error message.
        message: String,
    },

    /// Reading the local store failed.
    #[error("failed to read {table} from local store: {message}")]
    LocalRead {
        /// Table being read.
        table: TableName,
        /// Error message.
        message: String,
    },

    /// Opening a realtime feed failed.
    #[error("failed to subscribe to {table}: {message}")]
    Subscribe {
        /// Table being subscribed to.
        table: TableName,
        /// Error message.
        message: String,
    },

    /// Sync state could not be read or persisted.
    #[error("sync state error: {0}")]
    State(String),

    /// Protocol error (invalid record, unknown name).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Offline | SyncError::Busy => true,
            SyncError::RemoteFetch { .. } | SyncError::RemoteUpload { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error aborts a whole sync operation.
    ///
    /// Per-table remote failures are skipped; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// Classifies this error for reporting in a `SyncResult`.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Offline => SyncErrorKind::Offline,
            SyncError::Busy => SyncErrorKind::Busy,
            SyncError::RemoteFetch { table, message } => SyncErrorKind::RemoteFetch {
                table: *table,
                message: message.clone(),
            },
            SyncError::RemoteUpload { table, message } => SyncErrorKind::RemoteUpload {
                table: *table,
                message: message.clone(),
            },
            SyncError::LocalCommit { .. } | SyncError::Storage(_) => SyncErrorKind::LocalCommit {
                message: self.to_string(),
            },
            SyncError::LocalRead { .. } => SyncErrorKind::LocalRead {
                message: self.to_string(),
            },
            SyncError::State(_) | SyncError::Io(_) | SyncError::Json(_) => SyncErrorKind::State {
                message: self.to_string(),
            },
            SyncError::Transport { .. } | SyncError::Subscribe { .. } | SyncError::Protocol(_) => {
                SyncErrorKind::State {
                    message: self.to_string(),
                }
            }
        }
    }

    /// Error message without the variant prefix, for re-classification.
    pub(crate) fn detail(&self) -> String {
        match self {
            SyncError::Transport { message, .. } => message.clone(),
            SyncError::Storage(message) | SyncError::State(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
