//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or parsing protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A table name outside the known set.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A conflict resolution strategy name that could not be parsed.
    #[error("unknown conflict resolution strategy: {0}")]
    UnknownStrategy(String),

    /// A change event type that could not be parsed.
    #[error("unknown change type: {0}")]
    UnknownChangeType(String),

    /// A record that is structurally unusable (not an object, no identity).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
