//! # Replica Protocol
//!
//! Data model shared by every part of the replica sync engine.
//!
//! This crate provides:
//! - `Record` and `RecordId` for opaque, keyed JSON-like rows
//! - `TableName`, the closed set of synchronized tables
//! - `ConflictRecord` and `ConflictResolutionStrategy` with the pure
//!   `resolve` function
//! - `ChangeEvent` for realtime change feeds
//! - `SyncResult` and `SyncErrorKind` describing one sync pass
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod conflict;
mod error;
mod record;
mod result;
mod table;

pub use change_feed::{ChangeEvent, ChangeType};
pub use conflict::{resolve, ConflictRecord, ConflictResolutionStrategy, ConflictType};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{parse_timestamp, Record, RecordId, ID_FIELD, UPDATED_AT_FIELD};
pub use result::{SyncErrorKind, SyncResult};
pub use table::TableName;
