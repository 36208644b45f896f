//! Collaborator interfaces consumed by the engine.
//!
//! These traits abstract the local persistent store, the remote multi-writer
//! store, connectivity detection and a small key-value store for sync state.
//! All of them are blocking: a network call may park the calling thread.

use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use replica_protocol::{ChangeEvent, Record, RecordId, TableName};
use std::sync::Arc;

/// Callback invoked by a remote store for every change on a subscribed table.
pub type EventCallback = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// The local, offline-capable store.
pub trait LocalStore: Send + Sync {
    /// Reads every record of a table.
    fn fetch_all(&self, table: TableName) -> EngineResult<Vec<Record>>;

    /// Upserts a batch of records in one write.
    ///
    /// Records applied here came from the remote store; implementations must
    /// not newly flag them dirty.
    fn batch_apply(&self, table: TableName, records: &[Record]) -> EngineResult<()>;

    /// Deletes a record by identity. Deleting a missing record succeeds.
    fn delete(&self, table: TableName, id: &RecordId) -> EngineResult<()>;

    /// Reads the records with unsynced local changes.
    ///
    /// Stores without dirty tracking return every record.
    fn fetch_dirty(&self, table: TableName) -> EngineResult<Vec<Record>>;

    /// Clears the dirty flag of records that were uploaded.
    ///
    /// Implementations should only clear a record whose current contents
    /// still equal the uploaded version, so an edit made during the upload
    /// stays dirty.
    fn mark_clean(&self, table: TableName, records: &[Record]) -> EngineResult<()> {
        let _ = (table, records);
        Ok(())
    }
}

/// The remote, multi-writer store.
pub trait RemoteStore: Send + Sync {
    /// Fetches a table, or only the records updated after `since`.
    fn select(&self, table: TableName, since: Option<DateTime<Utc>>) -> EngineResult<Vec<Record>>;

    /// Upserts a batch keyed by `conflict_key`.
    fn upsert(&self, table: TableName, records: &[Record], conflict_key: &str) -> EngineResult<()>;

    /// Opens a change feed on one table.
    fn subscribe(
        &self,
        table: TableName,
        on_event: EventCallback,
    ) -> EngineResult<Box<dyn Subscription>>;
}

/// An open change feed.
pub trait Subscription: Send {
    /// Closes the feed. Calling it again is a no-op.
    fn unsubscribe(&mut self);
}

/// Connectivity detection.
pub trait Connectivity: Send + Sync {
    /// Returns true if the remote store is reachable.
    fn is_online(&self) -> bool;
}

/// Small persistent key-value store for sync state.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> EngineResult<Option<String>>;

    /// Writes a value.
    fn set(&self, key: &str, value: &str) -> EngineResult<()>;
}

/// A local store paired with the write lock every writer shares.
///
/// Bulk pull commits and realtime applies both go through [`write`], so a
/// realtime event can never land in the middle of a batched commit. Reads
/// for push go through [`store`] without the lock.
///
/// [`write`]: GuardedStore::write
/// [`store`]: GuardedStore::store
pub struct GuardedStore<L: LocalStore> {
    store: Arc<L>,
    write_lock: Arc<Mutex<()>>,
}

impl<L: LocalStore> GuardedStore<L> {
    /// Wraps a local store with a fresh write lock.
    pub fn new(store: Arc<L>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the store for lock-free reads.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// Acquires exclusive write access to the store.
    pub fn write(&self) -> LocalWriteGuard<'_, L> {
        LocalWriteGuard {
            store: &self.store,
            _guard: self.write_lock.lock(),
        }
    }
}

impl<L: LocalStore> Clone for GuardedStore<L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

/// Exclusive write access to a local store; released on drop.
pub struct LocalWriteGuard<'a, L: LocalStore> {
    store: &'a L,
    _guard: MutexGuard<'a, ()>,
}

impl<L: LocalStore> std::ops::Deref for LocalWriteGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}
