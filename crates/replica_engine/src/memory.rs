//! In-memory collaborators for testing and embedding.

use crate::error::{EngineResult, SyncError};
use crate::store::{
    Connectivity, EventCallback, KeyValueStore, LocalStore, RemoteStore, Subscription,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use replica_protocol::{ChangeEvent, Record, RecordId, TableName, UPDATED_AT_FIELD};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Table = BTreeMap<RecordId, Record>;

/// An in-memory local store with dirty tracking and failure injection.
#[derive(Default)]
pub struct MemoryLocalStore {
    tables: RwLock<HashMap<TableName, Table>>,
    dirty: RwLock<HashMap<TableName, BTreeSet<RecordId>>>,
    failing_commits: RwLock<HashSet<TableName>>,
    batch_writes: AtomicU64,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores records as already synced (not dirty).
    pub fn seed(&self, table: TableName, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table).or_default();
        for record in records {
            if let Some(id) = record.id() {
                rows.insert(id, record);
            }
        }
    }

    /// Saves a local edit and flags it dirty.
    pub fn save(&self, table: TableName, record: Record) -> EngineResult<()> {
        let id = record.require_id()?;
        self.tables
            .write()
            .entry(table)
            .or_default()
            .insert(id.clone(), record);
        self.dirty.write().entry(table).or_default().insert(id);
        Ok(())
    }

    /// Gets a record by identity.
    pub fn get(&self, table: TableName, id: &RecordId) -> Option<Record> {
        self.tables
            .read()
            .get(&table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Returns every record of a table, ordered by identity.
    pub fn records(&self, table: TableName) -> Vec<Record> {
        self.tables
            .read()
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records in a table.
    pub fn len(&self, table: TableName) -> usize {
        self.tables.read().get(&table).map_or(0, BTreeMap::len)
    }

    /// Identities currently flagged dirty.
    pub fn dirty_ids(&self, table: TableName) -> Vec<RecordId> {
        self.dirty
            .read()
            .get(&table)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes `batch_apply` fail for a table.
    pub fn set_commit_failure(&self, table: TableName, fail: bool) {
        let mut failing = self.failing_commits.write();
        if fail {
            failing.insert(table);
        } else {
            failing.remove(&table);
        }
    }

    /// Number of successful `batch_apply` calls so far.
    pub fn batch_writes(&self) -> u64 {
        self.batch_writes.load(Ordering::SeqCst)
    }
}

impl LocalStore for MemoryLocalStore {
    fn fetch_all(&self, table: TableName) -> EngineResult<Vec<Record>> {
        Ok(self.records(table))
    }

    fn batch_apply(&self, table: TableName, records: &[Record]) -> EngineResult<()> {
        if self.failing_commits.read().contains(&table) {
            return Err(SyncError::Storage(format!("injected commit failure on {table}")));
        }

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            staged.push((record.require_id()?, record.clone()));
        }

        let mut tables = self.tables.write();
        tables.entry(table).or_default().extend(staged);
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, table: TableName, id: &RecordId) -> EngineResult<()> {
        if let Some(rows) = self.tables.write().get_mut(&table) {
            rows.remove(id);
        }
        if let Some(ids) = self.dirty.write().get_mut(&table) {
            ids.remove(id);
        }
        Ok(())
    }

    fn fetch_dirty(&self, table: TableName) -> EngineResult<Vec<Record>> {
        let tables = self.tables.read();
        let dirty = self.dirty.read();
        let (Some(ids), Some(rows)) = (dirty.get(&table), tables.get(&table)) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    fn mark_clean(&self, table: TableName, records: &[Record]) -> EngineResult<()> {
        let tables = self.tables.read();
        let mut dirty = self.dirty.write();
        let (Some(rows), Some(ids)) = (tables.get(&table), dirty.get_mut(&table)) else {
            return Ok(());
        };
        for record in records {
            if let Some(id) = record.id() {
                if rows.get(&id) == Some(record) {
                    ids.remove(&id);
                }
            }
        }
        Ok(())
    }
}

type SharedCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
type SubscriberMap = HashMap<TableName, Vec<(u64, SharedCallback)>>;

/// An in-memory remote store with failure injection and change feeds.
#[derive(Default)]
pub struct MemoryRemoteStore {
    tables: RwLock<HashMap<TableName, Table>>,
    failing_fetches: RwLock<HashSet<TableName>>,
    failing_uploads: RwLock<HashSet<TableName>>,
    failing_subscribes: RwLock<HashSet<TableName>>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    next_subscriber: AtomicU64,
    select_calls: AtomicU64,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores records without notifying subscribers.
    pub fn seed(&self, table: TableName, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table).or_default();
        for record in records {
            if let Some(id) = record.id() {
                rows.insert(id, record);
            }
        }
    }

    /// Writes a record as another client would, notifying subscribers.
    pub fn put(&self, table: TableName, record: Record) -> EngineResult<()> {
        let id = record.require_id()?;
        let existed = self
            .tables
            .write()
            .entry(table)
            .or_default()
            .insert(id, record.clone())
            .is_some();
        let event = if existed {
            ChangeEvent::update(table, record)?
        } else {
            ChangeEvent::create(table, record)?
        };
        self.emit(event);
        Ok(())
    }

    /// Deletes a record as another client would, notifying subscribers.
    pub fn remove(&self, table: TableName, id: &RecordId) {
        if let Some(rows) = self.tables.write().get_mut(&table) {
            rows.remove(id);
        }
        self.emit(ChangeEvent::delete(table, id.clone()));
    }

    /// Delivers an event to every subscriber of its table, in order.
    pub fn emit(&self, event: ChangeEvent) {
        let callbacks: Vec<SharedCallback> = self
            .subscribers
            .read()
            .get(&event.table)
            .map(|subs| subs.iter().map(|(_, callback)| Arc::clone(callback)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Gets a record by identity.
    pub fn get(&self, table: TableName, id: &RecordId) -> Option<Record> {
        self.tables
            .read()
            .get(&table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Number of records in a table.
    pub fn len(&self, table: TableName) -> usize {
        self.tables.read().get(&table).map_or(0, BTreeMap::len)
    }

    /// Makes `select` fail for a table.
    pub fn set_fetch_failure(&self, table: TableName, fail: bool) {
        toggle(&self.failing_fetches, table, fail);
    }

    /// Makes `upsert` fail for a table.
    pub fn set_upload_failure(&self, table: TableName, fail: bool) {
        toggle(&self.failing_uploads, table, fail);
    }

    /// Makes `subscribe` fail for a table.
    pub fn set_subscribe_failure(&self, table: TableName, fail: bool) {
        toggle(&self.failing_subscribes, table, fail);
    }

    /// Number of open feeds on a table.
    pub fn subscriber_count(&self, table: TableName) -> usize {
        self.subscribers.read().get(&table).map_or(0, Vec::len)
    }

    /// Number of `select` calls so far.
    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn select(&self, table: TableName, since: Option<DateTime<Utc>>) -> EngineResult<Vec<Record>> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_fetches.read().contains(&table) {
            return Err(SyncError::transport_retryable(format!(
                "injected fetch failure on {table}"
            )));
        }

        let tables = self.tables.read();
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|record| match since {
                Some(since) => record
                    .timestamp(UPDATED_AT_FIELD)
                    .is_some_and(|updated| updated > since),
                None => true,
            })
            .cloned()
            .collect())
    }

    fn upsert(&self, table: TableName, records: &[Record], conflict_key: &str) -> EngineResult<()> {
        if self.failing_uploads.read().contains(&table) {
            return Err(SyncError::transport_retryable(format!(
                "injected upload failure on {table}"
            )));
        }

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let key = record
                .get(conflict_key)
                .and_then(RecordId::from_value)
                .ok_or_else(|| {
                    SyncError::transport_fatal(format!("record without `{conflict_key}`"))
                })?;
            staged.push((key, record.clone()));
        }

        self.tables.write().entry(table).or_default().extend(staged);
        Ok(())
    }

    fn subscribe(
        &self,
        table: TableName,
        on_event: EventCallback,
    ) -> EngineResult<Box<dyn Subscription>> {
        if self.failing_subscribes.read().contains(&table) {
            return Err(SyncError::transport_retryable(format!(
                "injected subscribe failure on {table}"
            )));
        }

        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let callback: SharedCallback = Arc::from(on_event);
        self.subscribers
            .write()
            .entry(table)
            .or_default()
            .push((id, callback));

        Ok(Box::new(MemorySubscription {
            id,
            table,
            subscribers: Arc::downgrade(&self.subscribers),
            active: true,
        }))
    }
}

struct MemorySubscription {
    id: u64,
    table: TableName,
    subscribers: Weak<RwLock<SubscriberMap>>,
    active: bool,
}

impl Subscription for MemorySubscription {
    fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Some(subs) = subscribers.write().get_mut(&self.table) {
                subs.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

fn toggle(set: &RwLock<HashSet<TableName>>, table: TableName, on: bool) {
    let mut set = set.write();
    if on {
        set.insert(table);
    } else {
        set.remove(&table);
    }
}

/// Connectivity fixed by the caller.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    /// Creates a connectivity source with the given state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Always online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Always offline.
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Changes the reported state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// An in-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `set` fail.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::State(format!("injected write failure for {key}")));
        }
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
