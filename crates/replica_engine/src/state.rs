//! Sync status and the persisted watermark.

use crate::error::{EngineResult, SyncError};
use crate::store::KeyValueStore;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use replica_protocol::TableName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Current status of the sync state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SyncStatus {
    /// No sync is running.
    #[default]
    Idle,
    /// A pull, push or two-way sync is in flight.
    Syncing,
    /// The last sync failed fatally.
    Error(String),
}

impl SyncStatus {
    /// Returns true if a sync is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }

    /// Returns true if a new sync may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("idle"),
            SyncStatus::Syncing => f.write_str("syncing"),
            SyncStatus::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Snapshot of the sync state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncState {
    /// Start of the last pull in which every requested table synced.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    /// Current status.
    pub status: SyncStatus,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    /// Operations that finished without a fatal error.
    pub cycles_completed: u64,
    /// Remote records fetched by pulls.
    pub records_pulled: u64,
    /// Local records uploaded by pushes.
    pub records_pushed: u64,
    /// Conflicts detected and resolved.
    pub conflicts_encountered: u64,
    /// Message of the last fatal error, cleared by the next success.
    pub last_error: Option<String>,
    /// When the last successful operation finished.
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Owns the watermarks and the status.
///
/// Every table has its own watermark, persisted through a [`KeyValueStore`]
/// under `"{key}:{table}"` as an RFC 3339 string. Selective pulls fetch a
/// table's changes since its own watermark, so a table that was skipped or
/// not part of a pull is never moved past changes it has not seen.
///
/// The global watermark under `key` is the start of the last pull in which
/// every requested table synced; it is what callers see as the last sync.
/// The status lives in memory only. No watermark ever moves backwards.
pub struct SyncStateStore {
    kv: Box<dyn KeyValueStore>,
    key: String,
    state: RwLock<SyncState>,
    tables: RwLock<BTreeMap<TableName, DateTime<Utc>>>,
}

impl SyncStateStore {
    /// Loads the state persisted under `key`.
    ///
    /// An unreadable stored watermark is discarded with a warning, which
    /// makes the next selective pull of that table a full one.
    pub fn load(kv: Box<dyn KeyValueStore>, key: impl Into<String>) -> EngineResult<Self> {
        let key = key.into();
        let last_sync_timestamp = read_watermark(kv.as_ref(), &key)?;

        let mut tables = BTreeMap::new();
        for table in TableName::ALL {
            if let Some(watermark) = read_watermark(kv.as_ref(), &table_key(&key, table))? {
                tables.insert(table, watermark);
            }
        }

        Ok(Self {
            kv,
            key,
            state: RwLock::new(SyncState {
                last_sync_timestamp,
                status: SyncStatus::Idle,
            }),
            tables: RwLock::new(tables),
        })
    }

    /// Returns the global watermark.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_sync_timestamp
    }

    /// Returns the watermark of one table.
    pub fn table_watermark(&self, table: TableName) -> Option<DateTime<Utc>> {
        self.tables.read().get(&table).copied()
    }

    /// Returns every table watermark, ordered by table.
    pub fn table_watermarks(&self) -> BTreeMap<TableName, DateTime<Utc>> {
        self.tables.read().clone()
    }

    /// Returns the status.
    pub fn status(&self) -> SyncStatus {
        self.state.read().status.clone()
    }

    /// Returns a snapshot of the whole state.
    pub fn snapshot(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Sets the status.
    pub fn set_status(&self, status: SyncStatus) {
        self.state.write().status = status;
    }

    /// Advances the global watermark to `timestamp` and persists it.
    ///
    /// A timestamp at or before the current watermark leaves it unchanged.
    /// Returns the watermark in effect afterwards.
    pub fn advance_watermark(&self, timestamp: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        let mut state = self.state.write();
        let current = state.last_sync_timestamp;
        let advanced = self.persist(&self.key, current, timestamp)?;
        state.last_sync_timestamp = Some(advanced);
        Ok(advanced)
    }

    /// Advances the watermark of `table` to `timestamp` and persists it.
    pub fn advance_table_watermark(
        &self,
        table: TableName,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<DateTime<Utc>> {
        let mut tables = self.tables.write();
        let current = tables.get(&table).copied();
        let advanced = self.persist(&table_key(&self.key, table), current, timestamp)?;
        tables.insert(table, advanced);
        Ok(advanced)
    }

    fn persist(
        &self,
        key: &str,
        current: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<DateTime<Utc>> {
        if let Some(current) = current {
            if timestamp <= current {
                debug!(key, current = %current, proposed = %timestamp, "watermark not advanced");
                return Ok(current);
            }
        }

        let encoded = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.kv
            .set(key, &encoded)
            .map_err(|err| SyncError::State(format!("failed to persist watermark {key}: {err}")))?;
        debug!(key, watermark = %encoded, "watermark advanced");
        Ok(timestamp)
    }
}

fn table_key(key: &str, table: TableName) -> String {
    format!("{key}:{table}")
}

fn read_watermark(kv: &dyn KeyValueStore, key: &str) -> EngineResult<Option<DateTime<Utc>>> {
    Ok(match kv.get(key)? {
        Some(raw) => match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(err) => {
                warn!(key, value = %raw, error = %err, "discarding unreadable watermark");
                None
            }
        },
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyValueStore;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::Arc;

    struct SharedKv(Arc<MemoryKeyValueStore>);

    impl KeyValueStore for SharedKv {
        fn get(&self, key: &str) -> EngineResult<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> EngineResult<()> {
            self.0.set(key, value)
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn status_checks() {
        assert!(SyncStatus::Idle.can_start_sync());
        assert!(SyncStatus::Error("x".into()).can_start_sync());
        assert!(!SyncStatus::Syncing.can_start_sync());
        assert!(SyncStatus::Syncing.is_active());
        assert_eq!(SyncStatus::Error("boom".into()).to_string(), "error: boom");
    }

    #[test]
    fn fresh_state_is_idle_without_watermark() {
        let store = SyncStateStore::load(Box::new(MemoryKeyValueStore::new()), "wm").unwrap();
        assert_eq!(store.snapshot(), SyncState::default());
    }

    #[test]
    fn watermark_persists_and_reloads() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SyncStateStore::load(Box::new(SharedKv(Arc::clone(&kv))), "wm").unwrap();
        store.advance_watermark(at(10)).unwrap();

        let reloaded = SyncStateStore::load(Box::new(SharedKv(kv)), "wm").unwrap();
        assert_eq!(reloaded.last_sync(), Some(at(10)));
    }

    #[test]
    fn watermark_never_regresses() {
        let store = SyncStateStore::load(Box::new(MemoryKeyValueStore::new()), "wm").unwrap();
        store.advance_watermark(at(10)).unwrap();
        assert_eq!(store.advance_watermark(at(5)).unwrap(), at(10));
        assert_eq!(store.last_sync(), Some(at(10)));
    }

    #[test]
    fn failed_persist_keeps_old_watermark() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SyncStateStore::load(Box::new(SharedKv(Arc::clone(&kv))), "wm").unwrap();
        store.advance_watermark(at(1)).unwrap();

        kv.set_write_failure(true);
        assert!(matches!(
            store.advance_watermark(at(2)),
            Err(SyncError::State(_))
        ));
        assert_eq!(store.last_sync(), Some(at(1)));
    }

    #[test]
    fn unreadable_watermark_is_discarded() {
        let kv = MemoryKeyValueStore::new();
        kv.set("wm", "last tuesday").unwrap();
        let store = SyncStateStore::load(Box::new(kv), "wm").unwrap();
        assert_eq!(store.last_sync(), None);
    }

    #[test]
    fn sub_second_precision_survives_reload() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SyncStateStore::load(Box::new(SharedKv(Arc::clone(&kv))), "wm").unwrap();
        let precise = at(0) + Duration::microseconds(123_456);
        store.advance_watermark(precise).unwrap();

        let reloaded = SyncStateStore::load(Box::new(SharedKv(kv)), "wm").unwrap();
        assert_eq!(reloaded.last_sync(), Some(precise));
    }

    #[test]
    fn table_watermarks_are_independent() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = SyncStateStore::load(Box::new(SharedKv(Arc::clone(&kv))), "wm").unwrap();
        store
            .advance_table_watermark(TableName::Products, at(10))
            .unwrap();

        assert_eq!(store.table_watermark(TableName::Products), Some(at(10)));
        assert_eq!(store.table_watermark(TableName::Customers), None);
        assert_eq!(store.last_sync(), None);
        assert_eq!(
            kv.get("wm:products").unwrap().as_deref(),
            Some("2023-11-14T22:13:30.000000Z")
        );

        let reloaded = SyncStateStore::load(Box::new(SharedKv(kv)), "wm").unwrap();
        assert_eq!(
            reloaded.table_watermarks().into_iter().collect::<Vec<_>>(),
            vec![(TableName::Products, at(10))]
        );
    }

    #[test]
    fn table_watermark_never_regresses() {
        let store = SyncStateStore::load(Box::new(MemoryKeyValueStore::new()), "wm").unwrap();
        store.advance_table_watermark(TableName::Sales, at(10)).unwrap();
        assert_eq!(
            store.advance_table_watermark(TableName::Sales, at(3)).unwrap(),
            at(10)
        );
    }

    proptest! {
        #[test]
        fn watermark_is_monotonic(offsets in prop::collection::vec(0i64..1_000_000, 1..20)) {
            let store = SyncStateStore::load(Box::new(MemoryKeyValueStore::new()), "wm").unwrap();
            let mut previous = None;
            for offset in offsets {
                store.advance_watermark(at(offset)).unwrap();
                let current = store.last_sync();
                prop_assert!(current >= previous);
                previous = current;
            }
        }
    }
}
