//! Pulling remote changes into the local store.

use crate::error::{EngineResult, SyncError};
use crate::state::SyncStateStore;
use crate::store::{GuardedStore, LocalStore, RemoteStore};
use chrono::{DateTime, Utc};
use replica_protocol::{
    ConflictRecord, ConflictResolutionStrategy, Record, RecordId, SyncErrorKind, SyncResult,
    TableName,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Fetches remote records per table, resolves conflicts against the local
/// store and commits one batch per table.
pub struct PullEngine<L: LocalStore, R: RemoteStore> {
    local: GuardedStore<L>,
    remote: Arc<R>,
    state: Arc<SyncStateStore>,
}

impl<L: LocalStore, R: RemoteStore> PullEngine<L, R> {
    /// Creates a pull engine.
    pub fn new(local: GuardedStore<L>, remote: Arc<R>, state: Arc<SyncStateStore>) -> Self {
        Self {
            local,
            remote,
            state,
        }
    }

    /// Pulls the given tables.
    ///
    /// A selective pull only fetches records of a table updated after that
    /// table's watermark; without one it degrades to a full fetch of the
    /// table. Per-table fetch failures are collected in `table_errors` and
    /// the table is skipped. A failed local commit or read aborts the pull.
    ///
    /// Each table that commits advances its own watermark to the instant
    /// the pull started, so records written remotely while the pull ran are
    /// fetched again by the next selective pull. A skipped table keeps its
    /// watermark. The global watermark only advances when every table
    /// synced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalRead`], [`SyncError::LocalCommit`] or
    /// [`SyncError::State`]; the global watermark is left unchanged.
    pub fn pull(
        &self,
        tables: &[TableName],
        selective: bool,
        strategy: &ConflictResolutionStrategy,
    ) -> EngineResult<SyncResult> {
        let started_at = Utc::now();
        info!(
            tables = tables.len(),
            selective,
            strategy = %strategy,
            "pull started"
        );

        let mut result = SyncResult::new();
        for &table in tables {
            let since = if selective {
                self.state.table_watermark(table)
            } else {
                None
            };
            if self.pull_table(table, since, strategy, &mut result)? {
                self.state.advance_table_watermark(table, started_at)?;
            }
        }

        if result.table_errors.is_empty() {
            self.state.advance_watermark(started_at)?;
        } else {
            warn!(
                skipped = result.table_errors.len(),
                "global watermark kept: not every table synced"
            );
        }
        info!(
            tables = result.synced_tables.len(),
            records = result.record_count,
            conflicts = result.conflicts.len(),
            skipped = result.table_errors.len(),
            "pull finished"
        );
        Ok(result)
    }

    /// Pulls one table. Returns false when the fetch failed and the table
    /// was skipped.
    fn pull_table(
        &self,
        table: TableName,
        since: Option<DateTime<Utc>>,
        strategy: &ConflictResolutionStrategy,
        result: &mut SyncResult,
    ) -> EngineResult<bool> {
        // The network call happens outside the write lock so realtime
        // applies keep flowing while a slow fetch is in progress.
        let fetched = match self.remote.select(table, since) {
            Ok(records) => records,
            Err(err) => {
                warn!(table = %table, error = %err, "skipping table: remote fetch failed");
                result.record_table_error(SyncErrorKind::RemoteFetch {
                    table,
                    message: err.detail(),
                });
                return Ok(false);
            }
        };
        debug!(table = %table, records = fetched.len(), "fetched remote records");

        let store = self.local.write();
        let mut local: HashMap<RecordId, Record> = store
            .fetch_all(table)
            .map_err(|err| SyncError::LocalRead {
                table,
                message: err.detail(),
            })?
            .into_iter()
            .filter_map(|record| record.id().map(|id| (id, record)))
            .collect();

        let mut batch = Vec::new();
        for remote in &fetched {
            let Some(id) = remote.id() else {
                warn!(table = %table, "ignoring remote record without an id");
                continue;
            };

            let resolved = match local.get(&id) {
                None => {
                    trace!(table = %table, id = %id, "new remote record");
                    remote.clone()
                }
                Some(existing) if existing == remote => {
                    trace!(table = %table, id = %id, "record unchanged");
                    continue;
                }
                Some(existing) => {
                    let conflict =
                        ConflictRecord::update(table, id.clone(), existing.clone(), remote.clone());
                    let resolved = conflict.resolve(strategy);
                    debug!(
                        table = %table,
                        id = %id,
                        fields = ?conflict.differing_fields(),
                        strategy = strategy.name(),
                        "resolved conflict"
                    );
                    result.conflicts.push(conflict);
                    if &resolved == existing {
                        continue;
                    }
                    resolved
                }
            };

            local.insert(id, resolved.clone());
            batch.push(resolved);
        }

        if !batch.is_empty() {
            store.batch_apply(table, &batch).map_err(|err| {
                error!(table = %table, error = %err, "local commit failed");
                SyncError::LocalCommit {
                    table,
                    message: err.detail(),
                }
            })?;
        }
        debug!(table = %table, applied = batch.len(), "table pulled");
        result.record_table(table, fetched.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKeyValueStore, MemoryLocalStore, MemoryRemoteStore};
    use replica_protocol::ConflictType;

    struct Fixture {
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        state: Arc<SyncStateStore>,
        engine: PullEngine<MemoryLocalStore, MemoryRemoteStore>,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let state = Arc::new(
            SyncStateStore::load(Box::new(MemoryKeyValueStore::new()), "wm").unwrap(),
        );
        let engine = PullEngine::new(
            GuardedStore::new(Arc::clone(&local)),
            Arc::clone(&remote),
            Arc::clone(&state),
        );
        Fixture {
            local,
            remote,
            state,
            engine,
        }
    }

    fn product(id: i64, price: i64, updated_at: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("price", price)
            .with("updated_at", updated_at)
    }

    #[test]
    fn fresh_pull_copies_everything() {
        let f = fixture();
        f.remote.seed(
            TableName::Products,
            (1..=3).map(|id| product(id, 10, "2024-01-01T00:00:00Z")),
        );

        let result = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::ServerWins)
            .unwrap();

        assert_eq!(result.synced_tables, vec![TableName::Products]);
        assert_eq!(result.record_count, 3);
        assert!(result.conflicts.is_empty());
        assert_eq!(f.local.len(TableName::Products), 3);
        assert_eq!(f.local.batch_writes(), 1);
        assert!(f.state.last_sync().is_some());
    }

    #[test]
    fn conflicting_update_resolves_newer() {
        let f = fixture();
        f.local
            .seed(TableName::Products, [product(1, 10, "2024-01-01T00:00:00Z")]);
        f.remote
            .seed(TableName::Products, [product(1, 12, "2024-01-02T00:00:00Z")]);

        let result = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::newer_wins())
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::Update);
        let stored = f.local.get(TableName::Products, &RecordId::from(1)).unwrap();
        assert_eq!(stored.get("price"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn local_winner_is_not_rewritten() {
        let f = fixture();
        f.local
            .seed(TableName::Products, [product(1, 10, "2024-01-03T00:00:00Z")]);
        f.remote
            .seed(TableName::Products, [product(1, 12, "2024-01-02T00:00:00Z")]);

        let result = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::ClientWins)
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(f.local.batch_writes(), 0);
    }

    #[test]
    fn second_pull_is_a_no_op() {
        let f = fixture();
        f.remote.seed(
            TableName::Products,
            (1..=3).map(|id| product(id, 10, "2024-01-01T00:00:00Z")),
        );
        let strategy = ConflictResolutionStrategy::ServerWins;

        f.engine.pull(&[TableName::Products], false, &strategy).unwrap();
        let before = f.local.records(TableName::Products);
        let second = f.engine.pull(&[TableName::Products], false, &strategy).unwrap();

        assert!(second.conflicts.is_empty());
        assert_eq!(f.local.records(TableName::Products), before);
        assert_eq!(f.local.batch_writes(), 1);
    }

    #[test]
    fn fetch_failure_skips_only_that_table() {
        let f = fixture();
        f.remote
            .seed(TableName::Products, [product(1, 10, "2024-01-01T00:00:00Z")]);
        f.remote
            .seed(TableName::Customers, [Record::new().with("id", 7)]);
        f.remote.set_fetch_failure(TableName::Products, true);

        let result = f
            .engine
            .pull(
                &[TableName::Products, TableName::Customers],
                false,
                &ConflictResolutionStrategy::ServerWins,
            )
            .unwrap();

        assert_eq!(result.synced_tables, vec![TableName::Customers]);
        assert_eq!(result.table_errors.len(), 1);
        assert_eq!(result.table_errors[0].table(), Some(TableName::Products));
        assert!(result.is_success());
        assert_eq!(f.local.len(TableName::Customers), 1);
        assert_eq!(f.local.len(TableName::Products), 0);
        assert_eq!(f.state.last_sync(), None);
        assert_eq!(f.state.table_watermark(TableName::Products), None);
        assert!(f.state.table_watermark(TableName::Customers).is_some());
    }

    #[test]
    fn skipped_table_refetches_changes_after_recovery() {
        let f = fixture();
        let strategy = ConflictResolutionStrategy::ServerWins;
        let tables = [TableName::Products, TableName::Customers];
        f.engine.pull(&tables, true, &strategy).unwrap();
        let synced_at = f.state.last_sync();

        let now = Utc::now().to_rfc3339();
        f.remote.seed(TableName::Products, [product(1, 10, &now)]);
        f.remote.set_fetch_failure(TableName::Products, true);
        let partial = f.engine.pull(&tables, true, &strategy).unwrap();
        assert_eq!(partial.table_errors.len(), 1);
        assert_eq!(f.state.last_sync(), synced_at);

        f.remote.set_fetch_failure(TableName::Products, false);
        let retry = f.engine.pull(&tables, true, &strategy).unwrap();
        assert_eq!(retry.record_count, 1);
        assert!(f.local.get(TableName::Products, &RecordId::from(1)).is_some());
        assert!(f.state.last_sync() > synced_at);
    }

    #[test]
    fn pulling_one_table_leaves_others_behind() {
        let f = fixture();
        let strategy = ConflictResolutionStrategy::ServerWins;
        let customer = Record::new()
            .with("id", 7)
            .with("updated_at", "2024-01-01T00:00:00Z");
        f.remote.seed(TableName::Customers, [customer]);

        f.engine.pull(&[TableName::Products], true, &strategy).unwrap();
        assert_eq!(f.state.table_watermark(TableName::Customers), None);

        let customers = f.engine.pull(&[TableName::Customers], true, &strategy).unwrap();
        assert_eq!(customers.record_count, 1);
        assert_eq!(f.local.len(TableName::Customers), 1);
    }

    #[test]
    fn commit_failure_is_fatal_and_keeps_watermark() {
        let f = fixture();
        f.remote
            .seed(TableName::Products, [product(1, 10, "2024-01-01T00:00:00Z")]);
        f.local.set_commit_failure(TableName::Products, true);

        let err = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::ServerWins)
            .unwrap_err();

        assert!(matches!(err, SyncError::LocalCommit { table: TableName::Products, .. }));
        assert_eq!(f.state.last_sync(), None);
    }

    #[test]
    fn selective_pull_uses_watermark() {
        let f = fixture();
        f.remote
            .seed(TableName::Products, [product(1, 10, "2000-01-01T00:00:00Z")]);
        f.state
            .advance_table_watermark(TableName::Products, "2010-01-01T00:00:00Z".parse().unwrap())
            .unwrap();

        let selective = f
            .engine
            .pull(&[TableName::Products], true, &ConflictResolutionStrategy::ServerWins)
            .unwrap();
        assert_eq!(selective.record_count, 0);
        assert_eq!(selective.synced_tables, vec![TableName::Products]);

        let full = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::ServerWins)
            .unwrap();
        assert_eq!(full.record_count, 1);
    }

    #[test]
    fn records_without_id_are_ignored() {
        let f = fixture();
        f.remote
            .seed(TableName::Products, [product(1, 10, "2024-01-01T00:00:00Z")]);
        // `seed` drops records without an id, so go through a raw upsert.
        f.remote
            .upsert(
                TableName::Products,
                &[Record::new().with("sku", "X").with("name", "orphan")],
                "sku",
            )
            .unwrap();

        let result = f
            .engine
            .pull(&[TableName::Products], false, &ConflictResolutionStrategy::ServerWins)
            .unwrap();
        assert_eq!(result.record_count, 2);
        assert_eq!(f.local.len(TableName::Products), 1);
    }
}
