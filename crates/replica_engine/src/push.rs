//! Uploading local changes to the remote store.

use crate::error::{EngineResult, SyncError};
use crate::store::{GuardedStore, LocalStore, RemoteStore};
use replica_protocol::{SyncErrorKind, SyncResult, TableName};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads dirty records per table and upserts them remotely.
///
/// Push never resolves conflicts; the remote upsert is last-write-wins.
pub struct PushEngine<L: LocalStore, R: RemoteStore> {
    local: GuardedStore<L>,
    remote: Arc<R>,
    conflict_key: String,
}

impl<L: LocalStore, R: RemoteStore> PushEngine<L, R> {
    /// Creates a push engine upserting on `conflict_key`.
    pub fn new(local: GuardedStore<L>, remote: Arc<R>, conflict_key: impl Into<String>) -> Self {
        Self {
            local,
            remote,
            conflict_key: conflict_key.into(),
        }
    }

    /// Pushes the dirty records of the given tables.
    ///
    /// Upload failures skip the table and are collected in `table_errors`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalRead`] if dirty records cannot be read.
    pub fn push(&self, tables: &[TableName]) -> EngineResult<SyncResult> {
        info!(tables = tables.len(), "push started");
        let mut result = SyncResult::new();

        for &table in tables {
            let dirty = self
                .local
                .store()
                .fetch_dirty(table)
                .map_err(|err| SyncError::LocalRead {
                    table,
                    message: err.detail(),
                })?;

            if dirty.is_empty() {
                debug!(table = %table, "nothing to push");
                result.record_table(table, 0);
                continue;
            }

            if let Err(err) = self.remote.upsert(table, &dirty, &self.conflict_key) {
                warn!(table = %table, records = dirty.len(), error = %err, "skipping table: upload failed");
                result.record_table_error(SyncErrorKind::RemoteUpload {
                    table,
                    message: err.detail(),
                });
                continue;
            }

            if let Err(err) = self.local.store().mark_clean(table, &dirty) {
                // The upload succeeded; the records will be re-sent next time.
                warn!(table = %table, error = %err, "failed to clear dirty flags");
            }
            debug!(table = %table, records = dirty.len(), "table pushed");
            result.record_table(table, dirty.len());
        }

        info!(
            tables = result.synced_tables.len(),
            records = result.record_count,
            skipped = result.table_errors.len(),
            "push finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLocalStore, MemoryRemoteStore};
    use replica_protocol::{Record, RecordId};

    fn engine() -> (
        Arc<MemoryLocalStore>,
        Arc<MemoryRemoteStore>,
        PushEngine<MemoryLocalStore, MemoryRemoteStore>,
    ) {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = PushEngine::new(
            GuardedStore::new(Arc::clone(&local)),
            Arc::clone(&remote),
            "id",
        );
        (local, remote, engine)
    }

    #[test]
    fn uploads_dirty_records_only() {
        let (local, remote, engine) = engine();
        local.seed(TableName::Products, [Record::new().with("id", 1)]);
        local
            .save(TableName::Products, Record::new().with("id", 2).with("price", 5))
            .unwrap();

        let result = engine.push(&[TableName::Products]).unwrap();

        assert_eq!(result.record_count, 1);
        assert_eq!(result.synced_tables, vec![TableName::Products]);
        assert_eq!(remote.len(TableName::Products), 1);
        assert!(remote.get(TableName::Products, &RecordId::from(2)).is_some());
        assert!(local.dirty_ids(TableName::Products).is_empty());
    }

    #[test]
    fn upload_failure_skips_table() {
        let (local, remote, engine) = engine();
        local
            .save(TableName::Sales, Record::new().with("id", 1))
            .unwrap();
        local
            .save(TableName::Expenses, Record::new().with("id", 2))
            .unwrap();
        remote.set_upload_failure(TableName::Sales, true);

        let result = engine
            .push(&[TableName::Sales, TableName::Expenses])
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.synced_tables, vec![TableName::Expenses]);
        assert_eq!(result.table_errors[0].table(), Some(TableName::Sales));
        assert_eq!(local.dirty_ids(TableName::Sales), vec![RecordId::from(1)]);
        assert!(local.dirty_ids(TableName::Expenses).is_empty());
    }

    #[test]
    fn clean_tables_count_as_synced() {
        let (_local, _remote, engine) = engine();
        let result = engine.push(&[TableName::Suppliers]).unwrap();
        assert_eq!(result.synced_tables, vec![TableName::Suppliers]);
        assert_eq!(result.record_count, 0);
    }

    #[test]
    fn push_is_idempotent() {
        let (local, remote, engine) = engine();
        local
            .save(TableName::Products, Record::new().with("id", 1))
            .unwrap();

        engine.push(&[TableName::Products]).unwrap();
        let second = engine.push(&[TableName::Products]).unwrap();

        assert_eq!(second.record_count, 0);
        assert_eq!(remote.len(TableName::Products), 1);
    }
}
