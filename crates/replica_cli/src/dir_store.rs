//! Directory-backed stores.
//!
//! Each table lives in `<dir>/<table>.json` as a JSON array of records. The
//! same type serves as the local and the remote side; the CLI points one
//! instance at each directory.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use replica_engine::{
    Connectivity, EngineResult, EventCallback, LocalStore, RemoteStore, Subscription, SyncError,
};
use replica_protocol::{Record, RecordId, TableName, UPDATED_AT_FIELD};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A store keeping one JSON file per table.
#[derive(Debug)]
pub struct JsonDirStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    /// Opens a directory store, creating the directory if needed.
    pub fn open(root: &Path) -> EngineResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Points at a directory without creating it.
    ///
    /// Used for the remote side, whose absence means "offline".
    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn table_path(&self, table: TableName) -> PathBuf {
        self.root.join(format!("{table}.json"))
    }

    /// Reads a table; a missing file is an empty table.
    pub fn read_table(&self, table: TableName) -> EngineResult<Vec<Record>> {
        match fs::read_to_string(self.table_path(table)) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_table(&self, table: TableName, records: &[Record]) -> EngineResult<()> {
        let path = self.table_path(table);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(records)?)?;
        fs::rename(&tmp, &path)?;
        debug!(table = %table, records = records.len(), path = %path.display(), "table written");
        Ok(())
    }

    /// Upserts records keyed by `key`, keeping file order for existing rows.
    fn merge_into(&self, table: TableName, records: &[Record], key: &str) -> EngineResult<()> {
        let _guard = self.write_lock.lock();
        let mut rows = self.read_table(table)?;
        let mut index: HashMap<RecordId, usize> = rows
            .iter()
            .enumerate()
            .filter_map(|(position, row)| {
                row.get(key)
                    .and_then(RecordId::from_value)
                    .map(|id| (id, position))
            })
            .collect();
        for record in records {
            let id = record.get(key).and_then(RecordId::from_value).ok_or_else(|| {
                SyncError::Storage(format!("record in {table} without `{key}`"))
            })?;
            match index.get(&id) {
                Some(&position) => rows[position] = record.clone(),
                None => {
                    index.insert(id, rows.len());
                    rows.push(record.clone());
                }
            }
        }
        self.write_table(table, &rows)
    }
}

impl LocalStore for JsonDirStore {
    fn fetch_all(&self, table: TableName) -> EngineResult<Vec<Record>> {
        self.read_table(table)
    }

    fn batch_apply(&self, table: TableName, records: &[Record]) -> EngineResult<()> {
        self.merge_into(table, records, replica_protocol::ID_FIELD)
    }

    fn delete(&self, table: TableName, id: &RecordId) -> EngineResult<()> {
        let _guard = self.write_lock.lock();
        let mut rows = self.read_table(table)?;
        let before = rows.len();
        rows.retain(|row| row.id().as_ref() != Some(id));
        if rows.len() != before {
            self.write_table(table, &rows)?;
        }
        Ok(())
    }

    /// Files carry no dirty flags, so every record is pushed.
    fn fetch_dirty(&self, table: TableName) -> EngineResult<Vec<Record>> {
        self.read_table(table)
    }
}

impl RemoteStore for JsonDirStore {
    fn select(&self, table: TableName, since: Option<DateTime<Utc>>) -> EngineResult<Vec<Record>> {
        let rows = self
            .read_table(table)
            .map_err(|err| SyncError::transport_fatal(err.to_string()))?;
        Ok(match since {
            Some(since) => rows
                .into_iter()
                .filter(|row| {
                    row.timestamp(UPDATED_AT_FIELD)
                        .is_some_and(|updated| updated > since)
                })
                .collect(),
            None => rows,
        })
    }

    fn upsert(&self, table: TableName, records: &[Record], conflict_key: &str) -> EngineResult<()> {
        self.merge_into(table, records, conflict_key)
            .map_err(|err| SyncError::transport_fatal(err.to_string()))
    }

    fn subscribe(
        &self,
        table: TableName,
        _on_event: EventCallback,
    ) -> EngineResult<Box<dyn Subscription>> {
        Err(SyncError::transport_fatal(format!(
            "directory store has no change feed for {table}"
        )))
    }
}

/// Treats a remote directory as reachable when it exists.
#[derive(Debug)]
pub struct DirConnectivity {
    root: PathBuf,
}

impl DirConnectivity {
    /// Watches `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Connectivity for DirConnectivity {
    fn is_online(&self) -> bool {
        self.root.is_dir()
    }
}
