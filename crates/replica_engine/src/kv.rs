//! File-backed key-value store for sync state.

use crate::error::EngineResult;
use crate::store::KeyValueStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A key-value store persisted as a single JSON object.
///
/// The whole map is loaded on open and rewritten on every `set`. Writes go
/// to a sibling temporary file which is then renamed over the target, so a
/// crash mid-write leaves the previous contents intact.
///
/// # Example
///
/// ```no_run
/// use replica_engine::{FileKeyValueStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileKeyValueStore::open(Path::new("state/sync.json")).unwrap();
/// store.set("last_sync_timestamp", "2024-05-01T10:00:00Z").unwrap();
/// ```
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a
    /// JSON object of strings.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let values = match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> EngineResult<()> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(serde_json::to_string_pretty(values)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&values) {
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }
}
