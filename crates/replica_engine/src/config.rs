//! Configuration for the sync engine.

use replica_protocol::{ConflictResolutionStrategy, TableName, ID_FIELD};
use std::time::Duration;
use tracing::warn;

/// Default interval between automatic syncs.
pub const DEFAULT_AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default key under which the global watermark is persisted.
pub const DEFAULT_WATERMARK_KEY: &str = "last_sync_timestamp";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tables pulled and pushed, in processing order.
    pub tables: Vec<TableName>,
    /// Strategy used by automatic syncs.
    pub strategy: ConflictResolutionStrategy,
    /// Interval between automatic syncs.
    pub auto_sync_interval: Duration,
    /// Field the remote store upserts on.
    pub conflict_key: String,
    /// Key the global watermark is persisted under; table watermarks use
    /// `"{key}:{table}"`.
    pub watermark_key: String,
    /// Whether automatic syncs pull only changes since each table watermark.
    pub selective_auto_sync: bool,
}

impl SyncConfig {
    /// Creates a configuration syncing the given tables.
    pub fn new(tables: impl IntoIterator<Item = TableName>) -> Self {
        Self {
            tables: dedup(tables),
            strategy: ConflictResolutionStrategy::default(),
            auto_sync_interval: DEFAULT_AUTO_SYNC_INTERVAL,
            conflict_key: ID_FIELD.to_string(),
            watermark_key: DEFAULT_WATERMARK_KEY.to_string(),
            selective_auto_sync: true,
        }
    }

    /// Sets the synced tables.
    pub fn with_tables(mut self, tables: impl IntoIterator<Item = TableName>) -> Self {
        self.tables = dedup(tables);
        self
    }

    /// Sets the synced tables from free-form names.
    ///
    /// Unknown names are skipped with a warning.
    pub fn with_table_names<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let tables = names.into_iter().filter_map(|name| match name.parse() {
            Ok(table) => Some(table),
            Err(err) => {
                warn!(table = name, error = %err, "skipping unknown table");
                None
            }
        });
        self.tables = dedup(tables);
        self
    }

    /// Sets the strategy used by automatic syncs.
    pub fn with_strategy(mut self, strategy: ConflictResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the automatic sync interval.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Sets the remote upsert conflict key.
    pub fn with_conflict_key(mut self, key: impl Into<String>) -> Self {
        self.conflict_key = key.into();
        self
    }

    /// Sets the key the watermark is persisted under.
    pub fn with_watermark_key(mut self, key: impl Into<String>) -> Self {
        self.watermark_key = key.into();
        self
    }

    /// Sets whether automatic syncs are selective.
    pub fn with_selective_auto_sync(mut self, selective: bool) -> Self {
        self.selective_auto_sync = selective;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(TableName::ALL)
    }
}

fn dedup(tables: impl IntoIterator<Item = TableName>) -> Vec<TableName> {
    let mut out = Vec::new();
    for table in tables {
        if !out.contains(&table) {
            out.push(table);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.tables, TableName::ALL.to_vec());
        assert_eq!(config.auto_sync_interval, Duration::from_secs(300));
        assert_eq!(config.conflict_key, "id");
        assert_eq!(config.strategy, ConflictResolutionStrategy::newer_wins());
        assert!(config.selective_auto_sync);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new([TableName::Products])
            .with_strategy(ConflictResolutionStrategy::ServerWins)
            .with_auto_sync_interval(Duration::from_secs(60))
            .with_conflict_key("uuid")
            .with_watermark_key("shop.last_sync")
            .with_selective_auto_sync(false);

        assert_eq!(config.tables, vec![TableName::Products]);
        assert_eq!(config.strategy, ConflictResolutionStrategy::ServerWins);
        assert_eq!(config.auto_sync_interval, Duration::from_secs(60));
        assert_eq!(config.conflict_key, "uuid");
        assert_eq!(config.watermark_key, "shop.last_sync");
        assert!(!config.selective_auto_sync);
    }

    #[test]
    fn unknown_table_names_are_skipped() {
        let config =
            SyncConfig::default().with_table_names(["products", "widgets", "customers", "products"]);
        assert_eq!(
            config.tables,
            vec![TableName::Products, TableName::Customers]
        );
    }
}
