//! Test fixtures and orchestrator helpers.
//!
//! Provides record builders and a harness wiring a [`SyncOrchestrator`]
//! to in-memory collaborators the test can reach into.

use crate::gated::GatedRemote;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use replica_engine::{
    MemoryKeyValueStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore, StaticConnectivity,
    SyncConfig, SyncOrchestrator,
};
use replica_protocol::{Record, TableName};
use std::sync::Arc;
use std::time::Instant;

/// Fixed base instant used by [`at`].
pub const BASE_EPOCH_SECS: i64 = 1_700_000_000;

/// Returns the base instant shifted by `offset_secs`.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_EPOCH_SECS, 0)
        .single()
        .expect("base epoch is valid")
        + Duration::seconds(offset_secs)
}

/// Formats an instant the way remote stores do.
pub fn stamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds a product record.
pub fn product(id: i64, name: &str, price: i64, updated_at: DateTime<Utc>) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("price", price)
        .with("updated_at", stamp(updated_at))
}

/// Builds a customer record.
pub fn customer(id: i64, name: &str, updated_at: DateTime<Utc>) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("updated_at", stamp(updated_at))
}

/// Builds `count` products with ids `1..=count`, all updated at `updated_at`.
pub fn products(count: i64, updated_at: DateTime<Utc>) -> Vec<Record> {
    (1..=count)
        .map(|id| product(id, &format!("product-{id}"), id * 10, updated_at))
        .collect()
}

/// An orchestrator wired to in-memory collaborators.
pub struct TestHarness<R: RemoteStore + 'static = MemoryRemoteStore> {
    /// Local store.
    pub local: Arc<MemoryLocalStore>,
    /// Remote store as seen by the orchestrator.
    pub remote: Arc<R>,
    /// Connectivity switch.
    pub connectivity: Arc<StaticConnectivity>,
    /// Orchestrator under test.
    pub orchestrator: SyncOrchestrator<MemoryLocalStore, R>,
}

impl TestHarness<MemoryRemoteStore> {
    /// Creates an online harness syncing the given tables.
    pub fn new(tables: &[TableName]) -> Self {
        Self::with_config(SyncConfig::new(tables.iter().copied()))
    }

    /// Creates an online harness with a custom configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_remote(config, Arc::new(MemoryRemoteStore::new()))
    }
}

impl TestHarness<GatedRemote<MemoryRemoteStore>> {
    /// Creates a harness whose remote fetches block until released.
    pub fn gated(tables: &[TableName]) -> Self {
        let remote = Arc::new(GatedRemote::new(MemoryRemoteStore::new()));
        Self::with_remote(SyncConfig::new(tables.iter().copied()), remote)
    }
}

impl<R: RemoteStore + 'static> TestHarness<R> {
    /// Creates an online harness around an existing remote store.
    pub fn with_remote(config: SyncConfig, remote: Arc<R>) -> Self {
        let local = Arc::new(MemoryLocalStore::new());
        let connectivity = Arc::new(StaticConnectivity::online());
        let orchestrator = SyncOrchestrator::new(
            config,
            Arc::clone(&local),
            Arc::clone(&remote),
            connectivity.clone(),
            Box::new(MemoryKeyValueStore::new()),
        )
        .expect("in-memory state always loads");

        Self {
            local,
            remote,
            connectivity,
            orchestrator,
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns the final value of `condition`.
pub fn wait_until(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}
