//! The sync orchestrator: the single entry point callers use.

use crate::cancel::CancelHandle;
use crate::config::SyncConfig;
use crate::error::EngineResult;
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::realtime::RealtimeSubscriber;
use crate::state::{SyncState, SyncStateStore, SyncStats, SyncStatus};
use crate::store::{Connectivity, GuardedStore, KeyValueStore, LocalStore, RemoteStore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use replica_protocol::{ConflictResolutionStrategy, SyncErrorKind, SyncResult, TableName};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Smallest interval accepted by the periodic timer.
const MIN_PERIODIC_INTERVAL: Duration = Duration::from_millis(1);

/// Kind of bulk operation reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Remote to local.
    Pull,
    /// Local to remote.
    Push,
    /// Pull followed by push.
    Sync,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Pull => "pull",
            SyncOperation::Push => "push",
            SyncOperation::Sync => "sync",
        })
    }
}

/// Lifecycle notification delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An operation entered `Syncing`.
    Start {
        /// Operation that started.
        operation: SyncOperation,
    },
    /// An operation settled.
    End {
        /// Operation that ended.
        operation: SyncOperation,
        /// Its outcome.
        result: SyncResult,
    },
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Serializes pulls and pushes, gates them on connectivity and owns the
/// periodic timer and realtime feeds.
///
/// Cloning is cheap; clones share all state. At most one pull, push or
/// two-way sync runs at a time: a request arriving while one is in flight
/// returns a busy result immediately. Top-level operations never fail;
/// fatal conditions come back as a `SyncResult` with `error` set.
///
/// # Example
///
/// ```no_run
/// use replica_engine::{
///     MemoryKeyValueStore, MemoryLocalStore, MemoryRemoteStore, StaticConnectivity,
///     SyncConfig, SyncOrchestrator,
/// };
/// use replica_protocol::ConflictResolutionStrategy;
/// use std::sync::Arc;
///
/// let orchestrator = SyncOrchestrator::new(
///     SyncConfig::default(),
///     Arc::new(MemoryLocalStore::new()),
///     Arc::new(MemoryRemoteStore::new()),
///     Arc::new(StaticConnectivity::online()),
///     Box::new(MemoryKeyValueStore::new()),
/// )
/// .unwrap();
///
/// let result = orchestrator.pull(true, &ConflictResolutionStrategy::newer_wins());
/// assert!(result.is_success());
/// ```
pub struct SyncOrchestrator<L: LocalStore + 'static, R: RemoteStore + 'static> {
    inner: Arc<Inner<L, R>>,
}

struct Inner<L: LocalStore + 'static, R: RemoteStore + 'static> {
    config: SyncConfig,
    state: Arc<SyncStateStore>,
    connectivity: Arc<dyn Connectivity>,
    pull: PullEngine<L, R>,
    push: PushEngine<L, R>,
    realtime: RealtimeSubscriber<L, R>,
    in_flight: AtomicBool,
    stats: RwLock<SyncStats>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    timer: Mutex<Option<CancelHandle>>,
    feeds: Mutex<Vec<CancelHandle>>,
}

impl<L: LocalStore + 'static, R: RemoteStore + 'static> Clone for SyncOrchestrator<L, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: LocalStore + 'static, R: RemoteStore + 'static> SyncOrchestrator<L, R> {
    /// Creates an orchestrator, loading the persisted watermarks from `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key-value store cannot be read.
    pub fn new(
        config: SyncConfig,
        local: Arc<L>,
        remote: Arc<R>,
        connectivity: Arc<dyn Connectivity>,
        kv: Box<dyn KeyValueStore>,
    ) -> EngineResult<Self> {
        let state = Arc::new(SyncStateStore::load(kv, config.watermark_key.clone())?);
        let local = GuardedStore::new(local);

        Ok(Self {
            inner: Arc::new(Inner {
                pull: PullEngine::new(local.clone(), Arc::clone(&remote), Arc::clone(&state)),
                push: PushEngine::new(local.clone(), Arc::clone(&remote), config.conflict_key.clone()),
                realtime: RealtimeSubscriber::new(local, remote),
                config,
                state,
                connectivity,
                in_flight: AtomicBool::new(false),
                stats: RwLock::new(SyncStats::default()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                timer: Mutex::new(None),
                feeds: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Pulls the configured tables.
    pub fn pull(&self, selective: bool, strategy: &ConflictResolutionStrategy) -> SyncResult {
        self.run(SyncOperation::Pull, |inner| inner.pull_phase(selective, strategy))
    }

    /// Pushes dirty records of the configured tables.
    pub fn push(&self) -> SyncResult {
        self.run(SyncOperation::Push, |inner| inner.push_phase())
    }

    /// Runs a full pull followed by a push under one in-flight guard.
    ///
    /// The push is skipped if the pull fails fatally.
    pub fn sync(&self, strategy: &ConflictResolutionStrategy) -> SyncResult {
        self.run(SyncOperation::Sync, |inner| {
            let mut result = inner.pull_phase(false, strategy)?;
            match inner.push_phase() {
                Ok(pushed) => result.absorb(pushed),
                Err(err) => result.error = Some(err.kind()),
            }
            Ok(result)
        })
    }

    /// Pull with the configured strategy and selectivity.
    ///
    /// This is what the periodic timer runs. It never pushes.
    pub fn auto_sync(&self) -> SyncResult {
        let config = &self.inner.config;
        self.pull(config.selective_auto_sync, &config.strategy)
    }

    /// Starts calling [`auto_sync`] every `interval` on a background thread.
    ///
    /// Any timer previously started by this orchestrator is cancelled first.
    /// Cancelling waits for an in-flight tick to finish, so it never leaves
    /// the status stuck at `Syncing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    ///
    /// [`auto_sync`]: SyncOrchestrator::auto_sync
    pub fn start_periodic_sync(&self, interval: Duration) -> EngineResult<CancelHandle> {
        let interval = interval.max(MIN_PERIODIC_INTERVAL);
        let previous = self.inner.timer.lock().take();
        if let Some(previous) = previous {
            previous.cancel();
        }

        let (stop, ticks) = mpsc::channel::<()>();
        let weak: Weak<Inner<L, R>> = Arc::downgrade(&self.inner);
        let worker = thread::Builder::new()
            .name("replica-auto-sync".into())
            .spawn(move || loop {
                match ticks.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let result = SyncOrchestrator { inner }.auto_sync();
                        debug!(
                            success = result.is_success(),
                            records = result.record_count,
                            "periodic sync tick"
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(interval_ms = interval.as_millis() as u64, "periodic sync started");
        let worker_id = worker.thread().id();
        let handle = CancelHandle::new(move || {
            let _ = stop.send(());
            // A listener running on the timer thread may cancel its own timer.
            if thread::current().id() != worker_id && worker.join().is_err() {
                warn!("periodic sync thread panicked");
            }
            info!("periodic sync stopped");
        });

        *self.inner.timer.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Starts the periodic timer with the configured interval.
    pub fn start_auto_sync(&self) -> EngineResult<CancelHandle> {
        self.start_periodic_sync(self.inner.config.auto_sync_interval)
    }

    /// Opens realtime feeds for the given tables.
    ///
    /// The orchestrator keeps a clone of the handle so [`shutdown`] can
    /// close the feeds.
    ///
    /// [`shutdown`]: SyncOrchestrator::shutdown
    pub fn subscribe_realtime(&self, tables: &[TableName]) -> CancelHandle {
        let handle = self.inner.realtime.subscribe(tables);
        let mut feeds = self.inner.feeds.lock();
        feeds.retain(|feed| !feed.is_cancelled());
        feeds.push(handle.clone());
        handle
    }

    /// Cancels the periodic timer and every realtime feed opened here.
    pub fn shutdown(&self) {
        let timer = self.inner.timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
        let feeds = std::mem::take(&mut *self.inner.feeds.lock());
        for feed in feeds {
            feed.cancel();
        }
        debug!("sync orchestrator shut down");
    }

    /// Returns the start of the last pull in which every requested table
    /// synced.
    pub fn get_last_sync(&self) -> Option<DateTime<Utc>> {
        self.inner.state.last_sync()
    }

    /// Returns the watermark a selective pull of `table` fetches from.
    pub fn get_table_sync(&self, table: TableName) -> Option<DateTime<Utc>> {
        self.inner.state.table_watermark(table)
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        self.inner.state.snapshot()
    }

    /// Returns the accumulated statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Registers a lifecycle listener.
    ///
    /// Listeners run on the thread performing the operation, outside any
    /// orchestrator lock, so they may call back into the orchestrator.
    pub fn on_event(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn run(
        &self,
        operation: SyncOperation,
        body: impl FnOnce(&Inner<L, R>) -> EngineResult<SyncResult>,
    ) -> SyncResult {
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            debug!(operation = %operation, "rejected: sync already in progress");
            return SyncResult::busy();
        };

        if !self.inner.connectivity.is_online() {
            let message = SyncErrorKind::Offline.to_string();
            warn!(operation = %operation, "skipped: offline");
            self.inner.state.set_status(SyncStatus::Error(message.clone()));
            self.inner.stats.write().last_error = Some(message);
            return SyncResult::offline();
        }

        self.inner.state.set_status(SyncStatus::Syncing);
        self.emit(&SyncEvent::Start { operation });

        let result = body(&self.inner).unwrap_or_else(|err| SyncResult::failed(err.kind()));
        match &result.error {
            Some(kind) => {
                error!(operation = %operation, error = %kind, "sync failed");
                self.inner.state.set_status(SyncStatus::Error(kind.to_string()));
                self.inner.stats.write().last_error = Some(kind.to_string());
            }
            None => {
                self.inner.state.set_status(SyncStatus::Idle);
                let mut stats = self.inner.stats.write();
                stats.cycles_completed += 1;
                stats.last_error = None;
                stats.last_completed_at = Some(Utc::now());
            }
        }

        drop(guard);
        self.emit(&SyncEvent::End {
            operation,
            result: result.clone(),
        });
        result
    }

    fn emit(&self, event: &SyncEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl<L: LocalStore + 'static, R: RemoteStore + 'static> Inner<L, R> {
    fn pull_phase(
        &self,
        selective: bool,
        strategy: &ConflictResolutionStrategy,
    ) -> EngineResult<SyncResult> {
        let result = self.pull.pull(&self.config.tables, selective, strategy)?;
        let mut stats = self.stats.write();
        stats.records_pulled += result.record_count as u64;
        stats.conflicts_encountered += result.conflicts.len() as u64;
        Ok(result)
    }

    fn push_phase(&self) -> EngineResult<SyncResult> {
        let result = self.push.push(&self.config.tables)?;
        self.stats.write().records_pushed += result.record_count as u64;
        Ok(result)
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
