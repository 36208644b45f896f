//! A remote store whose fetches can be held open.
//!
//! Used to park a pull mid-flight so a test can observe what happens when
//! a second operation arrives.

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use replica_engine::{EngineResult, EventCallback, RemoteStore, Subscription};
use replica_protocol::{Record, TableName};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Gate {
    closed: bool,
    blocked: usize,
}

/// Wraps a remote store; `select` blocks while the gate is closed.
pub struct GatedRemote<R> {
    inner: R,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl<R> GatedRemote<R> {
    /// Wraps `inner` with an open gate.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            gate: Mutex::new(Gate::default()),
            changed: Condvar::new(),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Makes subsequent fetches block.
    pub fn close(&self) {
        self.gate.lock().closed = true;
    }

    /// Releases every blocked fetch.
    pub fn open(&self) {
        self.gate.lock().closed = false;
        self.changed.notify_all();
    }

    /// Waits until at least `count` fetches are blocked.
    pub fn wait_for_blocked(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        while gate.blocked < count {
            if self.changed.wait_until(&mut gate, deadline).timed_out() {
                return gate.blocked >= count;
            }
        }
        true
    }
}

impl<R> std::ops::Deref for GatedRemote<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<R: RemoteStore> RemoteStore for GatedRemote<R> {
    fn select(&self, table: TableName, since: Option<DateTime<Utc>>) -> EngineResult<Vec<Record>> {
        {
            let mut gate = self.gate.lock();
            if gate.closed {
                gate.blocked += 1;
                self.changed.notify_all();
                while gate.closed {
                    self.changed.wait(&mut gate);
                }
                gate.blocked -= 1;
            }
        }
        self.inner.select(table, since)
    }

    fn upsert(&self, table: TableName, records: &[Record], conflict_key: &str) -> EngineResult<()> {
        self.inner.upsert(table, records, conflict_key)
    }

    fn subscribe(
        &self,
        table: TableName,
        on_event: EventCallback,
    ) -> EngineResult<Box<dyn Subscription>> {
        self.inner.subscribe(table, on_event)
    }
}
