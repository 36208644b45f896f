//! Realtime change feeds applied to the local store.
//!
//! Each subscribed table gets its own channel and worker thread. The remote
//! store's callback only enqueues; the worker drains the queue serially and
//! applies each event under the shared local write lock, so events of one
//! table land in receipt order and never interleave with a pull's batch
//! commit.

use crate::cancel::CancelHandle;
use crate::error::{EngineResult, SyncError};
use crate::store::{GuardedStore, LocalStore, RemoteStore, Subscription};
use replica_protocol::{ChangeEvent, ChangeType, TableName};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

enum FeedMessage {
    Event(ChangeEvent),
    Stop,
}

struct Feed {
    table: TableName,
    subscription: Box<dyn Subscription>,
    sender: Sender<FeedMessage>,
    worker: JoinHandle<()>,
}

impl Feed {
    fn close(mut self) {
        self.subscription.unsubscribe();
        // A send error means the worker already exited.
        let _ = self.sender.send(FeedMessage::Stop);
        if self.worker.join().is_err() {
            warn!(table = %self.table, "realtime worker panicked");
        }
        debug!(table = %self.table, "realtime feed closed");
    }
}

/// Opens one change feed per table and applies incoming events locally.
pub struct RealtimeSubscriber<L: LocalStore + 'static, R: RemoteStore> {
    local: GuardedStore<L>,
    remote: Arc<R>,
}

impl<L: LocalStore + 'static, R: RemoteStore> RealtimeSubscriber<L, R> {
    /// Creates a subscriber.
    pub fn new(local: GuardedStore<L>, remote: Arc<R>) -> Self {
        Self { local, remote }
    }

    /// Subscribes to every table.
    ///
    /// A table whose feed cannot be opened is logged and skipped; the other
    /// feeds are unaffected. Cancelling the returned handle closes every
    /// feed and waits for the workers to drain, after which no further
    /// local writes happen.
    pub fn subscribe(&self, tables: &[TableName]) -> CancelHandle {
        let mut feeds = Vec::with_capacity(tables.len());
        for &table in tables {
            match self.open_feed(table) {
                Ok(feed) => feeds.push(feed),
                Err(err) => warn!(table = %table, error = %err, "skipping realtime feed"),
            }
        }
        info!(feeds = feeds.len(), requested = tables.len(), "realtime subscribed");

        CancelHandle::new(move || {
            let count = feeds.len();
            for feed in feeds {
                feed.close();
            }
            info!(feeds = count, "realtime unsubscribed");
        })
    }

    fn open_feed(&self, table: TableName) -> EngineResult<Feed> {
        let (sender, receiver) = mpsc::channel();
        let local = self.local.clone();
        let worker = thread::Builder::new()
            .name(format!("realtime-{table}"))
            .spawn(move || run_worker(table, &local, &receiver))?;

        let callback_sender = sender.clone();
        let subscribed = self.remote.subscribe(
            table,
            Box::new(move |event| {
                // Fails only after the feed was closed.
                let _ = callback_sender.send(FeedMessage::Event(event));
            }),
        );

        match subscribed {
            Ok(subscription) => Ok(Feed {
                table,
                subscription,
                sender,
                worker,
            }),
            Err(err) => {
                let _ = sender.send(FeedMessage::Stop);
                let _ = worker.join();
                Err(SyncError::Subscribe {
                    table,
                    message: err.detail(),
                })
            }
        }
    }
}

fn run_worker<L: LocalStore>(
    table: TableName,
    local: &GuardedStore<L>,
    receiver: &Receiver<FeedMessage>,
) {
    while let Ok(FeedMessage::Event(event)) = receiver.recv() {
        if event.table != table {
            warn!(table = %table, event_table = %event.table, "ignoring event for another table");
            continue;
        }
        if let Err(err) = apply_event(local, &event) {
            warn!(
                table = %table,
                id = %event.record_id,
                error = %err,
                "failed to apply realtime event"
            );
        }
    }
    trace!(table = %table, "realtime worker stopped");
}

fn apply_event<L: LocalStore>(local: &GuardedStore<L>, event: &ChangeEvent) -> EngineResult<()> {
    let store = local.write();
    match (event.change_type, &event.record) {
        (ChangeType::Delete, _) => {
            trace!(table = %event.table, id = %event.record_id, "realtime delete");
            store.delete(event.table, &event.record_id)
        }
        (_, Some(record)) => {
            trace!(table = %event.table, id = %event.record_id, "realtime upsert");
            store.batch_apply(event.table, std::slice::from_ref(record))
        }
        (change_type, None) => Err(SyncError::State(format!(
            "{change_type:?} event without a record"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLocalStore, MemoryRemoteStore};
    use replica_protocol::{Record, RecordId};
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn setup() -> (
        Arc<MemoryLocalStore>,
        Arc<MemoryRemoteStore>,
        RealtimeSubscriber<MemoryLocalStore, MemoryRemoteStore>,
    ) {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let subscriber =
            RealtimeSubscriber::new(GuardedStore::new(Arc::clone(&local)), Arc::clone(&remote));
        (local, remote, subscriber)
    }

    #[test]
    fn applies_creates_updates_and_deletes() {
        let (local, remote, subscriber) = setup();
        let handle = subscriber.subscribe(&[TableName::Products]);

        remote
            .put(TableName::Products, Record::new().with("id", 1).with("price", 1))
            .unwrap();
        remote
            .put(TableName::Products, Record::new().with("id", 2).with("price", 2))
            .unwrap();
        remote.remove(TableName::Products, &RecordId::from(2));

        handle.cancel();
        assert_eq!(local.len(TableName::Products), 1);
        assert!(local.get(TableName::Products, &RecordId::from(1)).is_some());
        assert!(local.dirty_ids(TableName::Products).is_empty());
    }

    #[test]
    fn events_apply_in_receipt_order() {
        let (local, remote, subscriber) = setup();
        let handle = subscriber.subscribe(&[TableName::Products]);

        for price in 0..100 {
            remote
                .put(
                    TableName::Products,
                    Record::new().with("id", 1).with("price", price),
                )
                .unwrap();
        }

        assert!(wait_until(|| {
            local
                .get(TableName::Products, &RecordId::from(1))
                .and_then(|r| r.get("price").cloned())
                == Some(serde_json::json!(99))
        }));
        handle.cancel();
    }

    #[test]
    fn no_writes_after_unsubscribe() {
        let (local, remote, subscriber) = setup();
        let handle = subscriber.subscribe(&[TableName::Customers]);
        handle.cancel();
        handle.cancel();

        assert_eq!(remote.subscriber_count(TableName::Customers), 0);
        remote
            .put(TableName::Customers, Record::new().with("id", 9))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(local.len(TableName::Customers), 0);
    }

    #[test]
    fn failed_feed_does_not_affect_others() {
        let (local, remote, subscriber) = setup();
        remote.set_subscribe_failure(TableName::Sales, true);
        let handle = subscriber.subscribe(&[TableName::Sales, TableName::Expenses]);

        assert_eq!(remote.subscriber_count(TableName::Sales), 0);
        assert_eq!(remote.subscriber_count(TableName::Expenses), 1);

        remote
            .put(TableName::Expenses, Record::new().with("id", 3))
            .unwrap();
        assert!(wait_until(|| local.len(TableName::Expenses) == 1));
        handle.cancel();
    }

    #[test]
    fn apply_errors_keep_the_feed_alive() {
        let (local, remote, subscriber) = setup();
        local.set_commit_failure(TableName::Products, true);
        let handle = subscriber.subscribe(&[TableName::Products]);

        remote
            .put(TableName::Products, Record::new().with("id", 1))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        local.set_commit_failure(TableName::Products, false);
        remote
            .put(TableName::Products, Record::new().with("id", 2))
            .unwrap();

        handle.cancel();
        assert!(local.get(TableName::Products, &RecordId::from(2)).is_some());
    }
}
