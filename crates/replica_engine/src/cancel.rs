//! Cancellation handles for long-running background work.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Stops a periodic timer or a set of realtime subscriptions.
///
/// Clones share the same underlying work. Cancelling runs the teardown
/// exactly once; later calls are no-ops. Dropping a handle does not cancel.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

struct Inner {
    cancel: Mutex<Option<CancelFn>>,
    cancelled: AtomicBool,
}

impl CancelHandle {
    /// Creates a handle running `cancel` on the first call to [`cancel`].
    ///
    /// [`cancel`]: CancelHandle::cancel
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: Mutex::new(Some(Box::new(cancel))),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Cancels the work. Returns once the teardown has finished.
    ///
    /// The lock stays held while the teardown runs, so a concurrent caller
    /// also returns only after the work has stopped.
    pub fn cancel(&self) {
        let mut slot = self.inner.cancel.lock();
        if let Some(teardown) = slot.take() {
            teardown();
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Returns true once the teardown has run.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true if both handles control the same work.
    pub fn same_as(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
