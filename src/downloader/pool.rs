//! Worker pool: the runtime tasks are spawned on and the concurrency limit for leaf tasks.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub(crate) struct WorkerPool {
    /// `None` means unlimited
    permits: Option<Arc<Semaphore>>,
    runtime: Handle,
}

impl WorkerPool {
    pub(crate) fn new(max_concurrent_tasks: Option<usize>, runtime: Handle) -> Self {
        Self {
            permits: max_concurrent_tasks.map(|n| Arc::new(Semaphore::new(n))),
            runtime,
        }
    }

    /// Wait for a worker slot. Held for the duration of one action, computation or download.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permits = self.permits.as_ref()?;
        // The semaphore is never closed.
        Arc::clone(permits).acquire_owned().await.ok()
    }

    /// Free worker slots, `None` if unlimited
    pub(crate) fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    pub(crate) fn spawn(&self, task: BoxFuture<'static, ()>) {
        // Detached: every task reports through its own delivery.
        drop(self.runtime.spawn(task));
    }
}
