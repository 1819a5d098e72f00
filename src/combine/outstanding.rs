//! Outstanding-task counter backing the join barrier.
//!
//! Every context owns one counter. A nested context's counter forwards each
//! registration and retirement to its parent, so a parent reaches zero only when
//! its whole subtree is quiescent.

use std::sync::Arc;
use tokio::sync::watch;

pub(crate) struct Outstanding {
    count: watch::Sender<usize>,
    parent: Option<Arc<Outstanding>>,
}

impl Outstanding {
    pub(crate) fn root() -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self {
            count,
            parent: None,
        })
    }

    pub(crate) fn child(parent: &Arc<Outstanding>) -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self {
            count,
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Count one more task here and in every ancestor
    pub(crate) fn register(&self) {
        self.count.send_modify(|n| *n += 1);
        if let Some(parent) = &self.parent {
            parent.register();
        }
    }

    /// Count one task less here and in every ancestor, waking joiners at zero
    pub(crate) fn retire(&self) {
        self.count.send_modify(|n| {
            debug_assert!(*n > 0, "retired more tasks than were registered");
            *n = n.saturating_sub(1);
        });
        if let Some(parent) = &self.parent {
            parent.retire();
        }
    }

    pub(crate) fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once the count is zero.
    ///
    /// The predicate is re-evaluated on every change, so registrations racing a
    /// wake-up keep the caller waiting.
    pub(crate) async fn quiescent(&self) {
        let mut count = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = count.wait_for(|n| *n == 0).await;
    }
}
