//! Callback contracts for submitted tasks.
//!
//! Every callback receives exactly one terminal notification, after the task is
//! terminal and has left its context's outstanding set. Notifications run on a
//! worker task and never while a context lock is held, so a callback may submit
//! further tasks or call a terminal notification on the context.

use crate::error::{Error, SharedError};
use crate::resolver::{DownloadProgress, Resource};
use std::sync::Arc;

/// Terminal notifications for actions and computations
pub trait AsyncCallback<T>: Send + Sync {
    /// The task completed with `result`
    fn on_done(&self, result: &T);

    /// The task failed with `error`
    fn on_failed(&self, error: SharedError);

    /// The task was cancelled
    fn on_cancelled(&self);
}

/// Terminal and progress notifications for a single download
pub trait DownloadCallback<T>: AsyncCallback<T> {
    /// `done` bytes received so far out of `total`, when the length is known
    fn updated(&self, done: u64, total: Option<u64>) {
        let _ = (done, total);
    }

    /// The resolver is about to retry after a transient failure
    fn retry(&self, error: &Error, attempt: u32, max: u32) {
        let _ = (error, attempt, max);
    }
}

/// Terminal notifications for a nested batch
pub trait CombinedDownloadCallback<T>: AsyncCallback<T> {
    /// A download task was submitted into the nested batch
    fn download_started(&self, resource: &Resource) {
        let _ = resource;
    }
}

/// Forwards resolver progress to a download callback
pub(crate) struct CallbackProgress<T>(pub(crate) Arc<dyn DownloadCallback<T>>);

impl<T> DownloadProgress for CallbackProgress<T> {
    fn updated(&self, done: u64, total: Option<u64>) {
        self.0.updated(done, total);
    }

    fn retry(&self, error: &Error, attempt: u32, max: u32) {
        self.0.retry(error, attempt, max);
    }
}
