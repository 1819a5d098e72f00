//! A context typed for `R` in front of a context typed for `S`.

use crate::error::{Error, Result, SharedError};
use crate::processor::ResultProcessor;
use crate::types::{BatchId, TaskId};
use futures::future::BoxFuture;
use std::sync::Arc;

use super::context::{BatchState, CombinedDownloadContext};
use super::job::Submission;

/// Converts `done` values with a result processor and forwards everything else
///
/// The decorator keeps no state of its own: submissions, joins and the batch
/// state all belong to the proxied context.
pub struct AppendedContext<R, S> {
    processor: Arc<dyn ResultProcessor<R, S>>,
    proxied: Arc<dyn CombinedDownloadContext<S>>,
}

impl<R, S> AppendedContext<R, S> {
    /// Decorate `proxied`, converting results with `processor`
    pub fn new(
        processor: Arc<dyn ResultProcessor<R, S>>,
        proxied: Arc<dyn CombinedDownloadContext<S>>,
    ) -> Self {
        Self { processor, proxied }
    }

    /// The decorated context
    pub fn proxied(&self) -> &Arc<dyn CombinedDownloadContext<S>> {
        &self.proxied
    }
}

/// Expose `proxied` as a context typed for `R`
pub fn append<R, S, P>(
    processor: P,
    proxied: Arc<dyn CombinedDownloadContext<S>>,
) -> Arc<dyn CombinedDownloadContext<R>>
where
    R: 'static,
    S: 'static,
    P: ResultProcessor<R, S> + 'static,
{
    Arc::new(AppendedContext::new(Arc::new(processor), proxied))
}

impl<R, S> CombinedDownloadContext<R> for AppendedContext<R, S> {
    fn done(&self, result: R) -> Result<()> {
        match self.processor.process(result) {
            Ok(converted) => self.proxied.done(converted),
            Err(e) => {
                let cause: SharedError = Arc::new(e);
                tracing::error!(
                    batch_id = self.proxied.id().0,
                    error = %cause,
                    "Unable to convert batch result"
                );
                self.proxied
                    .failed(Arc::new(Error::Conversion(Arc::clone(&cause))))?;
                Err(Error::Conversion(cause))
            }
        }
    }

    fn failed(&self, cause: SharedError) -> Result<()> {
        self.proxied.failed(cause)
    }

    fn cancelled(&self) -> Result<()> {
        self.proxied.cancelled()
    }

    fn submit(&self, submission: Submission) -> Result<TaskId> {
        self.proxied.submit(submission)
    }

    fn await_all_tasks(&self) -> BoxFuture<'static, Result<()>> {
        self.proxied.await_all_tasks()
    }

    fn state(&self) -> BatchState {
        self.proxied.state()
    }

    fn id(&self) -> BatchId {
        self.proxied.id()
    }
}
