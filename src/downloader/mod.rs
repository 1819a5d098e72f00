//! Session manager: owns the worker pool, the resolver and the event channel.
//!
//! The `CombinedDownloader` struct and its methods are organized by concern:
//! - [`pool`] - Worker runtime and the leaf-task concurrency limit
//! - [`lifecycle`] - Shutdown coordination

mod lifecycle;
mod pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use pool::WorkerPool;

use crate::callback::{AsyncCallback, CombinedDownloadCallback};
use crate::combine::job::{Delivery, drive, wait_outcome};
use crate::combine::outstanding::Outstanding;
use crate::combine::{BatchContext, BatchState, CombinedDownloadContext, CombinedDownloadTask};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::{HttpResolver, ResourceResolver};
use crate::types::{BatchId, Event, Outcome, TaskId};
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// State shared by every batch of one downloader
pub(crate) struct Session {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Worker pool all tasks of this session run on
    pub(crate) pool: WorkerPool,
    /// Fetches download task payloads
    pub(crate) resolver: Arc<dyn ResourceResolver>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Parent of every root batch token; cancelled on shutdown
    pub(crate) shutdown: CancellationToken,
    /// Outstanding tasks across every batch
    pub(crate) outstanding: Arc<Outstanding>,
    /// Whether new batches are accepted (set to false during shutdown)
    pub(crate) accepting_new: AtomicBool,
    next_batch_id: AtomicU64,
    next_task_id: AtomicU64,
}

impl Session {
    pub(crate) fn next_batch_id(&self) -> BatchId {
        BatchId(self.next_batch_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Entry point for running combined downloads (cloneable, all state is shared)
#[derive(Clone)]
pub struct CombinedDownloader {
    pub(crate) session: Arc<Session>,
}

impl CombinedDownloader {
    /// Create a downloader that fetches resources over HTTP
    ///
    /// Must be called from within a tokio runtime: tasks are spawned on the
    /// runtime that was current at construction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, and
    /// [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let resolver = HttpResolver::new(&config.http, config.retry.clone())?;
        Self::with_resolver(config, Arc::new(resolver))
    }

    /// Create a downloader with a custom resolver
    ///
    /// # Example
    ///
    /// ```no_run
    /// use combine_dl::{CombinedDownloader, Config, HttpResolver};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = Config::default();
    ///     let client = reqwest::Client::new();
    ///     let resolver = HttpResolver::with_client(client, config.retry.clone());
    ///     let downloader = CombinedDownloader::with_resolver(config, Arc::new(resolver))?;
    ///     # let _ = downloader;
    ///     Ok(())
    /// }
    /// ```
    pub fn with_resolver(config: Config, resolver: Arc<dyn ResourceResolver>) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Other(format!("CombinedDownloader requires a tokio runtime: {e}")))?;

        let (event_tx, _rx) = broadcast::channel(config.events.capacity);
        let pool = WorkerPool::new(config.worker.max_concurrent_tasks, runtime);

        tracing::info!(
            max_concurrent_tasks = ?config.worker.max_concurrent_tasks,
            event_capacity = config.events.capacity,
            "Combined downloader initialized"
        );

        Ok(Self {
            session: Arc::new(Session {
                config: Arc::new(config),
                pool,
                resolver,
                event_tx,
                shutdown: CancellationToken::new(),
                outstanding: Outstanding::root(),
                accepting_new: AtomicBool::new(true),
                next_batch_id: AtomicU64::new(0),
                next_task_id: AtomicU64::new(0),
            }),
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.session.config)
    }

    /// Subscribe to lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than `events.capacity` events receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.session.event_tx.subscribe()
    }

    /// Run `task` as a new top-level batch
    ///
    /// The body runs against a fresh context typed for `T`. The returned handle
    /// resolves to the batch outcome; `callback`, if any, is notified first and
    /// also receives `download_started` for every download submitted directly
    /// into the batch.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use combine_dl::{CombinedDownloader, CombinedDownloadContext, Config, ContextExt};
    /// use combine_dl::{MemoryDownloadTask, Resource};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = CombinedDownloader::new(Config::default())?;
    ///
    ///     let batch = downloader.download(
    ///         |ctx: Arc<dyn CombinedDownloadContext<usize>>| async move {
    ///             let page = Resource::parse("https://example.com/index.html")?;
    ///             let body = ctx.submit_download(MemoryDownloadTask::new(page), None, true)?;
    ///             if let Some(bytes) = body.await.done() {
    ///                 ctx.done(bytes.len())?;
    ///             }
    ///             Ok(())
    ///         },
    ///         None,
    ///     )?;
    ///
    ///     let size = batch.await.into_result()?;
    ///     println!("downloaded {size} bytes");
    ///     Ok(())
    /// }
    /// ```
    pub fn download<T, K>(
        &self,
        task: K,
        callback: Option<Arc<dyn CombinedDownloadCallback<T>>>,
    ) -> Result<BatchHandle<T>>
    where
        T: Send + 'static,
        K: CombinedDownloadTask<T>,
    {
        self.ensure_accepting()?;

        let (context, outcome) = BatchContext::root(&self.session, callback.clone());
        let id = context.core().id;
        let weak = Arc::downgrade(&context);

        let (reply, receiver) = oneshot::channel();
        let delivery = Delivery::new(callback.map(|cb| cb as Arc<dyn AsyncCallback<T>>), reply);
        let shutdown = self.session.shutdown.clone();

        self.session.pool.spawn(
            async move {
                let cancelled = async move { shutdown.cancelled().await };
                let outcome = drive(context, outcome, Box::new(task), cancelled).await;
                delivery.deliver(outcome);
            }
            .boxed(),
        );

        Ok(BatchHandle::new(id, weak, receiver))
    }

    /// Create a top-level context to drive directly
    ///
    /// The caller submits tasks and reports the outcome itself. The handle resolves
    /// once the context is terminal; if every reference to the context is dropped
    /// first, it resolves to a failure with
    /// [`UsageError::Abandoned`](crate::error::UsageError::Abandoned).
    pub fn context<T>(&self) -> Result<(Arc<dyn CombinedDownloadContext<T>>, BatchHandle<T>)>
    where
        T: Send + 'static,
    {
        self.ensure_accepting()?;

        let (context, outcome) = BatchContext::root(&self.session, None);
        let id = context.core().id;
        let weak = Arc::downgrade(&context);

        let (reply, receiver) = oneshot::channel();
        let watched = Weak::clone(&weak);
        let shutdown = self.session.shutdown.clone();

        self.session.pool.spawn(
            async move {
                let cancelled = async move { shutdown.cancelled().await };
                let outcome = wait_outcome(id, watched, outcome, cancelled).await;
                let _ = reply.send(outcome);
            }
            .boxed(),
        );

        let context: Arc<dyn CombinedDownloadContext<T>> = context;
        Ok((context, BatchHandle::new(id, weak, receiver)))
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.session.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}

/// Handle to a top-level batch
///
/// Awaiting the handle yields the batch [`Outcome`]. Dropping it leaves the batch running.
#[must_use = "dropping a BatchHandle does not cancel the batch"]
pub struct BatchHandle<T> {
    id: BatchId,
    context: Weak<BatchContext<T>>,
    outcome: oneshot::Receiver<Outcome<T>>,
}

impl<T: Send + 'static> BatchHandle<T> {
    fn new(id: BatchId, context: Weak<BatchContext<T>>, outcome: oneshot::Receiver<Outcome<T>>) -> Self {
        Self {
            id,
            context,
            outcome,
        }
    }

    /// Batch identifier
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Cancel the batch
    ///
    /// Returns false if the batch already reached a terminal state.
    pub fn cancel(&self) -> bool {
        self.context
            .upgrade()
            .is_some_and(|context| context.cancelled().is_ok())
    }

    /// Current batch state, `None` once the batch has been released
    pub fn state(&self) -> Option<BatchState> {
        self.context.upgrade().map(|context| context.state())
    }
}

impl<T> Future for BatchHandle<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| crate::combine::job::abandoned(id)))
    }
}
