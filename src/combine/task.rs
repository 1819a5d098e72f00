//! Task shapes accepted by a context, their combinators and the submission handle.

use crate::error::{Error, Result};
use crate::processor::ResultProcessor;
use crate::resolver::Resource;
use crate::types::{Outcome, TaskId};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::appended::append;
use super::context::{CombinedDownloadContext, ContextExt};

/// A single resource fetch whose payload becomes a `T`
///
/// The resolver fetches [`resource`](Self::resource); the bytes are then handed
/// to [`materialize`](Self::materialize), which runs on the worker that fetched them.
pub trait DownloadTask<T>: Send + 'static {
    /// The resource to fetch
    fn resource(&self) -> &Resource;

    /// Turn the fetched payload into the task's value
    fn materialize(self: Box<Self>, payload: Vec<u8>) -> Result<T>;
}

impl<T: 'static> DownloadTask<T> for Box<dyn DownloadTask<T>> {
    fn resource(&self) -> &Resource {
        (**self).resource()
    }

    fn materialize(self: Box<Self>, payload: Vec<u8>) -> Result<T> {
        <dyn DownloadTask<T> as DownloadTask<T>>::materialize(*self, payload)
    }
}

/// Downloads a resource into memory as raw bytes
#[derive(Clone, Debug)]
pub struct MemoryDownloadTask {
    resource: Resource,
}

impl MemoryDownloadTask {
    /// Fetch `resource` into a byte buffer
    pub fn new(resource: Resource) -> Self {
        Self { resource }
    }
}

impl DownloadTask<Vec<u8>> for MemoryDownloadTask {
    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn materialize(self: Box<Self>, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }
}

/// Downloads a JSON document and decodes it as `T`
pub struct JsonDownloadTask<T> {
    resource: Resource,
    _decoded: PhantomData<fn() -> T>,
}

impl<T> JsonDownloadTask<T> {
    /// Fetch `resource` and decode it with `serde_json`
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            _decoded: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonDownloadTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonDownloadTask")
            .field("resource", &self.resource)
            .finish()
    }
}

impl<T: DeserializeOwned + 'static> DownloadTask<T> for JsonDownloadTask<T> {
    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn materialize(self: Box<Self>, payload: Vec<u8>) -> Result<T> {
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// A download whose value is converted by a result processor
///
/// A processor error surfaces as the task's failure, wrapped in [`Error::Conversion`].
pub struct AppendedDownloadTask<D, P, R> {
    inner: D,
    processor: P,
    _input: PhantomData<fn(R)>,
}

impl<D, P, R, S> DownloadTask<S> for AppendedDownloadTask<D, P, R>
where
    D: DownloadTask<R>,
    P: ResultProcessor<R, S> + 'static,
    R: 'static,
{
    fn resource(&self) -> &Resource {
        self.inner.resource()
    }

    fn materialize(self: Box<Self>, payload: Vec<u8>) -> Result<S> {
        let AppendedDownloadTask {
            inner, processor, ..
        } = *self;
        let value = <D as DownloadTask<R>>::materialize(Box::new(inner), payload)?;
        processor
            .process(value)
            .map_err(|e| Error::Conversion(Arc::new(e)))
    }
}

/// Combinators for download tasks
pub trait DownloadTaskExt<T>: DownloadTask<T> + Sized {
    /// Convert the downloaded value with `processor`
    fn and_then<S, P>(self, processor: P) -> AppendedDownloadTask<Self, P, T>
    where
        P: ResultProcessor<T, S> + 'static,
    {
        AppendedDownloadTask {
            inner: self,
            processor,
            _input: PhantomData,
        }
    }
}

impl<T, D> DownloadTaskExt<T> for D where D: DownloadTask<T> {}

/// A nested batch: the body submits tasks into its own context and reports the
/// batch outcome through it.
///
/// Returning `Err` from the body fails the nested batch with that error. Returning
/// `Ok` without a terminal notification leaves the batch pending until a callback
/// or task completes it; if every reference is dropped first, the batch fails with
/// [`UsageError::Abandoned`](crate::error::UsageError::Abandoned).
///
/// Any `FnOnce(Arc<dyn CombinedDownloadContext<T>>) -> impl Future<Output = Result<()>>`
/// is a combined task.
#[async_trait::async_trait]
pub trait CombinedDownloadTask<T: Send + 'static>: Send + 'static {
    /// Run the body against `context`
    async fn execute(self: Box<Self>, context: Arc<dyn CombinedDownloadContext<T>>) -> Result<()>;
}

#[async_trait::async_trait]
impl<T, F, Fut> CombinedDownloadTask<T> for F
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn CombinedDownloadContext<T>>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn execute(self: Box<Self>, context: Arc<dyn CombinedDownloadContext<T>>) -> Result<()> {
        (*self)(context).await
    }
}

/// A combined task whose `R` result is converted to `S` before it reaches the
/// outer context
pub struct AppendedCombinedTask<K, P, R> {
    inner: K,
    processor: P,
    _input: PhantomData<fn(R)>,
}

#[async_trait::async_trait]
impl<K, P, R, S> CombinedDownloadTask<S> for AppendedCombinedTask<K, P, R>
where
    K: CombinedDownloadTask<R>,
    P: ResultProcessor<R, S> + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    async fn execute(self: Box<Self>, context: Arc<dyn CombinedDownloadContext<S>>) -> Result<()> {
        let AppendedCombinedTask {
            inner, processor, ..
        } = *self;
        <K as CombinedDownloadTask<R>>::execute(Box::new(inner), append(processor, context)).await
    }
}

/// Combinators for combined tasks
pub trait CombinedDownloadTaskExt<T: Send + 'static>: CombinedDownloadTask<T> + Sized {
    /// Convert the batch result with `processor`
    fn and_then<S, P>(self, processor: P) -> AppendedCombinedTask<Self, P, T>
    where
        S: Send + 'static,
        P: ResultProcessor<T, S> + 'static,
    {
        AppendedCombinedTask {
            inner: self,
            processor,
            _input: PhantomData,
        }
    }
}

impl<T, K> CombinedDownloadTaskExt<T> for K
where
    T: Send + 'static,
    K: CombinedDownloadTask<T>,
{
}

/// A batch consisting of one fatal download, done with its value
pub fn single<T, D>(task: D) -> SingleDownload<D, T>
where
    T: Send + 'static,
    D: DownloadTask<T>,
{
    SingleDownload {
        task,
        _value: PhantomData,
    }
}

/// See [`single`]
pub struct SingleDownload<D, T> {
    task: D,
    _value: PhantomData<fn() -> T>,
}

#[async_trait::async_trait]
impl<T, D> CombinedDownloadTask<T> for SingleDownload<D, T>
where
    T: Send + 'static,
    D: DownloadTask<T>,
{
    async fn execute(self: Box<Self>, context: Arc<dyn CombinedDownloadContext<T>>) -> Result<()> {
        let handle = context.submit_download(self.task, None, true)?;
        // Failure and cancellation already failed the batch through the fatal flag.
        if let Outcome::Done(value) = handle.await {
            context.done(value)?;
        }
        Ok(())
    }
}

/// A batch of fatal downloads, done with every value in submission order
pub fn all<T>(tasks: Vec<Box<dyn DownloadTask<T>>>) -> AllDownloads<T>
where
    T: Send + 'static,
{
    AllDownloads { tasks }
}

/// See [`all`]
pub struct AllDownloads<T> {
    tasks: Vec<Box<dyn DownloadTask<T>>>,
}

#[async_trait::async_trait]
impl<T: Send + 'static> CombinedDownloadTask<Vec<T>> for AllDownloads<T> {
    async fn execute(
        self: Box<Self>,
        context: Arc<dyn CombinedDownloadContext<Vec<T>>>,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            handles.push(context.submit_download(task, None, true)?);
        }

        let mut values = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Outcome::Done(value) => values.push(value),
                _ => return Ok(()),
            }
        }
        context.done(values)
    }
}

/// Handle to one submitted task
///
/// Awaiting the handle yields the task's [`Outcome`]. Dropping it leaves the task
/// running.
#[must_use = "dropping a TaskHandle does not cancel the task"]
pub struct TaskHandle<U> {
    id: TaskId,
    token: CancellationToken,
    outcome: oneshot::Receiver<Outcome<U>>,
}

impl<U> TaskHandle<U> {
    pub(crate) fn new(
        id: TaskId,
        token: CancellationToken,
        outcome: oneshot::Receiver<Outcome<U>>,
    ) -> Self {
        Self { id, token, outcome }
    }

    /// Task identifier, unique within the downloader
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cancellation. No effect once the task has finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested through this handle
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that cancels this task, for wiring into other cancellation scopes
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<U> fmt::Debug for TaskHandle<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl<U> Future for TaskHandle<U> {
    type Output = Outcome<U>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or(Outcome::Cancelled))
    }
}
