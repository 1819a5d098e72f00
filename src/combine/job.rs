//! Type-erased submissions and the runner that drives one task to its outcome.
//!
//! A task finishes in a fixed order:
//! 1. a fatal failure or cancellation escalates to the owning batch
//! 2. the task leaves the outstanding set
//! 3. `TaskFinished` is emitted
//! 4. the callback receives its terminal notification
//! 5. the handle receives the outcome

use crate::callback::{AsyncCallback, CallbackProgress, CombinedDownloadCallback, DownloadCallback};
use crate::error::{Error, Result, SharedError, UsageError};
use crate::resolver::{NoProgress, Resource, ResourceResolver};
use crate::types::{BatchId, Event, Outcome, TaskId, TaskKind};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::context::{BatchContext, CombinedDownloadContext, ContextCore};
use super::task::{CombinedDownloadTask, DownloadTask, TaskHandle};

/// A task ready to be registered in a context
///
/// Built by the [`ContextExt`](super::ContextExt) entry points and handed to
/// [`CombinedDownloadContext::submit`]. Decorating contexts forward it untouched.
pub struct Submission {
    pub(crate) kind: TaskKind,
    pub(crate) fatal: bool,
    pub(crate) token: CancellationToken,
    pub(crate) job: Box<dyn Job>,
}

impl Submission {
    /// Shape of the submitted task
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Whether a failure of this task fails the batch
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub(crate) fn typed<U: Send + 'static>(
        kind: TaskKind,
        work: Work<U>,
        callback: Option<Arc<dyn AsyncCallback<U>>>,
        fatal: bool,
    ) -> (Self, PendingHandle<U>) {
        let token = CancellationToken::new();
        let (reply, outcome) = oneshot::channel();
        let job = TypedJob {
            work,
            delivery: Delivery::new(callback, reply),
        };
        let submission = Self {
            kind,
            fatal,
            token: token.clone(),
            job: Box::new(job),
        };
        (submission, PendingHandle { token, outcome })
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("kind", &self.kind)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

/// The receiving half of a submission, waiting for its task id
pub(crate) struct PendingHandle<U> {
    token: CancellationToken,
    outcome: oneshot::Receiver<Outcome<U>>,
}

impl<U> PendingHandle<U> {
    pub(crate) fn assign(self, id: TaskId) -> TaskHandle<U> {
        TaskHandle::new(id, self.token, self.outcome)
    }
}

pub(crate) trait Job: Send {
    /// Run the task inside `run`'s context until it has delivered its outcome
    fn start(self: Box<Self>, run: TaskRun) -> BoxFuture<'static, ()>;

    /// The context refused the task; it will never run
    fn reject(self: Box<Self>);

    fn resource(&self) -> Option<&Resource> {
        None
    }
}

/// Receives fatal task failures
pub(crate) trait Escalate: Send + Sync {
    /// Fail the batch with `cause`; false if it already was terminal
    fn escalate(&self, cause: SharedError) -> bool;
}

/// A registered task, bound to the context it runs in
pub(crate) struct TaskRun {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) fatal: bool,
    pub(crate) token: CancellationToken,
    pub(crate) core: Arc<ContextCore>,
    pub(crate) owner: Arc<dyn Escalate>,
}

impl TaskRun {
    /// Resolves when either the task's handle or its batch is cancelled
    pub(crate) async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.core.token.cancelled() => {}
        }
    }

    fn settle<U>(&self, outcome: &Outcome<U>) {
        let batch = self.core.id;

        if self.fatal {
            let cause = match outcome {
                Outcome::Done(_) => None,
                Outcome::Failed(cause) => Some(Arc::clone(cause)),
                // Cancelled along with its batch
                Outcome::Cancelled if self.core.token.is_cancelled() => None,
                Outcome::Cancelled => Some(Arc::new(Error::TaskCancelled { task: self.id })),
            };
            if let Some(cause) = cause {
                let error = cause.to_string();
                if self.owner.escalate(cause) {
                    tracing::warn!(
                        batch_id = batch.0,
                        task_id = self.id.0,
                        kind = self.kind.as_str(),
                        error = %error,
                        "Fatal task failed its batch"
                    );
                }
            }
        }

        self.core.outstanding.retire();

        let status = outcome.status();
        tracing::debug!(
            batch_id = batch.0,
            task_id = self.id.0,
            kind = self.kind.as_str(),
            status = ?status,
            "Task finished"
        );
        self.core.session.emit(Event::TaskFinished {
            batch,
            task: self.id,
            kind: self.kind,
            status,
        });
    }
}

pub(crate) enum Work<U> {
    Future(BoxFuture<'static, Result<U>>),
    Download(
        Box<dyn DownloadTask<U>>,
        Option<Arc<dyn DownloadCallback<U>>>,
    ),
    Combined(
        Box<dyn CombinedDownloadTask<U>>,
        Option<Arc<dyn CombinedDownloadCallback<U>>>,
    ),
}

struct TypedJob<U> {
    work: Work<U>,
    delivery: Delivery<U>,
}

impl<U: Send + 'static> Job for TypedJob<U> {
    fn start(self: Box<Self>, run: TaskRun) -> BoxFuture<'static, ()> {
        let TypedJob { work, delivery } = *self;
        async move {
            let outcome = match work {
                Work::Future(body) => run_leaf(&run, body).await,
                Work::Download(task, progress) => {
                    let resolver = Arc::clone(&run.core.session.resolver);
                    run_leaf(&run, fetch(resolver, task, progress).boxed()).await
                }
                Work::Combined(task, observer) => {
                    let (context, outcome) = BatchContext::nested(&run.core, observer);
                    drive(context, outcome, task, run.cancelled()).await
                }
            };
            run.settle(&outcome);
            delivery.deliver(outcome);
        }
        .boxed()
    }

    fn reject(self: Box<Self>) {
        self.delivery.deliver(Outcome::Cancelled);
    }

    fn resource(&self) -> Option<&Resource> {
        match &self.work {
            Work::Download(task, _) => Some(task.resource()),
            _ => None,
        }
    }
}

/// Terminal delivery for one task or batch: the callback first, then the handle
pub(crate) struct Delivery<U> {
    callback: Option<Arc<dyn AsyncCallback<U>>>,
    reply: oneshot::Sender<Outcome<U>>,
}

impl<U> Delivery<U> {
    pub(crate) fn new(
        callback: Option<Arc<dyn AsyncCallback<U>>>,
        reply: oneshot::Sender<Outcome<U>>,
    ) -> Self {
        Self { callback, reply }
    }

    pub(crate) fn deliver(self, outcome: Outcome<U>) {
        if let Some(callback) = &self.callback {
            let notified = std::panic::catch_unwind(AssertUnwindSafe(|| match &outcome {
                Outcome::Done(value) => callback.on_done(value),
                Outcome::Failed(cause) => callback.on_failed(Arc::clone(cause)),
                Outcome::Cancelled => callback.on_cancelled(),
            }));
            if let Err(panic) = notified {
                tracing::error!(
                    status = ?outcome.status(),
                    panic = %panic_message(panic.as_ref()),
                    "Callback panicked"
                );
            }
        }
        // Nobody awaiting the handle is fine.
        let _ = self.reply.send(outcome);
    }
}

/// Run an action, computation or download body on a worker permit
async fn run_leaf<U>(run: &TaskRun, body: BoxFuture<'static, Result<U>>) -> Outcome<U> {
    let pool = &run.core.session.pool;
    let work = async {
        let _permit = if run.kind.needs_worker() {
            pool.acquire().await
        } else {
            None
        };
        AssertUnwindSafe(body).catch_unwind().await
    };

    tokio::select! {
        biased;
        _ = run.cancelled() => Outcome::Cancelled,
        result = work => match result {
            Ok(Ok(value)) => Outcome::Done(value),
            Ok(Err(e)) => Outcome::Failed(Arc::new(e)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    batch_id = run.core.id.0,
                    task_id = run.id.0,
                    kind = run.kind.as_str(),
                    panic = %message,
                    "Task panicked"
                );
                Outcome::Failed(Arc::new(Error::Other(format!("task panicked: {message}"))))
            }
        },
    }
}

async fn fetch<U: 'static>(
    resolver: Arc<dyn ResourceResolver>,
    task: Box<dyn DownloadTask<U>>,
    progress: Option<Arc<dyn DownloadCallback<U>>>,
) -> Result<U> {
    let resource = task.resource().clone();
    let payload = match progress {
        Some(callback) => {
            resolver
                .resolve(&resource, &CallbackProgress(callback))
                .await?
        }
        None => resolver.resolve(&resource, &NoProgress).await?,
    };
    task.materialize(payload)
}

/// Run a combined task body against `context` and wait for the batch outcome.
///
/// The body runs as its own task and never holds a worker permit. When
/// `cancelled` fires first the batch is cancelled, unless it already finished.
pub(crate) async fn drive<U: Send + 'static>(
    context: Arc<BatchContext<U>>,
    outcome: oneshot::Receiver<Outcome<U>>,
    task: Box<dyn CombinedDownloadTask<U>>,
    cancelled: impl Future<Output = ()>,
) -> Outcome<U> {
    let batch = context.core().id;
    let session = Arc::clone(&context.core().session);
    let weak = Arc::downgrade(&context);

    let keep = Arc::clone(&context);
    let handed: Arc<dyn CombinedDownloadContext<U>> = context;
    session.pool.spawn(
        async move {
            let error = match AssertUnwindSafe(task.execute(handed)).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(panic) => Error::Other(format!(
                    "combined task panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };
            tracing::debug!(batch_id = batch.0, error = %error, "Combined task body failed");
            keep.escalate(Arc::new(error));
        }
        .boxed(),
    );

    wait_outcome(batch, weak, outcome, cancelled).await
}

/// Wait for a batch outcome, cancelling the batch if `cancelled` fires first
pub(crate) async fn wait_outcome<U: Send + 'static>(
    batch: BatchId,
    context: Weak<BatchContext<U>>,
    mut outcome: oneshot::Receiver<Outcome<U>>,
    cancelled: impl Future<Output = ()>,
) -> Outcome<U> {
    tokio::select! {
        biased;
        received = &mut outcome => received.unwrap_or_else(|_| abandoned(batch)),
        _ = cancelled => {
            if let Some(context) = context.upgrade()
                && context.terminate(Outcome::Cancelled).is_ok()
            {
                tracing::debug!(batch_id = batch.0, "Batch cancelled by its owner");
            }
            // A batch that finished first keeps its own outcome.
            outcome.await.unwrap_or(Outcome::Cancelled)
        }
    }
}

pub(crate) fn abandoned<U>(batch: BatchId) -> Outcome<U> {
    tracing::warn!(batch_id = batch.0, "Batch abandoned without an outcome");
    Outcome::Failed(Arc::new(UsageError::Abandoned { batch }.into()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
