//! The combined download context: one logical batch of submitted tasks.

use crate::callback::{AsyncCallback, CombinedDownloadCallback, DownloadCallback};
use crate::downloader::Session;
use crate::error::{Error, Result, SharedError, UsageError};
use crate::types::{BatchId, Event, Outcome, TaskId, TaskKind};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::job::{Escalate, Submission, TaskRun, Work};
use super::outstanding::Outstanding;
use super::task::{CombinedDownloadTask, DownloadTask, TaskHandle};

/// Lifecycle state of a batch
///
/// `Active` moves to exactly one of the other states, which are absorbing.
#[derive(Clone, Debug)]
pub enum BatchState {
    /// Accepting submissions, no outcome yet
    Active,
    /// `done` was delivered
    Succeeded,
    /// `failed` was delivered, directly or by a fatal task
    Failed(SharedError),
    /// `cancelled` was delivered
    Cancelled,
}

impl BatchState {
    /// Check if the batch has not reached a terminal state
    pub fn is_active(&self) -> bool {
        matches!(self, BatchState::Active)
    }

    /// Failed or cancelled; joiners stop waiting for outstanding tasks
    pub fn is_aborted(&self) -> bool {
        matches!(self, BatchState::Failed(_) | BatchState::Cancelled)
    }

    /// Stable lowercase name, used in logs and usage errors
    pub fn name(&self) -> &'static str {
        match self {
            BatchState::Active => "active",
            BatchState::Succeeded => "succeeded",
            BatchState::Failed(_) => "failed",
            BatchState::Cancelled => "cancelled",
        }
    }

    fn from_outcome<T>(outcome: &Outcome<T>) -> Self {
        match outcome {
            Outcome::Done(_) => BatchState::Succeeded,
            Outcome::Failed(cause) => BatchState::Failed(Arc::clone(cause)),
            Outcome::Cancelled => BatchState::Cancelled,
        }
    }

    fn into_join_result(self) -> Result<()> {
        match self {
            BatchState::Active | BatchState::Succeeded => Ok(()),
            BatchState::Failed(cause) => Err(Error::BatchFailed(cause)),
            BatchState::Cancelled => Err(Error::BatchCancelled),
        }
    }
}

/// One logical batch of downloads, typed by the value it produces
///
/// Tasks go in through [`submit`](Self::submit), or more conveniently through the
/// typed entry points of [`ContextExt`]. The batch's own outcome is reported
/// exactly once through [`done`](Self::done), [`failed`](Self::failed) or
/// [`cancelled`](Self::cancelled); later notifications return
/// [`UsageError::AlreadyTerminal`].
pub trait CombinedDownloadContext<T>: Send + Sync {
    /// Report the batch as succeeded with `result`
    fn done(&self, result: T) -> Result<()>;

    /// Report the batch as failed with `cause`
    fn failed(&self, cause: SharedError) -> Result<()>;

    /// Report the batch as cancelled
    fn cancelled(&self) -> Result<()>;

    /// Register and dispatch a task.
    ///
    /// The task counts as outstanding before this returns. Rejected with
    /// [`UsageError::SubmitAfterTerminal`] once the batch is terminal.
    fn submit(&self, submission: Submission) -> Result<TaskId>;

    /// Wait for quiescence: no task outstanding in this batch or any nested batch.
    ///
    /// Resolves with [`Error::BatchFailed`] or [`Error::BatchCancelled`] as soon as
    /// the batch is failed or cancelled, even if tasks are still running.
    /// Dropping the returned future does not affect the tasks.
    fn await_all_tasks(&self) -> BoxFuture<'static, Result<()>>;

    /// Current lifecycle state
    fn state(&self) -> BatchState;

    /// Batch identifier
    fn id(&self) -> BatchId;
}

/// Typed submission entry points, one per task shape
pub trait ContextExt<T>: CombinedDownloadContext<T> {
    /// Submit an imperative action
    fn submit_action<F>(
        &self,
        task: F,
        callback: Option<Arc<dyn AsyncCallback<()>>>,
        fatal: bool,
    ) -> Result<TaskHandle<()>>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (submission, handle) =
            Submission::typed(TaskKind::Action, Work::Future(task.boxed()), callback, fatal);
        let id = self.submit(submission)?;
        Ok(handle.assign(id))
    }

    /// Submit a value-producing computation
    fn submit_computation<U, F>(
        &self,
        task: F,
        callback: Option<Arc<dyn AsyncCallback<U>>>,
        fatal: bool,
    ) -> Result<TaskHandle<U>>
    where
        U: Send + 'static,
        F: Future<Output = Result<U>> + Send + 'static,
    {
        let (submission, handle) = Submission::typed(
            TaskKind::Computation,
            Work::Future(task.boxed()),
            callback,
            fatal,
        );
        let id = self.submit(submission)?;
        Ok(handle.assign(id))
    }

    /// Submit a single-resource download
    fn submit_download<U, D>(
        &self,
        task: D,
        callback: Option<Arc<dyn DownloadCallback<U>>>,
        fatal: bool,
    ) -> Result<TaskHandle<U>>
    where
        U: Send + 'static,
        D: DownloadTask<U>,
    {
        let progress = callback.clone();
        let callback = callback.map(|cb| cb as Arc<dyn AsyncCallback<U>>);
        let (submission, handle) = Submission::typed(
            TaskKind::Download,
            Work::Download(Box::new(task), progress),
            callback,
            fatal,
        );
        let id = self.submit(submission)?;
        Ok(handle.assign(id))
    }

    /// Submit a nested batch whose body submits further tasks
    fn submit_combined<U, K>(
        &self,
        task: K,
        callback: Option<Arc<dyn CombinedDownloadCallback<U>>>,
        fatal: bool,
    ) -> Result<TaskHandle<U>>
    where
        U: Send + 'static,
        K: CombinedDownloadTask<U>,
    {
        let observer = callback.clone();
        let callback = callback.map(|cb| cb as Arc<dyn AsyncCallback<U>>);
        let (submission, handle) = Submission::typed(
            TaskKind::Combined,
            Work::Combined(Box::new(task), observer),
            callback,
            fatal,
        );
        let id = self.submit(submission)?;
        Ok(handle.assign(id))
    }
}

impl<T, C> ContextExt<T> for C where C: CombinedDownloadContext<T> + ?Sized {}

/// State shared by a context and the tasks running in it
pub(crate) struct ContextCore {
    pub(crate) id: BatchId,
    pub(crate) session: Arc<Session>,
    pub(crate) outstanding: Arc<Outstanding>,
    /// Cancelled when the batch fails or is cancelled; nested batches hold child tokens
    pub(crate) token: CancellationToken,
    pub(crate) state: watch::Sender<BatchState>,
}

/// The tracking implementation behind every context handed out by the session
pub(crate) struct BatchContext<T> {
    core: Arc<ContextCore>,
    /// Present while the batch is active; taking it is the terminal transition
    sink: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
    observer: Option<Arc<dyn CombinedDownloadCallback<T>>>,
    this: Weak<BatchContext<T>>,
}

impl<T: Send + 'static> BatchContext<T> {
    /// Create a top-level batch
    pub(crate) fn root(
        session: &Arc<Session>,
        observer: Option<Arc<dyn CombinedDownloadCallback<T>>>,
    ) -> (Arc<Self>, oneshot::Receiver<Outcome<T>>) {
        Self::create(
            Arc::clone(session),
            Outstanding::child(&session.outstanding),
            session.shutdown.child_token(),
            None,
            observer,
        )
    }

    /// Create the batch a combined task runs in
    pub(crate) fn nested(
        parent: &ContextCore,
        observer: Option<Arc<dyn CombinedDownloadCallback<T>>>,
    ) -> (Arc<Self>, oneshot::Receiver<Outcome<T>>) {
        Self::create(
            Arc::clone(&parent.session),
            Outstanding::child(&parent.outstanding),
            parent.token.child_token(),
            Some(parent.id),
            observer,
        )
    }

    fn create(
        session: Arc<Session>,
        outstanding: Arc<Outstanding>,
        token: CancellationToken,
        parent: Option<BatchId>,
        observer: Option<Arc<dyn CombinedDownloadCallback<T>>>,
    ) -> (Arc<Self>, oneshot::Receiver<Outcome<T>>) {
        let id = session.next_batch_id();
        let (state, _) = watch::channel(BatchState::Active);
        let (sink, receiver) = oneshot::channel();

        let core = Arc::new(ContextCore {
            id,
            session,
            outstanding,
            token,
            state,
        });
        let context = Arc::new_cyclic(|this| Self {
            core,
            sink: Mutex::new(Some(sink)),
            observer,
            this: this.clone(),
        });

        tracing::debug!(batch_id = id.0, parent_id = ?parent.map(|p| p.0), "Batch started");
        context
            .core
            .session
            .emit(Event::BatchStarted { batch: id, parent });

        (context, receiver)
    }

    pub(crate) fn core(&self) -> &Arc<ContextCore> {
        &self.core
    }

    fn lock_sink(&self) -> MutexGuard<'_, Option<oneshot::Sender<Outcome<T>>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the batch to its terminal state, or hand the outcome back if it already is terminal
    pub(crate) fn terminate(&self, outcome: Outcome<T>) -> std::result::Result<(), Outcome<T>> {
        let sink = {
            let mut guard = self.lock_sink();
            let Some(sink) = guard.take() else {
                return Err(outcome);
            };
            self.core
                .state
                .send_replace(BatchState::from_outcome(&outcome));
            sink
        };

        let aborted = !outcome.is_done();
        let status = outcome.status();

        tracing::debug!(batch_id = self.core.id.0, status = ?status, "Batch finished");
        self.core.session.emit(Event::BatchFinished {
            batch: self.core.id,
            status,
        });

        // The owner may have stopped listening; the state above is still authoritative.
        let _ = sink.send(outcome);

        if aborted {
            self.core.token.cancel();
        }
        Ok(())
    }

    fn already_terminal(&self, attempted: &'static str) -> Error {
        let state = self.core.state.borrow().name();
        tracing::warn!(
            batch_id = self.core.id.0,
            state,
            attempted,
            "Terminal notification on a batch that already finished"
        );
        UsageError::AlreadyTerminal {
            batch: self.core.id,
            state,
            attempted,
        }
        .into()
    }
}

impl<T: Send + 'static> Escalate for BatchContext<T> {
    fn escalate(&self, cause: SharedError) -> bool {
        self.terminate(Outcome::Failed(cause)).is_ok()
    }
}

impl<T: Send + 'static> CombinedDownloadContext<T> for BatchContext<T> {
    fn done(&self, result: T) -> Result<()> {
        self.terminate(Outcome::Done(result))
            .map_err(|_| self.already_terminal("done"))
    }

    fn failed(&self, cause: SharedError) -> Result<()> {
        self.terminate(Outcome::Failed(cause))
            .map_err(|_| self.already_terminal("failed"))
    }

    fn cancelled(&self) -> Result<()> {
        self.terminate(Outcome::Cancelled)
            .map_err(|_| self.already_terminal("cancelled"))
    }

    fn submit(&self, submission: Submission) -> Result<TaskId> {
        let Submission {
            kind,
            fatal,
            token,
            job,
        } = submission;
        let batch = self.core.id;

        let owner: Arc<dyn Escalate> = match self.this.upgrade() {
            Some(this) => this,
            None => {
                job.reject();
                return Err(UsageError::Abandoned { batch }.into());
            }
        };

        {
            let sink = self.lock_sink();
            if sink.is_none() {
                drop(sink);
                let state = self.core.state.borrow().name();
                tracing::warn!(
                    batch_id = batch.0,
                    kind = kind.as_str(),
                    state,
                    "Rejected submission into a finished batch"
                );
                job.reject();
                return Err(UsageError::SubmitAfterTerminal { batch, state }.into());
            }
            // Registered under the same lock as the terminal transition, so a joiner
            // that starts after this call returns always waits for the task.
            self.core.outstanding.register();
        }

        let id = self.core.session.next_task_id();
        if let (Some(observer), Some(resource)) = (&self.observer, job.resource()) {
            observer.download_started(resource);
        }

        tracing::debug!(batch_id = batch.0, task_id = id.0, kind = kind.as_str(), fatal, "Task submitted");
        self.core.session.emit(Event::TaskSubmitted {
            batch,
            task: id,
            kind,
            fatal,
        });

        let run = TaskRun {
            id,
            kind,
            fatal,
            token,
            core: Arc::clone(&self.core),
            owner,
        };
        self.core.session.pool.spawn(job.start(run));
        Ok(id)
    }

    fn await_all_tasks(&self) -> BoxFuture<'static, Result<()>> {
        let core = Arc::clone(&self.core);
        async move {
            let mut state = core.state.subscribe();
            tokio::select! {
                biased;
                _ = state.wait_for(BatchState::is_aborted) => {}
                _ = core.outstanding.quiescent() => {}
            }
            let state = core.state.borrow().clone();
            state.into_join_result()
        }
        .boxed()
    }

    fn state(&self) -> BatchState {
        self.core.state.borrow().clone()
    }

    fn id(&self) -> BatchId {
        self.core.id
    }
}
