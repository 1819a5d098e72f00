//! Shared test helpers: a scripted resolver, gates and recording callbacks.

use crate::callback::{AsyncCallback, CombinedDownloadCallback, DownloadCallback};
use crate::config::Config;
use crate::downloader::CombinedDownloader;
use crate::error::{Error, Result, SharedError};
use crate::resolver::{DownloadProgress, Resource, ResourceResolver};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, failing the test if it takes longer than [`TEST_TIMEOUT`]
pub(crate) async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("timed out")
}

/// Resource on the scripted host
pub(crate) fn resource(path: &str) -> Resource {
    Resource::parse(&format!("http://scripted.test/{path}")).unwrap()
}

/// Holds a scripted fetch until opened
#[derive(Clone, Default)]
pub(crate) struct Gate(CancellationToken);

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        self.0.cancel();
    }

    pub(crate) async fn wait(&self) {
        self.0.cancelled().await;
    }
}

#[derive(Clone)]
enum Reply {
    Bytes(Vec<u8>),
    Status(u16),
}

/// Resolver answering from a fixed table; unknown resources are a 404
#[derive(Default)]
pub(crate) struct ScriptedResolver {
    routes: Mutex<HashMap<String, (Reply, Option<Gate>)>>,
    fetched: AtomicUsize,
}

impl ScriptedResolver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, path: &str, reply: Reply, gate: Option<Gate>) {
        self.routes
            .lock()
            .unwrap()
            .insert(resource(path).to_string(), (reply, gate));
    }

    pub(crate) fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.route(path, Reply::Bytes(body.into()), None);
    }

    /// Serve `body` once the returned gate is opened
    pub(crate) fn serve_gated(&self, path: &str, body: impl Into<Vec<u8>>) -> Gate {
        let gate = Gate::new();
        self.route(path, Reply::Bytes(body.into()), Some(gate.clone()));
        gate
    }

    pub(crate) fn fail(&self, path: &str, status: u16) {
        self.route(path, Reply::Status(status), None);
    }

    /// Number of resolve calls so far
    pub(crate) fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResourceResolver for ScriptedResolver {
    async fn resolve(
        &self,
        resource: &Resource,
        progress: &dyn DownloadProgress,
    ) -> Result<Vec<u8>> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        let url = resource.to_string();
        let route = self.routes.lock().unwrap().get(&url).cloned();

        let (reply, gate) = route.unwrap_or((Reply::Status(404), None));
        if let Some(gate) = gate {
            gate.wait().await;
        }

        match reply {
            Reply::Bytes(body) => {
                let total = body.len() as u64;
                progress.updated(0, Some(total));
                progress.updated(total, Some(total));
                Ok(body)
            }
            Reply::Status(status) => Err(Error::Http { url, status }),
        }
    }
}

/// One notification observed by a [`Recorder`]
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Recorded<T> {
    Done(T),
    Failed(String),
    Cancelled,
    Updated(u64, Option<u64>),
    Started(String),
}

impl<T> Recorded<T> {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Recorded::Done(_) | Recorded::Failed(_) | Recorded::Cancelled
        )
    }
}

/// Callback recording every notification in order
pub(crate) struct Recorder<T> {
    events: watch::Sender<Vec<Recorded<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = watch::channel(Vec::new());
        Arc::new(Self { events })
    }

    fn push(&self, event: Recorded<T>) {
        self.events.send_modify(|events| events.push(event));
    }

    pub(crate) fn events(&self) -> Vec<Recorded<T>> {
        self.events.borrow().clone()
    }

    pub(crate) fn terminal(&self) -> Vec<Recorded<T>> {
        self.events()
            .into_iter()
            .filter(Recorded::is_terminal)
            .collect()
    }

    /// Wait until `predicate` holds for the recorded notifications
    pub(crate) async fn wait_until(&self, predicate: impl Fn(&[Recorded<T>]) -> bool) {
        let mut events = self.events.subscribe();
        within(events.wait_for(|events| predicate(events)))
            .await
            .unwrap();
    }

    /// Wait for the terminal notification and return it
    pub(crate) async fn wait_terminal(&self) -> Recorded<T> {
        self.wait_until(|events| events.iter().any(Recorded::is_terminal))
            .await;
        self.terminal().remove(0)
    }

    pub(crate) fn as_async(self: &Arc<Self>) -> Option<Arc<dyn AsyncCallback<T>>> {
        Some(Arc::clone(self) as Arc<dyn AsyncCallback<T>>)
    }

    pub(crate) fn as_download(self: &Arc<Self>) -> Option<Arc<dyn DownloadCallback<T>>> {
        Some(Arc::clone(self) as Arc<dyn DownloadCallback<T>>)
    }

    pub(crate) fn as_combined(self: &Arc<Self>) -> Option<Arc<dyn CombinedDownloadCallback<T>>> {
        Some(Arc::clone(self) as Arc<dyn CombinedDownloadCallback<T>>)
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncCallback<T> for Recorder<T> {
    fn on_done(&self, result: &T) {
        self.push(Recorded::Done(result.clone()));
    }

    fn on_failed(&self, error: SharedError) {
        self.push(Recorded::Failed(error.to_string()));
    }

    fn on_cancelled(&self) {
        self.push(Recorded::Cancelled);
    }
}

impl<T: Clone + Send + Sync + 'static> DownloadCallback<T> for Recorder<T> {
    fn updated(&self, done: u64, total: Option<u64>) {
        self.push(Recorded::Updated(done, total));
    }
}

impl<T: Clone + Send + Sync + 'static> CombinedDownloadCallback<T> for Recorder<T> {
    fn download_started(&self, resource: &Resource) {
        self.push(Recorded::Started(resource.to_string()));
    }
}

/// Downloader backed by a fresh [`ScriptedResolver`]
pub(crate) fn create_test_downloader(
    max_concurrent_tasks: Option<usize>,
) -> (CombinedDownloader, Arc<ScriptedResolver>) {
    let mut config = Config::default();
    config.worker.max_concurrent_tasks = max_concurrent_tasks;

    let resolver = ScriptedResolver::new();
    let downloader = CombinedDownloader::with_resolver(config, resolver.clone()).unwrap();
    (downloader, resolver)
}
