//! End-to-end batches against a mock HTTP server through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use combine_dl::config::RetryConfig;
use combine_dl::{
    CombinedDownloadContext, CombinedDownloadTaskExt, CombinedDownloader, Config, ContextExt,
    DownloadTask, Error, JsonDownloadTask, MemoryDownloadTask, Resource, all,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct Manifest {
    files: Vec<String>,
}

fn config() -> Config {
    let mut config = Config::default();
    config.worker.max_concurrent_tasks = Some(2);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn manifest_then_files_in_one_batch() {
    let server = MockServer::start().await;
    serve(&server, "/manifest.json", r#"{"files":["a.txt","b.txt","c.txt"]}"#).await;
    serve(&server, "/a.txt", "aaaa").await;
    serve(&server, "/b.txt", "bb").await;
    serve(&server, "/c.txt", "c").await;

    let base = server.uri();
    let downloader = CombinedDownloader::new(config()).unwrap();

    let batch = downloader
        .download(
            move |ctx: Arc<dyn CombinedDownloadContext<usize>>| async move {
                let manifest = Resource::parse(&format!("{base}/manifest.json"))?;
                let manifest = ctx
                    .submit_download(JsonDownloadTask::<Manifest>::new(manifest), None, true)?
                    .await
                    .into_result()?;

                let mut files: Vec<Box<dyn DownloadTask<Vec<u8>>>> = Vec::new();
                for name in &manifest.files {
                    let resource = Resource::parse(&format!("{base}/{name}"))?;
                    files.push(Box::new(MemoryDownloadTask::new(resource)));
                }

                // The nested batch reports total bytes instead of the raw payloads
                let total = ctx
                    .submit_combined(
                        all(files).and_then(|payloads: Vec<Vec<u8>>| -> combine_dl::Result<usize> {
                            Ok(payloads.iter().map(Vec::len).sum())
                        }),
                        None,
                        true,
                    )?
                    .await
                    .into_result()?;

                ctx.await_all_tasks().await?;
                ctx.done(total)
            },
            None,
        )
        .unwrap();

    let total = tokio::time::timeout(Duration::from_secs(10), batch)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(total, 7);
}

#[tokio::test]
async fn missing_file_fails_the_whole_batch() {
    let server = MockServer::start().await;
    serve(&server, "/present.bin", "here").await;

    let base = server.uri();
    let downloader = CombinedDownloader::new(config()).unwrap();

    let batch = downloader
        .download(
            move |ctx: Arc<dyn CombinedDownloadContext<Vec<Vec<u8>>>>| async move {
                let files: Vec<Box<dyn DownloadTask<Vec<u8>>>> = vec![
                    Box::new(MemoryDownloadTask::new(Resource::parse(&format!("{base}/present.bin"))?)),
                    Box::new(MemoryDownloadTask::new(Resource::parse(&format!("{base}/absent.bin"))?)),
                ];
                let payloads = ctx.submit_combined(all(files), None, true)?.await;
                if let Some(payloads) = payloads.done() {
                    ctx.done(payloads)?;
                }
                Ok(())
            },
            None,
        )
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), batch)
        .await
        .unwrap();
    let cause = outcome.cause().expect("batch should fail");
    assert!(matches!(cause.as_ref(), Error::Http { status: 404, .. }));

    downloader.shutdown().await;
}
