//! # combine-dl
//!
//! Composable asynchronous orchestration for batch downloads.
//!
//! ## Design Philosophy
//!
//! A batch is a [`CombinedDownloadContext`]. Four task shapes can be submitted into it:
//! - **Actions** - futures with no value
//! - **Computations** - futures producing a value
//! - **Downloads** - a single resource, fetched by a [`ResourceResolver`] and materialized
//! - **Combined tasks** - nested batches whose bodies submit further tasks
//!
//! The context tracks every task to completion, fails fast when a task marked
//! fatal fails, and reports the batch outcome exactly once. An [`AppendedContext`]
//! exposes a context typed for `S` as one typed for `R` through a
//! [`ResultProcessor`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use combine_dl::{CombinedDownloader, CombinedDownloadContext, Config, ContextExt};
//! use combine_dl::{JsonDownloadTask, Resource};
//! use std::sync::Arc;
//!
//! #[derive(serde::Deserialize)]
//! struct Manifest {
//!     files: Vec<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = CombinedDownloader::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let batch = downloader.download(
//!         |ctx: Arc<dyn CombinedDownloadContext<usize>>| async move {
//!             let manifest = Resource::parse("https://example.com/manifest.json")?;
//!             let handle =
//!                 ctx.submit_download(JsonDownloadTask::<Manifest>::new(manifest), None, true)?;
//!             if let Some(manifest) = handle.await.done() {
//!                 ctx.done(manifest.files.len())?;
//!             }
//!             Ok(())
//!         },
//!         None,
//!     )?;
//!
//!     println!("{} files", batch.await.into_result()?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Task callbacks
pub mod callback;
/// Combined download contexts and task shapes
pub mod combine;
/// Configuration types
pub mod config;
/// Session manager
pub mod downloader;
/// Error types
pub mod error;
/// Result processors
pub mod processor;
/// Single-resource fetching
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use callback::{AsyncCallback, CombinedDownloadCallback, DownloadCallback};
pub use combine::{
    AppendedContext, BatchState, CombinedDownloadContext, CombinedDownloadTask,
    CombinedDownloadTaskExt, ContextExt, DownloadTask, DownloadTaskExt, JsonDownloadTask,
    MemoryDownloadTask, Submission, TaskHandle, all, append, single,
};
pub use config::Config;
pub use downloader::{BatchHandle, CombinedDownloader};
pub use error::{Error, Result, SharedError, UsageError};
pub use processor::{ProcessorExt, ResultProcessor};
pub use resolver::{DownloadProgress, HttpResolver, Resource, ResourceResolver};
pub use types::{BatchId, Event, Outcome, TaskId, TaskKind, TaskStatus};

/// Run the downloader until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to `ctrl_c` if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(downloader: CombinedDownloader) {
    wait_for_signal().await;
    downloader.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
