//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::CombinedDownloader;

/// How long `shutdown` waits for cancelled tasks to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl CombinedDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new batches
    /// 2. Cancels every live batch, which cooperatively cancels their tasks
    /// 3. Waits for outstanding tasks to finish, with a timeout (30 seconds)
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");

        self.session.accepting_new.store(false, Ordering::SeqCst);
        self.session.shutdown.cancel();
        tracing::info!(
            outstanding = self.session.outstanding.current(),
            free_workers = ?self.session.pool.available(),
            "Stopped accepting new batches, cancelled live batches"
        );

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.session.outstanding.quiescent()).await {
            Ok(()) => tracing::info!("All outstanding tasks finished"),
            Err(_) => tracing::warn!(
                outstanding = self.session.outstanding.current(),
                "Timeout waiting for tasks to finish, proceeding with shutdown"
            ),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        !self.session.accepting_new.load(Ordering::SeqCst)
    }
}
