//! Error types for combine-dl
//!
//! This module separates the four kinds of failure the orchestration layer deals with:
//! - Task failures (I/O, network, decoding) reported to the task's own callback
//! - Batch failures, the terminal `failed` state of a context
//! - Conversion failures raised by a result processor at a decorator boundary
//! - Usage errors, programming mistakes such as a second terminal notification

use crate::types::{BatchId, TaskId};
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for combine-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// An error observed by more than one party (callback, handle, owning context)
pub type SharedError = Arc<Error>;

/// Main error type for combine-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker.max_concurrent_tasks")
        key: Option<String>,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// The URL that was requested
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (decoding a downloaded JSON payload, etc.)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A result processor could not convert a successful value
    #[error("unable to convert result: {0}")]
    Conversion(#[source] SharedError),

    /// The API was used in a way its contract forbids
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// A fatal task was cancelled, which fails its batch
    #[error("task {task} was cancelled")]
    TaskCancelled {
        /// The cancelled task
        task: TaskId,
    },

    /// The batch was driven to its failed state
    #[error("batch failed: {0}")]
    BatchFailed(#[source] SharedError),

    /// The batch was cancelled
    #[error("batch cancelled")]
    BatchCancelled,

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Contract violations by the caller
///
/// These are programming errors, not operational failures, and are never retried.
#[derive(Debug, Error)]
pub enum UsageError {
    /// A terminal notification arrived after the batch already reached a terminal state
    #[error("batch {batch} is already {state}, ignoring {attempted}")]
    AlreadyTerminal {
        /// The batch that was already terminal
        batch: BatchId,
        /// The state the batch is in (e.g., "succeeded")
        state: &'static str,
        /// The notification that was attempted (e.g., "done")
        attempted: &'static str,
    },

    /// A task was submitted into a batch that is no longer active
    #[error("cannot submit into batch {batch}: batch is {state}")]
    SubmitAfterTerminal {
        /// The batch that rejected the submission
        batch: BatchId,
        /// The state the batch is in
        state: &'static str,
    },

    /// Every reference to an active batch was dropped without a terminal notification
    #[error("batch {batch} was abandoned without reporting an outcome")]
    Abandoned {
        /// The abandoned batch
        batch: BatchId,
    },
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Check whether this error is a caller contract violation
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }
}
