//! Core types and events

use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a batch (one combined download context)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl BatchId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a task submitted into a batch
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of task shapes a context accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Imperative side effect, no value
    Action,
    /// Value-producing computation
    Computation,
    /// Single resource fetch
    Download,
    /// Nested batch defined by further submissions
    Combined,
}

impl TaskKind {
    /// Stable lowercase name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Action => "action",
            TaskKind::Computation => "computation",
            TaskKind::Download => "download",
            TaskKind::Combined => "combined",
        }
    }

    /// Whether tasks of this kind consume a worker permit while running
    pub(crate) fn needs_worker(&self) -> bool {
        !matches!(self, TaskKind::Combined)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a task or a batch
#[derive(Debug)]
pub enum Outcome<T> {
    /// Completed successfully with a value
    Done(T),
    /// Failed with a cause
    Failed(SharedError),
    /// Cancelled before completing
    Cancelled,
}

impl<T> Outcome<T> {
    /// Check if the outcome is a success
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Check if the outcome is a failure
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Check if the outcome is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The success value, if any
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            _ => None,
        }
    }

    /// The failure cause, if any
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            Outcome::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Convert to a Result, mapping failure and cancellation to batch errors
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::Failed(cause) => Err(crate::error::Error::BatchFailed(cause)),
            Outcome::Cancelled => Err(crate::error::Error::BatchCancelled),
        }
    }

    /// Summary without the success value
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Done(_) => TaskStatus::Succeeded,
            Outcome::Failed(cause) => TaskStatus::Failed {
                error: cause.to_string(),
            },
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Serializable terminal status, carried by events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Completed successfully
    Succeeded,
    /// Failed with an error message
    Failed {
        /// Display form of the failure cause
        error: String,
    },
    /// Cancelled
    Cancelled,
}

/// Event emitted during batch lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A context was created
    BatchStarted {
        /// Batch ID
        batch: BatchId,
        /// Enclosing batch, for contexts created by a combined task
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<BatchId>,
    },

    /// A task was accepted into a batch
    TaskSubmitted {
        /// Batch ID
        batch: BatchId,
        /// Task ID
        task: TaskId,
        /// Task shape
        kind: TaskKind,
        /// Whether the task's failure fails the batch
        fatal: bool,
    },

    /// A task reached its terminal state and left the outstanding set
    TaskFinished {
        /// Batch ID
        batch: BatchId,
        /// Task ID
        task: TaskId,
        /// Task shape
        kind: TaskKind,
        /// Terminal status
        #[serde(flatten)]
        status: TaskStatus,
    },

    /// A batch reached its terminal state
    BatchFinished {
        /// Batch ID
        batch: BatchId,
        /// Terminal status
        #[serde(flatten)]
        status: TaskStatus,
    },
}
