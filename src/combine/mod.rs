//! Combined download contexts and the task shapes submitted into them.
//!
//! - [`context`] - The context trait, its typed submission entry points and the tracking implementation
//! - [`appended`] - Decorating context that converts results with a processor
//! - [`task`] - Download and combined task shapes, combinators and task handles
//! - `job` - Type-erased submissions and the task runner
//! - `outstanding` - Outstanding-task counter behind `await_all_tasks`

pub mod appended;
pub mod context;
pub(crate) mod job;
pub(crate) mod outstanding;
pub mod task;


pub use appended::{AppendedContext, append};
pub(crate) use context::BatchContext;
pub use context::{BatchState, CombinedDownloadContext, ContextExt};
pub use job::Submission;
pub use task::{
    AllDownloads, AppendedCombinedTask, AppendedDownloadTask, CombinedDownloadTask,
    CombinedDownloadTaskExt, DownloadTask, DownloadTaskExt, JsonDownloadTask, MemoryDownloadTask,
    SingleDownload, TaskHandle, all, single,
};
