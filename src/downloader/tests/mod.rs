use super::test_helpers::{Recorded, Recorder, create_test_downloader, resource, within};
use super::*;
use crate::combine::{ContextExt, MemoryDownloadTask};
use crate::error::UsageError;
use crate::types::{TaskKind, TaskStatus};
