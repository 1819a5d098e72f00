//! Single-resource download collaborator.
//!
//! The orchestration layer treats a resource fetch as an opaque unit with a known
//! success or failure outcome. This module defines that boundary:
//! - [`Resource`] - identity of one fetch
//! - [`ResourceResolver`] - fetches a resource's bytes
//! - [`DownloadProgress`] - progress and retry notifications emitted while fetching
//! - [`http`] - reference resolver on `reqwest` with retry and backoff

mod http;


pub use http::HttpResolver;

use crate::error::{Error, Result};
use std::fmt;
use url::Url;

/// Identity of a single external resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resource {
    url: Url,
}

impl Resource {
    /// Create a resource for an already parsed URL
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Parse a resource from a URL string
    pub fn parse(url: &str) -> Result<Self> {
        Url::parse(url)
            .map(Self::new)
            .map_err(|e| Error::Other(format!("invalid resource URL '{url}': {e}")))
    }

    /// The resource URL
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

impl From<Url> for Resource {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

/// Receives progress while a resource is being fetched
pub trait DownloadProgress: Send + Sync {
    /// `done` bytes received so far out of `total`, when the length is known
    fn updated(&self, done: u64, total: Option<u64>) {
        let _ = (done, total);
    }

    /// A transient failure occurred and attempt `attempt` of `max` retries is about to start
    fn retry(&self, error: &Error, attempt: u32, max: u32) {
        let _ = (error, attempt, max);
    }
}

/// Progress listener that ignores every notification
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// Fetches the bytes of a single resource
///
/// Implementations own transport concerns: connection reuse, retries, integrity
/// checks. A returned error is the final verdict for that fetch.
#[async_trait::async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Fetch the full payload of `resource`
    async fn resolve(&self, resource: &Resource, progress: &dyn DownloadProgress)
    -> Result<Vec<u8>>;
}
