//! HTTP resolver built on `reqwest`.

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;

use super::{DownloadProgress, Resource, ResourceResolver};

/// Resolves resources with HTTP GET, retrying transient failures
#[derive(Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpResolver {
    /// Build a resolver from HTTP and retry settings
    pub fn new(http: &HttpConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(http.user_agent.clone())
            .connect_timeout(http.connect_timeout)
            .timeout(http.request_timeout)
            .build()?;
        Ok(Self { client, retry })
    }

    /// Wrap an existing client (shared connection pool, custom TLS, ...)
    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn fetch_once(
        &self,
        resource: &Resource,
        progress: &dyn DownloadProgress,
    ) -> Result<Vec<u8>> {
        let mut response = self.client.get(resource.url().clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                url: resource.url().to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        progress.updated(0, total);

        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            progress.updated(body.len() as u64, total);
        }

        if let Some(expected) = total
            && body.len() as u64 != expected
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: received {} of {} bytes",
                    resource,
                    body.len(),
                    expected
                ),
            )));
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl ResourceResolver for HttpResolver {
    async fn resolve(
        &self,
        resource: &Resource,
        progress: &dyn DownloadProgress,
    ) -> Result<Vec<u8>> {
        tracing::debug!(url = %resource, "Fetching resource");

        let body = retry_with_backoff(
            &self.retry,
            |e, attempt, max| progress.retry(e, attempt, max),
            || self.fetch_once(resource, progress),
        )
        .await?;

        tracing::debug!(url = %resource, bytes = body.len(), "Resource fetched");
        Ok(body)
    }
}
