//! HTTP access to the range-query API.
//!
//! The poller only needs `fetch(uri) -> (status, body)`; `MetricsSource`
//! is that seam, with `HttpMetricsSource` as the production implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};

/// Raw response of a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// Reasons a fetch produced nothing usable. None of these change state.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unsuccessful response status {0}")]
    Status(u16),
}

/// Anything that can execute a range query URI.
pub trait MetricsSource: Send + Sync {
    fn fetch(&self, uri: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// `MetricsSource` backed by a pooled reqwest client.
#[derive(Clone)]
pub struct HttpMetricsSource {
    client: reqwest::Client,
}

impl HttpMetricsSource {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, uri: &str) -> Result<FetchResponse, FetchError> {
        let resp = self.client.get(uri).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(FetchResponse { status, body })
    }
}
