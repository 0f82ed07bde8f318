//! Origin HTTP access.
//!
//! Provides the [`OriginFetcher`] seam used by the throttler and a production
//! implementation on top of reqwest with:
//! - Configurable request and connect timeouts
//! - User-agent management
//! - Status surfacing on HEAD, stream termination on failed GET

use crate::config::NetworkConfig;
use crate::error::{Result, SlowbinError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{header, Client, ClientBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Status and headers returned by an origin HEAD request.
#[derive(Debug, Clone, Default)]
pub struct OriginHead {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl OriginHead {
    /// Create a head response with no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    /// Add a header. Names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `Content-Type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// The raw `Content-Length` header, if present.
    pub fn content_length(&self) -> Option<&str> {
        self.header(header::CONTENT_LENGTH.as_str())
    }
}

/// Access to origin servers.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Issue a HEAD request and return its status and headers.
    ///
    /// Non-success statuses are returned, not raised.
    async fn head(&self, url: &str) -> Result<OriginHead>;

    /// Issue a GET request and return the body as a lazy stream of buffers.
    async fn get_stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>>;
}

/// Origin fetcher backed by reqwest.
///
/// HEAD requests share one total timeout. Bodies are read at the paced speed
/// and may take up to the longest allowed rate, so GETs go through a second
/// client that only bounds the connect phase.
pub struct ReqwestOrigin {
    client: Client,
    download_client: Client,
}

impl ReqwestOrigin {
    /// Create a fetcher with the default network configuration.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a fetcher with a custom HEAD request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::with_builder(timeout, |builder| builder)
    }

    /// Create a fetcher, passing both client builders through `customize`
    /// first (proxy settings, DNS overrides).
    pub fn with_builder(
        timeout: Duration,
        customize: impl Fn(ClientBuilder) -> ClientBuilder,
    ) -> Result<Self> {
        let client = customize(Client::builder())
            .timeout(timeout)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| SlowbinError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        // No total timeout: it would cut off any body paced slower than it.
        let download_client = customize(Client::builder())
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| SlowbinError::Network {
                message: format!("Failed to create download HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            download_client,
        })
    }
}

#[async_trait]
impl OriginFetcher for ReqwestOrigin {
    async fn head(&self, url: &str) -> Result<OriginHead> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| SlowbinError::Network {
                message: format!("HEAD {} failed: {}", url, e),
                source: Some(e),
            })?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        debug!("HEAD {} -> {}", url, response.status());

        Ok(OriginHead {
            status: response.status().as_u16(),
            headers,
        })
    }

    async fn get_stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(|e| SlowbinError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Ok(stream::once(async move {
                Err(SlowbinError::OriginStatus {
                    status: status.as_u16(),
                })
            })
            .boxed());
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SlowbinError::from))
            .boxed())
    }
}
