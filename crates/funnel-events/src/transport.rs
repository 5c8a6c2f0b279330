//! Delivery transports for event batches
//!
//! Two seams are used by the queue:
//!
//! - [`BatchTransport`]: the normal asynchronous request, awaited by `flush`
//! - [`BeaconTransport`]: a one-way, fire-and-forget submission used when the
//!   page is about to disappear and a normal request may be cancelled
//!
//! ## Implementations
//!
//! - [`HttpBatchTransport`] / [`HttpBeaconTransport`]: `reqwest` over HTTP(S)
//! - `MockBatchTransport` / `MockBeaconTransport`: in-memory recorders (in the
//!   `mock` module)

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_BEACON_BYTES;
use crate::error::TransportError;
use crate::record::EventBatch;

/// Asynchronous batch delivery
///
/// # Example
///
/// ```rust,ignore
/// use funnel_events::{BatchTransport, EventBatch, TransportError};
///
/// async fn deliver<T: BatchTransport>(transport: &T, batch: &EventBatch) -> Result<(), TransportError> {
///     transport.send_batch(batch).await
/// }
/// ```
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Submit one batch, resolving once the endpoint acknowledged it
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success response. The
    /// queue re-inserts the batch at the head of the live queue in that case.
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), TransportError>;
}

/// Best-effort one-way delivery that survives page teardown
pub trait BeaconTransport: Send + Sync {
    /// Hand a serialized batch to the transport
    ///
    /// `Ok` only means the payload was accepted for delivery, not that it
    /// arrived. An error means the payload was not taken and the caller
    /// should fall back to the normal path.
    fn send_beacon(&self, url: &str, body: Bytes) -> Result<(), TransportError>;
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> Result<reqwest::RequestBuilder, TransportError> {
    let Some(key) = api_key else {
        return Ok(request);
    };
    let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
        .map_err(|e| TransportError::Rejected(format!("invalid api key header: {e}")))?;
    Ok(request.header(AUTHORIZATION, bearer).header("apikey", key))
}

/// Batch transport posting JSON to the ingestion endpoint
#[derive(Debug, Clone)]
pub struct HttpBatchTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBatchTransport {
    /// Create a transport for `endpoint`
    ///
    /// `timeout` bounds the whole request, including reading the response.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    /// Authenticate requests with a hosted-backend API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn send_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let body = batch.to_body()?;
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = apply_auth(request, self.api_key.as_deref())?
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(events = batch.len(), status = status.as_u16(), "Batch accepted");
        Ok(())
    }
}

/// Beacon transport backed by a detached HTTP request
///
/// The request is spawned on the current tokio runtime and never awaited by
/// the caller, so it keeps running while the host tears the page down.
#[derive(Debug, Clone)]
pub struct HttpBeaconTransport {
    client: reqwest::Client,
    api_key: Option<String>,
    max_bytes: usize,
}

impl HttpBeaconTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: None,
            max_bytes: DEFAULT_MAX_BEACON_BYTES,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Reject payloads larger than `max_bytes`
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

impl Default for HttpBeaconTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconTransport for HttpBeaconTransport {
    fn send_beacon(&self, url: &str, body: Bytes) -> Result<(), TransportError> {
        if body.len() > self.max_bytes {
            return Err(TransportError::PayloadTooLarge {
                size: body.len(),
                max: self.max_bytes,
            });
        }

        let runtime = Handle::try_current()
            .map_err(|_| TransportError::Unavailable("no async runtime for beacon".into()))?;

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let request = apply_auth(request, self.api_key.as_deref())?;
        let url = url.to_string();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(%url, "Beacon delivered");
                }
                Ok(response) => {
                    warn!(%url, status = response.status().as_u16(), "Beacon refused by endpoint");
                }
                Err(e) => warn!(%url, error = %e, "Beacon request failed"),
            }
        });

        Ok(())
    }
}
