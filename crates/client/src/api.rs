//! REST client for the generation service.
//!
//! Wraps the status endpoint polled by [`crate::polling::PollingChannel`]
//! and the long-poll event endpoint used when WebSockets are unavailable,
//! using [`reqwest`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::TrackerConfig;

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The long-poll endpoint is not configured.
    #[error("Push endpoint not configured")]
    NoPushEndpoint,
}

/// Source of raw generation status payloads.
///
/// Implemented by [`GenerationApi`]; tests substitute in-memory sources.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current status payload for a set, unparsed.
    async fn fetch_status(&self, set_id: &str) -> Result<serde_json::Value, ApiError>;
}

/// One batch of events returned by the long-poll endpoint.
#[derive(Debug, Deserialize)]
pub struct EventBatch {
    /// Cursor to send with the next request.
    #[serde(default)]
    pub cursor: u64,
    /// Raw `{event, data}` objects, oldest first.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// HTTP client for the generation service.
#[derive(Clone)]
pub struct GenerationApi {
    client: reqwest::Client,
    config: TrackerConfig,
}

impl GenerationApi {
    /// Build a client with the configured request timeout.
    pub fn new(config: TrackerConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across trackers).
    pub fn with_client(client: reqwest::Client, config: TrackerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fetch the status payload for a set.
    ///
    /// Sends `GET {api_url}/{resource}/{set_id}`.
    pub async fn get_status(&self, set_id: &str) -> Result<serde_json::Value, ApiError> {
        let response = self.client.get(self.config.status_url(set_id)).send().await?;
        Self::parse_response(response).await
    }

    /// Wait for push events newer than `cursor`.
    ///
    /// Sends `GET {push_http_url}/poll?setId={set_id}&cursor={cursor}`. The
    /// server holds the request open until events arrive or its own
    /// timeout elapses, then answers with an [`EventBatch`].
    pub async fn poll_events(&self, set_id: &str, cursor: u64) -> Result<EventBatch, ApiError> {
        let base = self.config.long_poll_url().ok_or(ApiError::NoPushEndpoint)?;
        let cursor = cursor.to_string();
        let response = self
            .client
            .get(format!("{base}/poll"))
            .query(&[("setId", set_id), ("cursor", cursor.as_str())])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl StatusSource for GenerationApi {
    async fn fetch_status(&self, set_id: &str) -> Result<serde_json::Value, ApiError> {
        self.get_status(set_id).await
    }
}
