use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default limit for feed documents.
pub const DEFAULT_MAX_FEED_BYTES: usize = 10 * 1024 * 1024; // 10MB
/// Default limit for a single image.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024; // 5MB
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while downloading a feed or an image.
///
/// Every variant ends the current attempt; nothing here is retried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server answered successfully but sent no body
    #[error("Response contained no data")]
    Empty,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The fetch was cancelled through the feed's cancellation hook
    #[error("Request cancelled")]
    Cancelled,
}

/// HTTP GET primitive shared by every feed and image download.
///
/// Cheap to clone: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_feed_bytes: usize,
    max_image_bytes: usize,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, max_feed_bytes: usize, max_image_bytes: usize) -> Self {
        self.max_feed_bytes = max_feed_bytes;
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Downloads a feed document.
    pub async fn fetch_feed(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch(url, self.max_feed_bytes, cancel).await
    }

    /// Downloads image bytes.
    pub async fn fetch_image(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch(url, self.max_image_bytes, cancel).await
    }

    async fn fetch(
        &self,
        url: &Url,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.get(url, limit)) => {
                result.map_err(|_| FetchError::Timeout)?
            }
        }
    }

    async fn get(&self, url: &Url, limit: usize) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.as_str()).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, limit).await?;
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }

        tracing::debug!(url = %url, bytes = bytes.len(), "Fetched");
        Ok(bytes)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: Content-Length already says too much
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
