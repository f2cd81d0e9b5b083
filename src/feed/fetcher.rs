use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Number of retries after the first attempt. A single bounded retry keeps a
/// dead source from stalling an unattended run.
const MAX_RETRIES: u32 = 1;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
/// Upper bound on a server-provided `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Why a single request failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchFailure {
    fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Network(_)
            | FetchFailure::Timeout
            | FetchFailure::RateLimited { .. }
            | FetchFailure::IncompleteResponse { .. } => true,
            FetchFailure::HttpStatus(status) => *status >= 500,
            FetchFailure::ResponseTooLarge => false,
        }
    }
}

/// A failed fetch, carrying the URL and the final cause.
#[derive(Debug, Error)]
#[error("failed to fetch {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    pub cause: FetchFailure,
}

/// HTTP retrieval with timeout, size limit and one bounded retry.
///
/// Every request carries the configured `User-Agent`; several publishers
/// reject the default agents of HTTP libraries.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry_backoff: Duration,
}

impl Fetcher {
    /// Builds a fetcher whose client sends `user_agent` on every request.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self {
            client,
            timeout,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Overrides the delay before the retry (tests use a near-zero value).
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The underlying client, shared with the webhook notifier.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches `url` and returns the raw body bytes.
    ///
    /// Transient failures (timeouts, network errors, 5xx, 429, truncated
    /// bodies) are retried once after the backoff, or after the server's
    /// `Retry-After` (capped at 30s) for 429. Other 4xx responses fail
    /// immediately.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(cause) if cause.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = match &cause {
                        FetchFailure::RateLimited {
                            retry_after: Some(after),
                        } => (*after).min(MAX_RETRY_AFTER),
                        _ => self.retry_backoff,
                    };
                    tracing::warn!(
                        url = %url,
                        error = %cause,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(cause) => {
                    return Err(FetchError {
                        url: url.to_string(),
                        cause,
                    })
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        tokio::time::timeout(self.timeout, async {
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(FetchFailure::RateLimited { retry_after });
            }

            if !status.is_success() {
                return Err(FetchFailure::HttpStatus(status.as_u16()));
            }

            read_limited_bytes(response, MAX_FEED_SIZE).await
        })
        .await
        .map_err(|_| FetchFailure::Timeout)?
        .map_err(|e| match e {
            FetchFailure::Network(err) if err.is_timeout() => FetchFailure::Timeout,
            other => other,
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchFailure> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchFailure::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchFailure::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchFailure::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
