use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, RawEntry};

const MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching a feed.
///
/// Every variant is a per-feed failure: the caller reports it and leaves the
/// feed's cursor untouched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status that is neither 2xx nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// What a feed source returned for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    /// Entries newest-first, exactly as the source ordered them
    pub entries: Vec<RawEntry>,
    /// Cache-validation token of this response, if the source sent one
    pub etag: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// The source answered "not modified" to the ETag hint
    pub not_modified: bool,
}

/// Where feed entries come from.
///
/// Implementations must return entries newest-first. The sync engine does not
/// re-sort them; an out-of-order source can cause skipped or repeated
/// episodes.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, uri: &str, etag_hint: Option<&str>) -> Result<FetchedFeed, FetchError>;
}

enum FeedBody {
    /// 304: no body, at most a refreshed token
    NotModified { etag: Option<String> },
    Fresh { bytes: Vec<u8>, etag: Option<String> },
}

/// Feed source over HTTP(S) with conditional requests and bounded retries.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    timeout: Duration,
    max_feed_size: usize,
    backoff_base: Duration,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_feed_size: DEFAULT_MAX_FEED_SIZE,
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_feed_size(mut self, bytes: usize) -> Self {
        self.max_feed_size = bytes;
        self
    }

    /// Base of the exponential backoff; retry `n` waits `base * 2^(n+1)`.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.backoff_base * 2u32.pow(retry_count + 1) // 2s, 4s, 8s
    }

    async fn fetch_bytes(
        &self,
        uri: &str,
        etag_hint: Option<&str>,
    ) -> Result<FeedBody, FetchError> {
        let mut retry_count = 0;

        loop {
            let mut request = self.client.get(uri);
            if let Some(etag) = etag_hint {
                request = request.header(IF_NONE_MATCH, etag);
            }

            let response = tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                return Ok(FeedBody::NotModified {
                    etag: header_etag(&response),
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %uri,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %uri,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx and anything else unexpected fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let etag = header_etag(&response);
            match read_limited_bytes(response, self.max_feed_size).await {
                Ok(bytes) => return Ok(FeedBody::Fresh { bytes, etag }),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %uri,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, uri: &str, etag_hint: Option<&str>) -> Result<FetchedFeed, FetchError> {
        let (bytes, etag) = match self.fetch_bytes(uri, etag_hint).await? {
            FeedBody::NotModified { etag } => {
                return Ok(FetchedFeed {
                    etag,
                    not_modified: true,
                    ..FetchedFeed::default()
                });
            }
            FeedBody::Fresh { bytes, etag } => (bytes, etag),
        };

        let parsed = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(FetchedFeed {
            entries: parsed.entries,
            etag,
            title: parsed.title,
            description: parsed.description,
            not_modified: false,
        })
    }
}

fn header_etag(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
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
