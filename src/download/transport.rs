//! Byte-level transfer of stream URLs.
//!
//! The [`Transport`] trait is the seam between the job pipeline and the
//! network. A transport only opens a stream of chunks, optionally starting at
//! a byte offset; the pipeline owns writing, rate limiting, progress and
//! cancellation around it. [`HttpTransport`] is the `reqwest` implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, StatusCode};
use reqwest::header::{CONTENT_LENGTH, RANGE, RETRY_AFTER};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::constants::{CONNECT_TIMEOUT_SECS, MAX_RETRY_AFTER, READ_TIMEOUT_SECS};
use super::error::JobError;

/// Stream of body chunks produced by an open transfer.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// User-Agent sent by [`HttpTransport`].
const USER_AGENT: &str = concat!("ydownloader/", env!("CARGO_PKG_VERSION"));

/// An open transfer.
pub struct Transfer {
    /// Total size of the resource in bytes, when the server reported it.
    pub total: Option<u64>,
    /// Whether the stream starts at the requested offset. When false the
    /// stream starts at byte zero and the caller must truncate its file.
    pub offset_honoured: bool,
    /// Body chunks in order.
    pub chunks: ChunkStream,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("total", &self.total)
            .field("offset_honoured", &self.offset_honoured)
            .finish_non_exhaustive()
    }
}

/// Transfer failures, already classified for the retry policy.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Timeout, reset, 5xx or throttling; worth retrying.
    #[error("transient transfer error for {url}: {reason}")]
    Transient {
        /// The stream URL.
        url: String,
        /// Human-readable cause.
        reason: String,
        /// Server-mandated delay, when one was sent.
        retry_after: Option<Duration>,
    },

    /// The server refused the request; retrying would not help.
    #[error("transfer of {url} rejected: {reason}")]
    Rejected {
        /// The stream URL.
        url: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl TransportError {
    /// Creates a transient error without a Retry-After hint.
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.into(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// Creates a permanent rejection.
    pub fn rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<TransportError> for JobError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Transient {
                url,
                reason,
                retry_after,
            } => Self::TransientNetwork {
                url,
                reason,
                retry_after,
            },
            TransportError::Rejected { url, reason } => Self::Rejected { url, reason },
        }
    }
}

/// Opens byte streams for stream URLs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens `url`, asking for the body starting at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Transient`] for failures worth retrying and
    /// [`TransportError::Rejected`] otherwise.
    async fn open(&self, url: &str, offset: u64) -> Result<Transfer, TransportError>;
}

/// HTTP(S) transport with `Range` resumption.
///
/// Create once and share; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a transport with explicit connect and per-read timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the client cannot be built.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str, offset: u64) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        request.send().await.map_err(|e| map_reqwest_error(url, &e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self), fields(url = %url))]
    async fn open(&self, url: &str, offset: u64) -> Result<Transfer, TransportError> {
        let mut response = self.send(url, offset).await?;
        let mut offset = offset;

        // Some CDNs answer 416 once the partial file already holds the whole body
        // or the range went stale; start over from zero.
        if offset > 0 && response.status().as_u16() == 416 {
            debug!(offset, "range not satisfiable, restarting from zero");
            offset = 0;
            response = self.send(url, 0).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, &response));
        }

        let partial = status.as_u16() == 206;
        if offset > 0 && !partial {
            debug!(offset, "server ignored range request");
        }
        let total = derive_total_content_length(&response, offset);
        let offset_honoured = offset == 0 || partial;

        let owned_url = url.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| map_reqwest_error(&owned_url, &e)))
            .boxed();

        Ok(Transfer {
            total,
            offset_honoured,
            chunks,
        })
    }
}

fn map_reqwest_error(url: &str, error: &reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::rejected(url, format!("invalid request: {error}"))
    } else if error.is_timeout() {
        TransportError::transient(url, "timed out")
    } else {
        TransportError::transient(url, error.to_string())
    }
}

fn status_error(url: &str, response: &reqwest::Response) -> TransportError {
    let status = response.status();
    let reason = format!("HTTP {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::Transient {
            url: url.to_string(),
            reason,
            retry_after: response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        };
    }
    if is_retryable_status(status) {
        TransportError::transient(url, reason)
    } else {
        TransportError::rejected(url, reason)
    }
}

/// Server trouble and request timeouts may clear up; other statuses
/// (expired signed URLs answer 403, removed streams 404 or 410) will not.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

fn derive_total_content_length(response: &reqwest::Response, offset: u64) -> Option<u64> {
    let current = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if response.status().as_u16() == 206 {
        current.map(|remaining| offset.saturating_add(remaining))
    } else {
        current
    }
}

/// Parses a Retry-After header value (delay-seconds or HTTP-date).
///
/// Values are capped at one hour; negative values and dates in the past
/// yield `None`.
///
/// ```
/// use std::time::Duration;
/// use ydownloader_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, ignoring");
            None
        }
    }
}
