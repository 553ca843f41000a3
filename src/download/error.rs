//! Error types for the per-job download pipeline.
//!
//! Every failure a job can hit is expressed as a [`JobError`]. The variant
//! decides how the scheduler treats it: only [`JobError::TransientNetwork`]
//! is retried, [`JobError::PostProcess`] downgrades the job to a degraded
//! success, and everything else is recorded as the job's terminal failure.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving one job through its pipeline.
#[derive(Debug, Error)]
pub enum JobError {
    /// The item is unavailable, private, removed, or the URL is invalid.
    #[error("cannot resolve {url}: {reason}")]
    Resolution {
        /// The URL (or playlist entry) that failed to resolve.
        url: String,
        /// Human-readable cause reported by the extractor.
        reason: String,
    },

    /// Timeouts, connection resets, 5xx and throttling responses.
    #[error("network error fetching {url}: {reason}")]
    TransientNetwork {
        /// The URL that failed.
        url: String,
        /// Human-readable cause.
        reason: String,
        /// Server-mandated delay (Retry-After), when one was sent.
        retry_after: Option<Duration>,
    },

    /// No variant satisfies the selection criteria.
    #[error("no {wanted} variant available for {item}")]
    NoMatch {
        /// Item identifier or URL.
        item: String,
        /// Description of what was requested (e.g. "audio", "video").
        wanted: String,
    },

    /// The media tool failed to embed or convert. The raw payload is intact.
    #[error("post-processing {path} failed: {reason}")]
    PostProcess {
        /// The raw file that was being post-processed.
        path: PathBuf,
        /// Human-readable cause.
        reason: String,
    },

    /// The finished file could not be moved to its destination.
    #[error("cannot finalize {path}: {source}")]
    Finalize {
        /// Destination path (or directory) that could not be written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Local file system error while writing a temporary file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The server refused the transfer permanently (4xx, invalid stream URL).
    #[error("transfer of {url} rejected: {reason}")]
    Rejected {
        /// The stream URL.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The job's task ended abnormally (panic).
    #[error("job aborted: {reason}")]
    Aborted {
        /// Panic message or abort cause.
        reason: String,
    },

    /// The run was cancelled before this job reached a terminal state.
    #[error("download cancelled")]
    Cancelled,
}

impl JobError {
    /// Creates a resolution error.
    pub fn resolution(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transient network error without a server-mandated delay.
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientNetwork {
            url: url.into(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// Creates a no-match error.
    pub fn no_match(item: impl Into<String>, wanted: impl Into<String>) -> Self {
        Self::NoMatch {
            item: item.into(),
            wanted: wanted.into(),
        }
    }

    /// Creates a post-processing error.
    pub fn post_process(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PostProcess {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a finalize error.
    pub fn finalize(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Finalize {
            path: path.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a rejected-transfer error.
    pub fn rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors the retry policy may act on.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Returns true when the error is the cancellation marker.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short, stable label used in reports and structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::TransientNetwork { .. } => "network",
            Self::NoMatch { .. } => "no_match",
            Self::PostProcess { .. } => "post_process",
            Self::Finalize { .. } => "finalize",
            Self::Io { .. } => "io",
            Self::Rejected { .. } => "rejected",
            Self::Aborted { .. } => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_resolution_display() {
        let error = JobError::resolution("https://youtu.be/abc", "Private video");
        let msg = error.to_string();
        assert!(msg.contains("https://youtu.be/abc"), "Expected URL in: {msg}");
        assert!(msg.contains("Private video"), "Expected reason in: {msg}");
    }

    #[test]
    fn test_job_error_only_network_is_transient() {
        assert!(JobError::transient("u", "reset").is_transient());
        assert!(!JobError::resolution("u", "gone").is_transient());
        assert!(!JobError::no_match("u", "audio").is_transient());
        assert!(!JobError::Cancelled.is_transient());
        assert!(
            !JobError::io("/tmp/x", std::io::Error::other("disk full")).is_transient()
        );
    }

    #[test]
    fn test_job_error_finalize_keeps_source() {
        let error = JobError::finalize(
            "/readonly/out.mp4",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.kind(), "finalize");
    }

    #[test]
    fn test_job_error_cancelled_marker() {
        assert!(JobError::Cancelled.is_cancelled());
        assert_eq!(JobError::Cancelled.to_string(), "download cancelled");
    }
}
