//! Media-site metadata and stream URL resolution.
//!
//! The [`Extractor`] trait is the capability the job pipeline consumes;
//! [`YtDlpExtractor`] implements it on top of the `yt-dlp` program.

pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::download::JobError;
use crate::format::VariantDescriptor;

/// One subtitle track offered for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    /// Language code (`en`, `pt-BR`).
    pub lang: String,
    /// File extension (`vtt`, `srt`).
    pub ext: String,
    /// Download URL.
    pub url: String,
    /// Auto-generated (speech recognition) rather than authored.
    pub automatic: bool,
}

/// Everything the pipeline needs to know about one item or playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    /// Extractor-side id.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Uploader or channel name.
    pub uploader: Option<String>,
    /// Duration, when known.
    pub duration: Option<Duration>,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Fetchable encodings; empty for playlists.
    pub variants: Vec<VariantDescriptor>,
    /// Subtitle tracks, authored and automatic.
    pub subtitle_tracks: Vec<SubtitleTrack>,
    /// Whether the URL refers to a playlist.
    pub is_playlist: bool,
    /// Number of entries, for playlists.
    pub playlist_length: Option<usize>,
}

impl ItemMetadata {
    /// Picks one track per requested language, preferring authored tracks.
    ///
    /// Automatic tracks are considered only when `allow_automatic` is set.
    /// The result follows the order of `langs`.
    #[must_use]
    pub fn subtitles_for(&self, langs: &[String], allow_automatic: bool) -> Vec<&SubtitleTrack> {
        langs
            .iter()
            .filter_map(|lang| {
                let mut matching = self
                    .subtitle_tracks
                    .iter()
                    .filter(|t| t.lang.eq_ignore_ascii_case(lang))
                    .filter(|t| allow_automatic || !t.automatic);
                let first = matching.next()?;
                if first.automatic {
                    Some(matching.find(|t| !t.automatic).unwrap_or(first))
                } else {
                    Some(first)
                }
            })
            .collect()
    }
}

/// Extractor failures.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The item is unavailable, private, removed, or the URL is unsupported.
    #[error("cannot resolve {url}: {reason}")]
    Resolution {
        /// The URL that failed.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Network trouble while talking to the site; worth retrying.
    #[error("network error resolving {url}: {reason}")]
    Transient {
        /// The URL that failed.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The run was cancelled while resolving.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ExtractorError {
    /// Creates a resolution error.
    pub fn resolution(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<ExtractorError> for JobError {
    fn from(error: ExtractorError) -> Self {
        match error {
            ExtractorError::Resolution { url, reason } => Self::Resolution { url, reason },
            ExtractorError::Transient { url, reason } => Self::TransientNetwork {
                url,
                reason,
                retry_after: None,
            },
            ExtractorError::Cancelled => Self::Cancelled,
        }
    }
}

/// Resolves URLs into item metadata.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolves `url`. For a playlist only `is_playlist` and
    /// `playlist_length` are meaningful.
    ///
    /// # Errors
    ///
    /// [`ExtractorError::Resolution`] when the URL cannot be resolved,
    /// [`ExtractorError::Transient`] on network trouble, and
    /// [`ExtractorError::Cancelled`] when `cancel` fires.
    async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError>;

    /// Resolves entry `index` (1-based) of the playlist at `playlist_url`.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve); a missing entry is a resolution
    /// error.
    async fn resolve_entry(
        &self,
        playlist_url: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError>;
}
