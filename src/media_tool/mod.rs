//! Post-processing: muxing, conversion and embedding.
//!
//! The [`MediaTool`] trait is the capability the job pipeline consumes;
//! [`FfmpegTool`] implements it with the `ffmpeg` program. [`WorkFiles`]
//! tracks the temporary files a post-processing step produces so they are
//! removed on every exit path.

pub mod ffmpeg;

pub use ffmpeg::FfmpegTool;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A downloaded subtitle file to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleFile {
    /// Path of the fetched track.
    pub path: PathBuf,
    /// Language code.
    pub lang: String,
}

/// Metadata written into the output container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    /// Title tag.
    pub title: String,
    /// Artist / uploader tag.
    pub artist: Option<String>,
    /// Source URL, written as a comment.
    pub source_url: Option<String>,
}

/// What post-processing must do to one fetched file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostProcessRequest {
    /// Subtitle tracks to embed.
    pub subtitles: Vec<SubtitleFile>,
    /// Cover image to embed.
    pub thumbnail: Option<PathBuf>,
    /// Tags to write.
    pub metadata: Option<MediaMetadata>,
    /// Separate audio stream to mux with a video-only input.
    pub audio_track: Option<PathBuf>,
    /// Container or audio format to produce, when conversion is needed.
    pub target_container: Option<String>,
    /// Drop the video stream and keep only audio.
    pub extract_audio: bool,
    /// Target audio bitrate (`192k`); `None` for the encoder's best.
    pub audio_quality: Option<String>,
}

impl PostProcessRequest {
    /// Whether the request asks for any work at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.subtitles.is_empty()
            && self.thumbnail.is_none()
            && self.metadata.is_none()
            && self.audio_track.is_none()
            && self.target_container.is_none()
            && !self.extract_audio
    }
}

/// Post-processing failures. The input file is left intact.
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// The tool failed or could not be run.
    #[error("post-processing {path} failed: {reason}")]
    Failed {
        /// The input file.
        path: PathBuf,
        /// Human-readable cause.
        reason: String,
    },

    /// The run was cancelled and the tool was killed.
    #[error("post-processing cancelled")]
    Cancelled,
}

impl PostProcessError {
    /// Creates a failure for `path`.
    pub fn failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Failed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Whether `container` holds a single audio stream and nothing else.
#[must_use]
pub fn is_audio_container(container: &str) -> bool {
    matches!(container, "mp3" | "m4a" | "opus" | "flac" | "wav")
}

/// Whether `container` can carry an attached cover image.
#[must_use]
pub fn supports_cover_art(container: &str) -> bool {
    matches!(container, "mp3" | "m4a" | "mp4" | "mkv" | "flac")
}

/// Transcodes, muxes and embeds.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Processes `input` into `output` as described by `request` and returns
    /// the path actually written.
    ///
    /// # Errors
    ///
    /// [`PostProcessError::Failed`] when the tool fails, and
    /// [`PostProcessError::Cancelled`] when `cancel` fires.
    async fn postprocess(
        &self,
        input: &Path,
        request: &PostProcessRequest,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PostProcessError>;
}

/// Temporary files removed when the guard is dropped, unless kept.
#[derive(Debug, Default)]
pub struct WorkFiles {
    paths: Vec<PathBuf>,
}

impl WorkFiles {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for removal.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Stops tracking `path`; it survives the guard.
    pub fn keep(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Tracked paths.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for WorkFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed work file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(path = %path.display(), error = %e, "failed to remove work file"),
            }
        }
    }
}
