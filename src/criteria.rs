//! User intent for one invocation: what to fetch and how to finish it.
//!
//! [`SelectionCriteria`] is immutable once built. Every option has a default
//! (see [`CriteriaBuilder`]) and invalid values are rejected by
//! [`CriteriaBuilder::build`] before any network activity.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::format::{LabelUnit, QualityTarget};

/// Default filename template.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Default number of attempts per job (initial attempt included).
pub const DEFAULT_RETRIES: u32 = 3;

/// Upper bound for the configured retry count.
pub const MAX_RETRIES: u32 = 10;

/// Errors raised while validating user options.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CriteriaError {
    /// Quality is not `best`, `worst` or a label like `720p`.
    #[error("invalid quality '{value}': expected best, worst or a label like 720p")]
    InvalidQuality {
        /// The rejected value.
        value: String,
    },

    /// Audio quality is not `best`, `worst` or a bitrate like `192k`.
    #[error("invalid audio quality '{value}': expected best, worst or a bitrate like 192k")]
    InvalidAudioQuality {
        /// The rejected value.
        value: String,
    },

    /// Unknown video container.
    #[error("invalid video format '{value}': expected one of mp4, mkv, webm")]
    InvalidVideoFormat {
        /// The rejected value.
        value: String,
    },

    /// Unknown audio format.
    #[error("invalid audio format '{value}': expected one of mp3, m4a, opus, flac, wav")]
    InvalidAudioFormat {
        /// The rejected value.
        value: String,
    },

    /// Rate limit is not a positive size like `500K` or `1.5M`.
    #[error("invalid rate limit '{value}': expected a positive size like 500K, 1M or 1.5G")]
    InvalidRateLimit {
        /// The rejected value.
        value: String,
    },

    /// Retry count out of range.
    #[error("invalid retries {value}: must be between 0 and {MAX_RETRIES}")]
    InvalidRetries {
        /// The rejected value.
        value: u32,
    },

    /// Filename template is empty.
    #[error("filename template must not be empty")]
    EmptyTemplate,

    /// A subtitle language code is empty or contains invalid characters.
    #[error("invalid subtitle language '{value}'")]
    InvalidSubtitleLanguage {
        /// The rejected value.
        value: String,
    },
}

/// Whether the user wants video or audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    /// Video with audio.
    #[default]
    Video,
    /// Audio only.
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Container for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoFormat {
    /// MPEG-4.
    #[default]
    Mp4,
    /// Matroska.
    Mkv,
    /// WebM.
    Webm,
}

impl VideoFormat {
    /// Container tag / file extension.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
        }
    }
}

impl FromStr for VideoFormat {
    type Err = CriteriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "mkv" => Ok(Self::Mkv),
            "webm" => Ok(Self::Webm),
            _ => Err(CriteriaError::InvalidVideoFormat {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format for audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// MP3.
    #[default]
    Mp3,
    /// AAC in an MPEG-4 container.
    M4a,
    /// Opus.
    Opus,
    /// FLAC.
    Flac,
    /// PCM WAV.
    Wav,
}

impl AudioFormat {
    /// Format tag / file extension.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = CriteriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "opus" => Ok(Self::Opus),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            _ => Err(CriteriaError::InvalidAudioFormat {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playlist handling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistOptions {
    /// Expand playlist URLs into one job per entry.
    pub enabled: bool,
    /// First entry (1-based), `None` for the first.
    pub start: Option<usize>,
    /// Last entry (1-based, inclusive), `None` for the last.
    pub end: Option<usize>,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            start: None,
            end: None,
        }
    }
}

/// Parses a human rate limit (`500K`, `1M`, `1.5G`, `65536`) into bytes/sec.
///
/// Suffixes use 1024-based multipliers and are case-insensitive.
///
/// # Errors
///
/// Returns [`CriteriaError::InvalidRateLimit`] for unparsable, zero or
/// negative values.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_rate_limit(text: &str) -> Result<u64, CriteriaError> {
    let invalid = || CriteriaError::InvalidRateLimit {
        value: text.to_string(),
    };
    let upper = text.trim().to_ascii_uppercase();
    let (number, multiplier) = match upper.chars().last() {
        Some('K') => (&upper[..upper.len() - 1], 1024_f64),
        Some('M') => (&upper[..upper.len() - 1], 1024_f64 * 1024.0),
        Some('G') => (&upper[..upper.len() - 1], 1024_f64 * 1024.0 * 1024.0),
        _ => (upper.as_str(), 1.0),
    };
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    let bytes = value * multiplier;
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Validated, immutable selection and output options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCriteria {
    kind: MediaKind,
    quality: QualityTarget,
    audio_quality: QualityTarget,
    video_format: VideoFormat,
    audio_format: AudioFormat,
    subtitle_langs: Vec<String>,
    download_subtitles: bool,
    auto_subtitles: bool,
    embed_subtitles: bool,
    embed_thumbnail: bool,
    embed_metadata: bool,
    filename_template: String,
    playlist: PlaylistOptions,
    rate_limit: Option<u64>,
    retries: u32,
    output_dir: PathBuf,
}

impl SelectionCriteria {
    /// Starts a builder populated with defaults.
    #[must_use]
    pub fn builder() -> CriteriaBuilder {
        CriteriaBuilder::default()
    }

    /// Video or audio.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Video quality target.
    #[must_use]
    pub fn quality(&self) -> QualityTarget {
        self.quality
    }

    /// Audio quality target, used when [`kind`](Self::kind) is audio.
    #[must_use]
    pub fn audio_quality(&self) -> QualityTarget {
        self.audio_quality
    }

    /// Quality target that applies to the requested kind.
    #[must_use]
    pub fn effective_quality(&self) -> QualityTarget {
        match self.kind {
            MediaKind::Video => self.quality,
            MediaKind::Audio => self.audio_quality,
        }
    }

    /// Desired video container.
    #[must_use]
    pub fn video_format(&self) -> VideoFormat {
        self.video_format
    }

    /// Desired audio format.
    #[must_use]
    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    /// Container tag of the desired output for the requested kind.
    #[must_use]
    pub fn target_container(&self) -> &'static str {
        match self.kind {
            MediaKind::Video => self.video_format.as_str(),
            MediaKind::Audio => self.audio_format.as_str(),
        }
    }

    /// Requested subtitle languages.
    #[must_use]
    pub fn subtitle_langs(&self) -> &[String] {
        &self.subtitle_langs
    }

    /// Whether subtitle tracks are fetched at all.
    #[must_use]
    pub fn download_subtitles(&self) -> bool {
        self.download_subtitles
    }

    /// Whether auto-generated subtitle tracks are acceptable.
    #[must_use]
    pub fn auto_subtitles(&self) -> bool {
        self.auto_subtitles
    }

    /// Whether fetched subtitles are embedded into the output.
    #[must_use]
    pub fn embed_subtitles(&self) -> bool {
        self.embed_subtitles
    }

    /// Whether the thumbnail is embedded as cover art.
    #[must_use]
    pub fn embed_thumbnail(&self) -> bool {
        self.embed_thumbnail
    }

    /// Whether title/uploader metadata is written into the output.
    #[must_use]
    pub fn embed_metadata(&self) -> bool {
        self.embed_metadata
    }

    /// Output filename template.
    #[must_use]
    pub fn filename_template(&self) -> &str {
        &self.filename_template
    }

    /// Playlist handling options.
    #[must_use]
    pub fn playlist(&self) -> PlaylistOptions {
        self.playlist
    }

    /// Aggregate transfer ceiling in bytes/sec.
    #[must_use]
    pub fn rate_limit(&self) -> Option<u64> {
        self.rate_limit
    }

    /// Attempts per job, initial attempt included (at least 1).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Directory receiving finished files.
    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Whether post-processing has anything to do besides conversion.
    #[must_use]
    pub fn wants_embedding(&self) -> bool {
        self.embed_metadata || self.embed_thumbnail || self.embed_subtitles
    }
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            kind: MediaKind::Video,
            quality: QualityTarget::Best,
            audio_quality: QualityTarget::Best,
            video_format: VideoFormat::default(),
            audio_format: AudioFormat::default(),
            subtitle_langs: vec!["en".to_string()],
            download_subtitles: false,
            auto_subtitles: true,
            embed_subtitles: false,
            embed_thumbnail: false,
            embed_metadata: true,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            playlist: PlaylistOptions::default(),
            rate_limit: None,
            retries: DEFAULT_RETRIES,
            output_dir: default_output_dir(),
        }
    }
}

/// Builder for [`SelectionCriteria`].
///
/// | Option | Default |
/// |--------|---------|
/// | kind | video |
/// | quality / audio quality | `best` |
/// | video / audio format | `mp4` / `mp3` |
/// | subtitles | off, languages `["en"]`, auto-generated allowed |
/// | embed subtitles / thumbnail / metadata | off / off / on |
/// | filename template | `%(title)s.%(ext)s` |
/// | playlist | enabled, whole range |
/// | rate limit | none |
/// | retries | 3 |
/// | output directory | `~/Downloads` |
#[derive(Debug, Clone)]
#[must_use]
pub struct CriteriaBuilder {
    kind: MediaKind,
    quality: String,
    audio_quality: String,
    video_format: String,
    audio_format: String,
    subtitle_langs: Vec<String>,
    download_subtitles: bool,
    auto_subtitles: bool,
    embed_subtitles: bool,
    embed_thumbnail: bool,
    embed_metadata: bool,
    filename_template: String,
    playlist: PlaylistOptions,
    rate_limit: Option<String>,
    retries: u32,
    output_dir: Option<PathBuf>,
}

impl Default for CriteriaBuilder {
    fn default() -> Self {
        Self {
            kind: MediaKind::Video,
            quality: "best".to_string(),
            audio_quality: "best".to_string(),
            video_format: "mp4".to_string(),
            audio_format: "mp3".to_string(),
            subtitle_langs: vec!["en".to_string()],
            download_subtitles: false,
            auto_subtitles: true,
            embed_subtitles: false,
            embed_thumbnail: false,
            embed_metadata: true,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            playlist: PlaylistOptions::default(),
            rate_limit: None,
            retries: DEFAULT_RETRIES,
            output_dir: None,
        }
    }
}

impl CriteriaBuilder {
    /// Video or audio.
    pub fn kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    /// Video quality (`best`, `worst`, `720p`).
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    /// Audio quality (`best`, `worst`, `192k`).
    pub fn audio_quality(mut self, quality: impl Into<String>) -> Self {
        self.audio_quality = quality.into();
        self
    }

    /// Video container (`mp4`, `mkv`, `webm`).
    pub fn video_format(mut self, format: impl Into<String>) -> Self {
        self.video_format = format.into();
        self
    }

    /// Audio format (`mp3`, `m4a`, `opus`, `flac`, `wav`).
    pub fn audio_format(mut self, format: impl Into<String>) -> Self {
        self.audio_format = format.into();
        self
    }

    /// Subtitle languages, in preference order.
    pub fn subtitle_langs<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtitle_langs = langs.into_iter().map(Into::into).collect();
        self
    }

    /// Fetch subtitle tracks.
    pub fn download_subtitles(mut self, enabled: bool) -> Self {
        self.download_subtitles = enabled;
        self
    }

    /// Accept auto-generated subtitle tracks.
    pub fn auto_subtitles(mut self, enabled: bool) -> Self {
        self.auto_subtitles = enabled;
        self
    }

    /// Embed subtitles (implies fetching them).
    pub fn embed_subtitles(mut self, enabled: bool) -> Self {
        self.embed_subtitles = enabled;
        self
    }

    /// Embed the thumbnail as cover art.
    pub fn embed_thumbnail(mut self, enabled: bool) -> Self {
        self.embed_thumbnail = enabled;
        self
    }

    /// Write metadata into the output.
    pub fn embed_metadata(mut self, enabled: bool) -> Self {
        self.embed_metadata = enabled;
        self
    }

    /// Output filename template.
    pub fn filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    /// Playlist handling.
    pub fn playlist(mut self, playlist: PlaylistOptions) -> Self {
        self.playlist = playlist;
        self
    }

    /// Aggregate rate limit as a human size (`500K`, `1M`).
    pub fn rate_limit(mut self, limit: Option<String>) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Attempts per job.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Output directory; `~` is expanded.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Validates every option and produces the immutable criteria.
    ///
    /// # Errors
    ///
    /// Returns the first [`CriteriaError`] found.
    pub fn build(self) -> Result<SelectionCriteria, CriteriaError> {
        let quality = QualityTarget::parse(&self.quality, LabelUnit::Height).ok_or_else(|| {
            CriteriaError::InvalidQuality {
                value: self.quality.clone(),
            }
        })?;
        let audio_quality = QualityTarget::parse(&self.audio_quality, LabelUnit::Bitrate)
            .ok_or_else(|| CriteriaError::InvalidAudioQuality {
                value: self.audio_quality.clone(),
            })?;
        let video_format: VideoFormat = self.video_format.parse()?;
        let audio_format: AudioFormat = self.audio_format.parse()?;

        let mut subtitle_langs = Vec::with_capacity(self.subtitle_langs.len());
        for lang in &self.subtitle_langs {
            let lang = lang.trim();
            if lang.is_empty()
                || !lang
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(CriteriaError::InvalidSubtitleLanguage {
                    value: lang.to_string(),
                });
            }
            subtitle_langs.push(lang.to_string());
        }
        if subtitle_langs.is_empty() {
            subtitle_langs.push("en".to_string());
        }

        if self.filename_template.trim().is_empty() {
            return Err(CriteriaError::EmptyTemplate);
        }
        if self.retries > MAX_RETRIES {
            return Err(CriteriaError::InvalidRetries {
                value: self.retries,
            });
        }
        let rate_limit = self.rate_limit.as_deref().map(parse_rate_limit).transpose()?;

        Ok(SelectionCriteria {
            kind: self.kind,
            quality,
            audio_quality,
            video_format,
            audio_format,
            subtitle_langs,
            download_subtitles: self.download_subtitles || self.embed_subtitles,
            auto_subtitles: self.auto_subtitles,
            embed_subtitles: self.embed_subtitles,
            embed_thumbnail: self.embed_thumbnail,
            embed_metadata: self.embed_metadata,
            filename_template: self.filename_template,
            playlist: self.playlist,
            rate_limit,
            retries: self.retries,
            output_dir: self
                .output_dir
                .map_or_else(default_output_dir, |dir| expand_home(&dir)),
        })
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn default_output_dir() -> PathBuf {
    home_dir().map_or_else(|| PathBuf::from("."), |home| home.join("Downloads"))
}

/// Expands a leading `~` to the user's home directory.
#[must_use]
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::QualityLabel;

    // ==================== Defaults ====================

    #[test]
    fn test_builder_defaults() {
        let criteria = SelectionCriteria::builder()
            .output_dir("/tmp/out")
            .build()
            .unwrap();
        assert_eq!(criteria.kind(), MediaKind::Video);
        assert_eq!(criteria.quality(), QualityTarget::Best);
        assert_eq!(criteria.audio_quality(), QualityTarget::Best);
        assert_eq!(criteria.video_format(), VideoFormat::Mp4);
        assert_eq!(criteria.audio_format(), AudioFormat::Mp3);
        assert_eq!(criteria.subtitle_langs(), ["en".to_string()]);
        assert!(!criteria.download_subtitles());
        assert!(criteria.auto_subtitles());
        assert!(criteria.embed_metadata());
        assert!(!criteria.embed_thumbnail());
        assert_eq!(criteria.filename_template(), "%(title)s.%(ext)s");
        assert_eq!(criteria.max_attempts(), 3);
        assert_eq!(criteria.rate_limit(), None);
        assert!(criteria.playlist().enabled);
        assert_eq!(criteria.output_dir(), &PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_default_matches_builder_defaults() {
        let built = SelectionCriteria::builder().build().unwrap();
        assert_eq!(built, SelectionCriteria::default());
    }

    // ==================== Validation ====================

    #[test]
    fn test_builder_parses_quality_labels() {
        let criteria = SelectionCriteria::builder()
            .quality("720p")
            .audio_quality("192k")
            .build()
            .unwrap();
        assert_eq!(
            criteria.quality(),
            QualityTarget::Label(QualityLabel {
                value: 720,
                unit: LabelUnit::Height
            })
        );
        assert_eq!(criteria.audio_quality().to_string(), "192k");
    }

    #[test]
    fn test_builder_rejects_bad_quality() {
        let err = SelectionCriteria::builder().quality("ultra").build().unwrap_err();
        assert_eq!(
            err,
            CriteriaError::InvalidQuality {
                value: "ultra".to_string()
            }
        );
    }

    #[test]
    fn test_builder_rejects_bad_formats() {
        assert!(matches!(
            SelectionCriteria::builder().video_format("avi").build(),
            Err(CriteriaError::InvalidVideoFormat { .. })
        ));
        assert!(matches!(
            SelectionCriteria::builder().audio_format("aac").build(),
            Err(CriteriaError::InvalidAudioFormat { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_retries_out_of_range() {
        assert!(matches!(
            SelectionCriteria::builder().retries(11).build(),
            Err(CriteriaError::InvalidRetries { value: 11 })
        ));
    }

    #[test]
    fn test_zero_retries_still_allows_one_attempt() {
        let criteria = SelectionCriteria::builder().retries(0).build().unwrap();
        assert_eq!(criteria.max_attempts(), 1);
    }

    #[test]
    fn test_builder_rejects_empty_template() {
        assert_eq!(
            SelectionCriteria::builder()
                .filename_template("  ")
                .build()
                .unwrap_err(),
            CriteriaError::EmptyTemplate
        );
    }

    #[test]
    fn test_builder_rejects_bad_subtitle_language() {
        assert!(matches!(
            SelectionCriteria::builder()
                .subtitle_langs(["en", "../x"])
                .build(),
            Err(CriteriaError::InvalidSubtitleLanguage { .. })
        ));
    }

    #[test]
    fn test_embed_subtitles_implies_download() {
        let criteria = SelectionCriteria::builder()
            .embed_subtitles(true)
            .build()
            .unwrap();
        assert!(criteria.download_subtitles());
    }

    #[test]
    fn test_effective_quality_and_container_follow_kind() {
        let criteria = SelectionCriteria::builder()
            .kind(MediaKind::Audio)
            .quality("1080p")
            .audio_quality("worst")
            .audio_format("opus")
            .build()
            .unwrap();
        assert_eq!(criteria.effective_quality(), QualityTarget::Worst);
        assert_eq!(criteria.target_container(), "opus");
    }

    // ==================== Rate limit ====================

    #[test]
    fn test_parse_rate_limit_suffixes() {
        assert_eq!(parse_rate_limit("500K").unwrap(), 500 * 1024);
        assert_eq!(parse_rate_limit("1m").unwrap(), 1024 * 1024);
        assert_eq!(parse_rate_limit("1.5G").unwrap(), 1_610_612_736);
        assert_eq!(parse_rate_limit("65536").unwrap(), 65536);
    }

    #[test]
    fn test_parse_rate_limit_rejects_invalid() {
        for bad in ["", "fast", "0", "-1M", "K", "0.0001K"] {
            assert!(parse_rate_limit(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_builder_rate_limit_is_parsed() {
        let criteria = SelectionCriteria::builder()
            .rate_limit(Some("2M".to_string()))
            .build()
            .unwrap();
        assert_eq!(criteria.rate_limit(), Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(
            expand_home(std::path::Path::new("/var/media")),
            PathBuf::from("/var/media")
        );
    }
}
