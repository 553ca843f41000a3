//! [`Extractor`] backed by the `yt-dlp` program.
//!
//! Metadata comes from `yt-dlp --dump-single-json`. Only formats served over
//! plain HTTP(S) are offered as variants, since the transfer itself is done
//! by the crate's own transport.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{Extractor, ExtractorError, ItemMetadata, SubtitleTrack};
use crate::format::{VariantDescriptor, VariantKind};
use crate::process::{self, ProcessError};

/// Default program name, looked up on `PATH`.
pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Default limit for one metadata query.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Subtitle formats the media tool can embed, in preference order.
const SUBTITLE_EXT_PREFERENCE: &[&str] = &["vtt", "srt", "ass"];

/// Stderr fragments that mark a failure as worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 429",
    "http error 500",
    "http error 502",
    "http error 503",
    "http error 504",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "temporary failure in name resolution",
    "network is unreachable",
    "remote end closed connection",
];

/// Runs `yt-dlp` to resolve metadata.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlpExtractor {
    /// Creates an extractor running `program` (a name on `PATH` or a path).
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-query timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn dump_json(
        &self,
        url: &str,
        extra_args: &[String],
        cancel: &CancellationToken,
    ) -> Result<RawInfo, ExtractorError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--no-progress")
            .args(extra_args)
            .arg("--")
            .arg(url);

        let program = self.program.display().to_string();
        let output = process::run(command, &program, self.timeout, cancel)
            .await
            .map_err(|e| match e {
                ProcessError::Cancelled { .. } => ExtractorError::Cancelled,
                ProcessError::TimedOut { .. } => ExtractorError::transient(url, e.to_string()),
                ProcessError::Spawn { .. } | ProcessError::Wait { .. } => {
                    ExtractorError::resolution(url, e.to_string())
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(url, &output.stderr));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ExtractorError::resolution(url, format!("yt-dlp returned invalid JSON: {e}"))
        })
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    #[instrument(skip(self, cancel), fields(url = %url))]
    async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError> {
        let raw = self
            .dump_json(url, &["--flat-playlist".to_string()], cancel)
            .await?;
        let meta = raw.into_metadata();
        debug!(
            id = %meta.id,
            is_playlist = meta.is_playlist,
            variants = meta.variants.len(),
            "resolved"
        );
        Ok(meta)
    }

    #[instrument(skip(self, cancel), fields(url = %playlist_url, index))]
    async fn resolve_entry(
        &self,
        playlist_url: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError> {
        let args = [
            "--yes-playlist".to_string(),
            "--playlist-items".to_string(),
            index.to_string(),
        ];
        let raw = self.dump_json(playlist_url, &args, cancel).await?;
        if raw.kind.as_deref() != Some("playlist") {
            // Not a playlist after all; entry 1 is the item itself.
            return if index == 1 {
                Ok(raw.into_metadata())
            } else {
                Err(ExtractorError::resolution(
                    playlist_url,
                    format!("playlist entry {index} not found"),
                ))
            };
        }
        raw.entries
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .next()
            .map(RawInfo::into_metadata)
            .ok_or_else(|| {
                ExtractorError::resolution(
                    playlist_url,
                    format!("playlist entry {index} is unavailable"),
                )
            })
    }
}

fn classify_failure(url: &str, stderr: &str) -> ExtractorError {
    let reason = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .map_or_else(
            || "yt-dlp failed without output".to_string(),
            |line| line.trim().trim_start_matches("ERROR:").trim().to_string(),
        );
    let lower = stderr.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ExtractorError::transient(url, reason)
    } else {
        ExtractorError::resolution(url, reason)
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    id: String,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    // Items with a single direct stream carry it at the top level.
    url: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    subtitles: HashMap<String, Vec<RawSubtitle>>,
    #[serde(default)]
    automatic_captions: HashMap<String, Vec<RawSubtitle>>,
    playlist_count: Option<usize>,
    entries: Option<Vec<Option<RawInfo>>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    abr: Option<f64>,
    tbr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    format_note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubtitle {
    ext: Option<String>,
    url: Option<String>,
}

fn has_track(codec: Option<&str>) -> bool {
    codec.is_none_or(|c| c != "none")
}

impl RawFormat {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_variant(self) -> Option<VariantDescriptor> {
        let url = self.url?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        if !matches!(protocol, "http" | "https") {
            return None;
        }

        let video = has_track(self.vcodec.as_deref());
        let audio = has_track(self.acodec.as_deref());
        let kind = match (video, audio) {
            (true, true) => VariantKind::Muxed,
            (true, false) => VariantKind::Video,
            (false, true) => VariantKind::Audio,
            (false, false) => return None,
        };

        let (rank, codec) = match kind {
            VariantKind::Audio => (
                self.abr.or(self.tbr).map(|kbps| kbps.round() as u32),
                self.acodec,
            ),
            VariantKind::Video | VariantKind::Muxed => (self.height, self.vcodec),
        };
        let label = match (kind, rank) {
            (VariantKind::Audio, Some(kbps)) => format!("{kbps}k"),
            (_, Some(height)) => format!("{height}p"),
            (_, None) => self
                .format_note
                .unwrap_or_else(|| self.format_id.clone()),
        };

        Some(VariantDescriptor {
            id: self.format_id,
            kind,
            container: self.ext.unwrap_or_else(|| "unknown".to_string()),
            codec: codec.filter(|c| c != "none"),
            label,
            size: self.filesize.or(self.filesize_approx),
            rank,
            url,
        })
    }
}

fn pick_subtitles(
    tracks: HashMap<String, Vec<RawSubtitle>>,
    automatic: bool,
) -> impl Iterator<Item = SubtitleTrack> {
    tracks.into_iter().filter_map(move |(lang, mut options)| {
        options.sort_by_key(|o| {
            SUBTITLE_EXT_PREFERENCE
                .iter()
                .position(|ext| o.ext.as_deref() == Some(*ext))
                .unwrap_or(SUBTITLE_EXT_PREFERENCE.len())
        });
        let best = options.into_iter().find(|o| o.url.is_some())?;
        Some(SubtitleTrack {
            lang,
            ext: best.ext.unwrap_or_else(|| "vtt".to_string()),
            url: best.url?,
            automatic,
        })
    })
}

impl RawInfo {
    fn into_metadata(self) -> ItemMetadata {
        let is_playlist = self.kind.as_deref() == Some("playlist");
        let playlist_length = if is_playlist {
            self.playlist_count
                .or_else(|| self.entries.as_ref().map(Vec::len))
        } else {
            None
        };

        let mut variants: Vec<VariantDescriptor> = self
            .formats
            .into_iter()
            .filter_map(RawFormat::into_variant)
            .collect();
        if variants.is_empty()
            && !is_playlist
            && let Some(url) = self.url
        {
            variants.push(VariantDescriptor {
                id: "direct".to_string(),
                kind: VariantKind::Muxed,
                container: self.ext.unwrap_or_else(|| "unknown".to_string()),
                codec: None,
                label: "direct".to_string(),
                size: None,
                rank: None,
                url,
            });
        }

        let mut subtitle_tracks: Vec<SubtitleTrack> = pick_subtitles(self.subtitles, false)
            .chain(pick_subtitles(self.automatic_captions, true))
            .collect();
        subtitle_tracks.sort_by(|a, b| {
            a.lang
                .cmp(&b.lang)
                .then_with(|| a.automatic.cmp(&b.automatic))
        });

        ItemMetadata {
            title: self.title.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            uploader: self.uploader.or(self.channel),
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
            thumbnail: self.thumbnail,
            variants,
            subtitle_tracks,
            is_playlist,
            playlist_length,
        }
    }
}
