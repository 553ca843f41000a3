//! In-memory fakes for the extractor, transport and media tool.
//!
//! Used by the pipeline integration tests to run whole jobs without yt-dlp,
//! ffmpeg or the network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use ydownloader_core::download::{Transfer, TransportError};
use ydownloader_core::extractor::ExtractorError;
use ydownloader_core::media_tool::{PostProcessError, PostProcessRequest};
use ydownloader_core::{
    Extractor, ItemMetadata, JobContext, MediaTool, ProgressAggregator, RateLimiter, RetryPolicy,
    SelectionCriteria, Transport, VariantDescriptor, VariantKind,
};

pub const CHUNK: usize = 4096;

/// A muxed mp4 variant served from `url`.
pub fn muxed(id: &str, height: u32, url: &str, size: usize) -> VariantDescriptor {
    VariantDescriptor {
        id: id.to_string(),
        kind: VariantKind::Muxed,
        container: "mp4".to_string(),
        codec: Some("avc1".to_string()),
        label: format!("{height}p"),
        size: Some(size as u64),
        rank: Some(height),
        url: url.to_string(),
    }
}

/// A video-only mp4 variant; needs a companion audio track.
pub fn video_only(id: &str, height: u32, url: &str, size: usize) -> VariantDescriptor {
    VariantDescriptor {
        kind: VariantKind::Video,
        ..muxed(id, height, url, size)
    }
}

/// An m4a audio variant of `kbps`.
pub fn audio(id: &str, kbps: u32, url: &str, size: usize) -> VariantDescriptor {
    VariantDescriptor {
        id: id.to_string(),
        kind: VariantKind::Audio,
        container: "m4a".to_string(),
        codec: Some("mp4a.40.2".to_string()),
        label: format!("{kbps}k"),
        size: Some(size as u64),
        rank: Some(kbps),
        url: url.to_string(),
    }
}

pub fn item(id: &str, title: &str, variants: Vec<VariantDescriptor>) -> ItemMetadata {
    ItemMetadata {
        id: id.to_string(),
        title: title.to_string(),
        uploader: Some("Uploader".to_string()),
        variants,
        ..ItemMetadata::default()
    }
}

/// Deterministic body of `len` bytes.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ==================== Extractor ====================

/// Serves items by URL and playlist entries by index.
#[derive(Default)]
pub struct FakeExtractor {
    pub items: HashMap<String, ItemMetadata>,
    pub playlists: HashMap<String, Vec<ItemMetadata>>,
    pub resolve_calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn with_item(mut self, url: &str, meta: ItemMetadata) -> Self {
        self.items.insert(url.to_string(), meta);
        self
    }

    pub fn with_playlist(mut self, url: &str, entries: Vec<ItemMetadata>) -> Self {
        self.playlists.insert(url.to_string(), entries);
        self
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn resolve(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entries) = self.playlists.get(url) {
            return Ok(ItemMetadata {
                id: "PL".to_string(),
                title: "Playlist".to_string(),
                is_playlist: true,
                playlist_length: Some(entries.len()),
                ..ItemMetadata::default()
            });
        }
        self.items
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractorError::resolution(url, "video unavailable"))
    }

    async fn resolve_entry(
        &self,
        playlist_url: &str,
        index: usize,
        _cancel: &CancellationToken,
    ) -> Result<ItemMetadata, ExtractorError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.playlists
            .get(playlist_url)
            .and_then(|entries| entries.get(index - 1))
            .cloned()
            .ok_or_else(|| ExtractorError::resolution(playlist_url, "no such entry"))
    }
}

// ==================== Transport ====================

/// Serves bodies by URL with scripted failures.
#[derive(Default)]
pub struct FakeTransport {
    bodies: HashMap<String, Vec<u8>>,
    /// URL -> number of opens that drop the connection after `cut_at` bytes.
    flaky: Mutex<HashMap<String, (usize, usize)>>,
    /// URLs answered with a permanent rejection.
    rejected: HashSet<String>,
    /// URLs whose body never finishes.
    stalled: HashSet<String>,
    pub opens: Mutex<Vec<(String, u64)>>,
}

impl FakeTransport {
    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    /// The first `failures` opens of `url` break after `cut_at` bytes.
    pub fn flaky(self, url: &str, failures: usize, cut_at: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(url.to_string(), (failures, cut_at));
        self
    }

    pub fn rejecting(mut self, url: &str) -> Self {
        self.rejected.insert(url.to_string());
        self
    }

    pub fn stalling(mut self, url: &str) -> Self {
        self.stalled.insert(url.to_string());
        self
    }

    pub fn opens_of(&self, url: &str) -> Vec<u64> {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, url: &str, offset: u64) -> Result<Transfer, TransportError> {
        self.opens.lock().unwrap().push((url.to_string(), offset));
        if self.rejected.contains(url) {
            return Err(TransportError::rejected(url, "HTTP 403"));
        }
        let Some(body) = self.bodies.get(url) else {
            return Err(TransportError::rejected(url, "HTTP 404"));
        };
        let total = body.len() as u64;
        let start = usize::try_from(offset).unwrap().min(body.len());

        if self.stalled.contains(url) {
            let first = Bytes::copy_from_slice(&body[start..(start + CHUNK).min(body.len())]);
            let chunks = futures_util::stream::iter(vec![Ok(first)])
                .chain(futures_util::stream::pending());
            return Ok(Transfer {
                total: Some(total),
                offset_honoured: true,
                chunks: chunks.boxed(),
            });
        }

        let cut = {
            let mut flaky = self.flaky.lock().unwrap();
            match flaky.get_mut(url) {
                Some((failures, cut_at)) if *failures > 0 => {
                    *failures -= 1;
                    Some(*cut_at)
                }
                _ => None,
            }
        };
        let end = cut.map_or(body.len(), |c| c.max(start).min(body.len()));
        let mut chunks: Vec<Result<Bytes, TransportError>> = body[start..end]
            .chunks(CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if cut.is_some() {
            chunks.push(Err(TransportError::transient(url, "connection reset")));
        }
        Ok(Transfer {
            total: Some(total),
            offset_honoured: true,
            chunks: futures_util::stream::iter(chunks).boxed(),
        })
    }
}

// ==================== Media tool ====================

/// Copies the input to the output, with scripted failures.
#[derive(Default)]
pub struct FakeMediaTool {
    pub fail: bool,
    /// Fails requests that embed anything; plain muxing still works.
    pub fail_embedding: bool,
    /// Writes part of the output, then waits for cancellation.
    pub hang: bool,
    pub requests: Mutex<Vec<PostProcessRequest>>,
}

impl FakeMediaTool {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn failing_embedding() -> Self {
        Self {
            fail_embedding: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn postprocess(
        &self,
        input: &Path,
        request: &PostProcessRequest,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PostProcessError> {
        self.requests.lock().unwrap().push(request.clone());
        let embeds = !request.subtitles.is_empty()
            || request.thumbnail.is_some()
            || request.metadata.is_some();
        if self.fail || (self.fail_embedding && embeds) {
            return Err(PostProcessError::failed(input, "ffmpeg exited with status 1"));
        }
        if self.hang {
            tokio::fs::write(output, b"partial")
                .await
                .map_err(|e| PostProcessError::failed(input, e.to_string()))?;
            cancel.cancelled().await;
            return Err(PostProcessError::Cancelled);
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| PostProcessError::failed(input, e.to_string()))?;
        Ok(output.to_path_buf())
    }
}

// ==================== Wiring ====================

/// Retries fast and without jitter.
pub fn quick_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(5),
        Duration::from_millis(20),
        2.0,
    )
    .without_jitter()
}

pub fn context(
    criteria: SelectionCriteria,
    extractor: Arc<dyn Extractor>,
    transport: Arc<dyn Transport>,
    media_tool: Arc<dyn MediaTool>,
) -> Arc<JobContext> {
    let rate_limiter = Arc::new(RateLimiter::from_ceiling(criteria.rate_limit()));
    let retry_policy = quick_retries(criteria.max_attempts());
    Arc::new(JobContext {
        extractor,
        transport,
        media_tool,
        criteria: Arc::new(criteria),
        rate_limiter,
        progress: Arc::new(ProgressAggregator::new()),
        retry_policy,
    })
}

/// Names of the regular files directly inside `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
