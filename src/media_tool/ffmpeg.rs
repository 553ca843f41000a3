//! [`MediaTool`] backed by the `ffmpeg` program.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{
    MediaTool, PostProcessError, PostProcessRequest, is_audio_container, supports_cover_art,
};
use crate::process::{self, ProcessError};

/// Default program name, looked up on `PATH`.
pub const DEFAULT_PROGRAM: &str = "ffmpeg";

/// Default limit for one ffmpeg run.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Runs `ffmpeg` for post-processing.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    program: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl FfmpegTool {
    /// Creates a tool running `program` (a name on `PATH` or a path).
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-run timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    #[instrument(skip(self, request, cancel), fields(input = %input.display()))]
    async fn postprocess(
        &self,
        input: &Path,
        request: &PostProcessRequest,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PostProcessError> {
        let args = build_args(input, request, output);
        debug!(args = ?args, "running ffmpeg");

        let mut command = Command::new(&self.program);
        command.args(&args);
        let program = self.program.display().to_string();
        let result = process::run(command, &program, self.timeout, cancel)
            .await
            .map_err(|e| match e {
                ProcessError::Cancelled { .. } => PostProcessError::Cancelled,
                other => PostProcessError::failed(input, other.to_string()),
            })?;

        if !result.status.success() {
            let reason = result
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("ffmpeg exited with an error")
                .trim()
                .to_string();
            return Err(PostProcessError::failed(input, reason));
        }
        Ok(output.to_path_buf())
    }
}

/// Audio formats ffmpeg produces from an extraction.
fn audio_codec(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("libmp3lame"),
        "m4a" => Some("aac"),
        "opus" => Some("libopus"),
        "flac" => Some("flac"),
        "wav" => Some("pcm_s16le"),
        _ => None,
    }
}

fn subtitle_codec(container: &str) -> &'static str {
    match container {
        "mp4" | "m4a" | "mov" => "mov_text",
        "webm" => "webvtt",
        _ => "srt",
    }
}

fn output_container(output: &Path) -> String {
    output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Builds the ffmpeg argument list for `request`.
///
/// Input order is fixed: the main input, then the companion audio track,
/// then subtitles, then the thumbnail. Streams are copied unless an audio
/// format conversion is required. Audio outputs carry no subtitles, and a
/// thumbnail is dropped when the container cannot hold cover art; callers
/// leave those out of the request and report them.
#[must_use]
pub fn build_args(input: &Path, request: &PostProcessRequest, output: &Path) -> Vec<OsString> {
    let container = output_container(output);
    let audio_mode = request.extract_audio || is_audio_container(&container);

    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .iter()
        .map(OsString::from)
        .collect();

    let mut inputs: Vec<&Path> = vec![input];
    let audio_input = (!audio_mode)
        .then_some(request.audio_track.as_deref())
        .flatten()
        .map(|p| {
            inputs.push(p);
            inputs.len() - 1
        });
    let subtitle_inputs: Vec<(usize, &str)> = if audio_mode {
        Vec::new()
    } else {
        request
            .subtitles
            .iter()
            .map(|s| {
                inputs.push(&s.path);
                (inputs.len() - 1, s.lang.as_str())
            })
            .collect()
    };
    let thumbnail_input = request
        .thumbnail
        .as_deref()
        .filter(|_| supports_cover_art(&container))
        .map(|p| {
            inputs.push(p);
            inputs.len() - 1
        });

    for path in &inputs {
        args.push(OsString::from("-i"));
        args.push(path.as_os_str().to_os_string());
    }
    let mut push = |a: &str| args.push(OsString::from(a));

    if audio_mode {
        push("-map");
        push("0:a:0");
        if let Some(idx) = thumbnail_input {
            push("-map");
            push(&format!("{idx}:v:0"));
            push("-c:v");
            push("mjpeg");
            push("-disposition:v:0");
            push("attached_pic");
        } else {
            push("-vn");
        }
        if let Some(codec) = audio_codec(&container) {
            push("-c:a");
            push(codec);
            match (container.as_str(), request.audio_quality.as_deref()) {
                ("flac" | "wav", _) => {}
                (_, Some(bitrate)) => {
                    push("-b:a");
                    push(bitrate);
                }
                ("mp3", None) => {
                    push("-q:a");
                    push("0");
                }
                _ => {}
            }
        } else {
            push("-c:a");
            push("copy");
        }
    } else {
        push("-map");
        push("0:v:0?");
        match audio_input {
            Some(idx) => {
                push("-map");
                push(&format!("{idx}:a:0"));
            }
            None => {
                push("-map");
                push("0:a?");
            }
        }
        for (idx, _) in &subtitle_inputs {
            push("-map");
            push(&format!("{idx}:s:0"));
        }
        if let Some(idx) = thumbnail_input {
            push("-map");
            push(&format!("{idx}:v:0"));
        }
        push("-c");
        push("copy");
        if !subtitle_inputs.is_empty() {
            push("-c:s");
            push(subtitle_codec(&container));
            for (n, (_, lang)) in subtitle_inputs.iter().enumerate() {
                push(&format!("-metadata:s:s:{n}"));
                push(&format!("language={lang}"));
            }
        }
        if thumbnail_input.is_some() {
            push("-c:v:1");
            push("mjpeg");
            push("-disposition:v:1");
            push("attached_pic");
        }
    }

    if let Some(meta) = &request.metadata {
        push("-metadata");
        push(&format!("title={}", meta.title));
        if let Some(artist) = &meta.artist {
            push("-metadata");
            push(&format!("artist={artist}"));
        }
        if let Some(url) = &meta.source_url {
            push("-metadata");
            push(&format!("comment={url}"));
        }
    }

    args.push(output.as_os_str().to_os_string());
    args
}
