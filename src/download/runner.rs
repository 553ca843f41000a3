//! Drives one job through resolve, select, fetch, post-process and finalize.
//!
//! [`run_job`] never fails: every error becomes the job's outcome. Only
//! network errors are retried, resolution in place and fetching through the
//! `failed{transient} -> fetching` re-entry, both bounded by the run's
//! [`RetryPolicy`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::WORK_DIR_NAME;
use super::error::JobError;
use super::fetch::{fetch_to_file, remove_stale};
use super::filename::{
    TemplateFields, job_token, render_template, reserve_unique_path, sanitize_filename,
    split_extension,
};
use super::job::{DownloadJob, JobOutcome, JobSource, JobState, OutcomeStatus};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::transport::Transport;
use crate::criteria::{MediaKind, SelectionCriteria};
use crate::extractor::{Extractor, ExtractorError, ItemMetadata};
use crate::format::{self, LabelUnit, QualityTarget, Selection};
use crate::media_tool::{
    MediaMetadata, MediaTool, PostProcessError, PostProcessRequest, SubtitleFile, WorkFiles,
    is_audio_container, supports_cover_art,
};
use crate::progress::{ProgressAggregator, ProgressReporter};

/// Everything a job needs besides its own record. Shared by all jobs of a run.
pub struct JobContext {
    /// Metadata resolution.
    pub extractor: Arc<dyn Extractor>,
    /// Byte transfers.
    pub transport: Arc<dyn Transport>,
    /// Post-processing.
    pub media_tool: Arc<dyn MediaTool>,
    /// What the user asked for.
    pub criteria: Arc<SelectionCriteria>,
    /// Run-wide bandwidth ceiling.
    pub rate_limiter: Arc<RateLimiter>,
    /// Run-wide progress.
    pub progress: Arc<ProgressAggregator>,
    /// Retry budget and backoff.
    pub retry_policy: RetryPolicy,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("criteria", &self.criteria)
            .field("rate_limiter", &self.rate_limiter)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Directory holding temporary files: `<output>/.ydownloader/parts`.
    #[must_use]
    pub fn parts_dir(&self) -> PathBuf {
        work_dir(self.criteria.output_dir()).join("parts")
    }
}

/// The run's work directory under `output_dir`.
#[must_use]
pub fn work_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(WORK_DIR_NAME)
}

/// Runs `job` to a terminal state and returns its outcome.
#[instrument(skip_all, fields(ordinal = job.ordinal(), source = %job.source()))]
pub async fn run_job(
    mut job: DownloadJob,
    ctx: &JobContext,
    cancel: &CancellationToken,
) -> JobOutcome {
    let mut reporter = ProgressReporter::new(Arc::clone(&ctx.progress), job.ordinal());

    let status = match drive(&mut job, ctx, &mut reporter, cancel).await {
        Ok(()) => match job.degraded.clone() {
            Some(reason) => {
                warn!(name = %job.display_name(), %reason, "download finished degraded");
                OutcomeStatus::Degraded { reason }
            }
            None => OutcomeStatus::Succeeded,
        },
        Err(JobError::Cancelled) => {
            enter(&mut job, &mut reporter, JobState::Cancelled);
            info!(name = %job.display_name(), "download cancelled");
            OutcomeStatus::Cancelled
        }
        Err(error) => {
            enter(&mut job, &mut reporter, JobState::Failed { transient: false });
            warn!(
                name = %job.display_name(),
                kind = error.kind(),
                attempts = job.attempt,
                error = %error,
                "download failed"
            );
            OutcomeStatus::Failed { error }
        }
    };

    reporter.finished(status.kind());
    job.into_outcome(status)
}

fn enter(job: &mut DownloadJob, reporter: &mut ProgressReporter, state: JobState) {
    if job.transition(state) {
        reporter.state(state);
    }
}

/// Moves to `state` unless the run was cancelled first.
fn advance(
    job: &mut DownloadJob,
    reporter: &mut ProgressReporter,
    state: JobState,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    enter(job, reporter, state);
    Ok(())
}

async fn drive(
    job: &mut DownloadJob,
    ctx: &JobContext,
    reporter: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let meta = resolve(job, ctx, reporter, cancel).await?;

    advance(job, reporter, JobState::Selecting, cancel)?;
    let selection = format::select(&meta.variants, &ctx.criteria).map_err(|e| {
        JobError::no_match(job.item_id.clone().unwrap_or_default(), e.wanted)
    })?;
    debug!(
        variant = %selection.variant.id,
        label = %selection.variant.label,
        companion = ?selection.audio_companion.as_ref().map(|a| &a.id),
        convert_to = ?selection.convert_to,
        "variant selected"
    );
    job.variant = Some(selection.variant.clone());

    advance(job, reporter, JobState::Fetching, cancel)?;
    let fetched = fetch(job, ctx, reporter, &meta, &selection, cancel).await?;

    advance(job, reporter, JobState::PostProcessing, cancel)?;
    let produced = postprocess(job, ctx, &meta, &selection, fetched, cancel).await?;

    advance(job, reporter, JobState::Finalizing, cancel)?;
    finalize(job, ctx, &meta, produced).await?;

    enter(job, reporter, JobState::Succeeded);
    Ok(())
}

/// Sleeps before the next attempt, or gives `error` back when the budget is
/// spent or the failure is permanent. Returns the next attempt number.
async fn backoff(
    policy: &RetryPolicy,
    error: JobError,
    attempt: u32,
    cancel: &CancellationToken,
) -> Result<u32, JobError> {
    match policy.should_retry(classify_error(&error), attempt) {
        RetryDecision::Retry {
            delay: backoff_delay,
            attempt: next_attempt,
        } => {
            let retry_after = match &error {
                JobError::TransientNetwork { retry_after, .. } => *retry_after,
                _ => None,
            };
            let delay = retry_after.unwrap_or(backoff_delay);
            info!(
                attempt = next_attempt,
                max_attempts = policy.max_attempts(),
                delay_ms = delay.as_millis(),
                using_retry_after = retry_after.is_some(),
                error = %error,
                "retrying"
            );
            tokio::select! {
                () = cancel.cancelled() => Err(JobError::Cancelled),
                () = tokio::time::sleep(delay) => Ok(next_attempt),
            }
        }
        RetryDecision::DoNotRetry { reason } => {
            debug!(%reason, "not retrying");
            Err(error)
        }
    }
}

// ==================== Resolving ====================

async fn resolve(
    job: &mut DownloadJob,
    ctx: &JobContext,
    reporter: &mut ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ItemMetadata, JobError> {
    advance(job, reporter, JobState::Resolving, cancel)?;

    let mut attempt = 1;
    loop {
        let result = match job.source() {
            JobSource::Item { url } => ctx.extractor.resolve(url, cancel).await,
            JobSource::PlaylistEntry {
                playlist_url,
                index,
            } => {
                ctx.extractor
                    .resolve_entry(playlist_url, *index, cancel)
                    .await
            }
        };

        match result {
            Ok(meta) if meta.is_playlist => {
                return Err(JobError::resolution(
                    job.source().url(),
                    "URL refers to a playlist; drop --no-playlist to download its entries",
                ));
            }
            Ok(meta) => {
                debug!(id = %meta.id, title = %meta.title, variants = meta.variants.len(), "resolved");
                job.title = Some(meta.title.clone());
                job.item_id = Some(meta.id.clone());
                reporter.title(&meta.title);
                return Ok(meta);
            }
            Err(e @ ExtractorError::Transient { .. }) => {
                attempt = backoff(&ctx.retry_policy, e.into(), attempt, cancel).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ==================== Fetching ====================

/// One file to transfer.
#[derive(Debug)]
struct Stream {
    url: String,
    path: PathBuf,
    done: bool,
    len: u64,
}

impl Stream {
    fn new(url: &str, path: PathBuf) -> Self {
        Self {
            url: url.to_string(),
            path,
            done: false,
            len: 0,
        }
    }
}

/// Temporary files produced by the fetch stage.
#[derive(Debug)]
struct Fetched {
    main: PathBuf,
    companion: Option<PathBuf>,
    subtitles: Vec<SubtitleFile>,
    thumbnail: Option<PathBuf>,
}

/// Streams attempted by the fetch stage, with completion kept across retries.
#[derive(Debug)]
struct FetchPlan {
    main: Stream,
    companion: Option<Stream>,
    subtitles: Vec<(String, Stream)>,
    thumbnail: Option<Stream>,
    skipped: Vec<String>,
}

impl FetchPlan {
    fn new(
        parts: &Path,
        token: &str,
        meta: &ItemMetadata,
        selection: &Selection,
        criteria: &SelectionCriteria,
    ) -> Self {
        let variant = &selection.variant;
        let main = Stream::new(
            &variant.url,
            parts.join(format!("{token}.{}.part", variant.container)),
        );
        let companion = selection.audio_companion.as_ref().map(|audio| {
            Stream::new(
                &audio.url,
                parts.join(format!("{token}.audio.{}.part", audio.container)),
            )
        });
        let subtitles = if criteria.download_subtitles() {
            meta.subtitles_for(criteria.subtitle_langs(), criteria.auto_subtitles())
                .into_iter()
                .map(|track| {
                    let lang = sanitize_filename(&track.lang);
                    let path = parts.join(format!("{token}.{lang}.{}", track.ext));
                    (track.lang.clone(), Stream::new(&track.url, path))
                })
                .collect()
        } else {
            Vec::new()
        };
        let thumbnail = meta
            .thumbnail
            .as_deref()
            .filter(|_| {
                criteria.embed_thumbnail() && supports_cover_art(output_extension(selection))
            })
            .map(|url| {
                Stream::new(
                    url,
                    parts.join(format!("{token}.thumb.{}", image_extension(url))),
                )
            });

        Self {
            main,
            companion,
            subtitles,
            thumbnail,
            skipped: Vec::new(),
        }
    }

    fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(&self.main)
            .chain(self.companion.as_ref())
            .chain(self.subtitles.iter().map(|(_, s)| s))
            .chain(self.thumbnail.as_ref())
            .map(|s| s.path.as_path())
    }

    fn into_fetched(self) -> Fetched {
        Fetched {
            main: self.main.path,
            companion: self.companion.map(|s| s.path),
            subtitles: self
                .subtitles
                .into_iter()
                .filter(|(_, s)| s.done)
                .map(|(lang, s)| SubtitleFile { path: s.path, lang })
                .collect(),
            thumbnail: self.thumbnail.filter(|s| s.done).map(|s| s.path),
        }
    }
}

/// Extension of the file the job delivers when post-processing succeeds.
fn output_extension(selection: &Selection) -> &str {
    selection
        .convert_to
        .as_deref()
        .unwrap_or(&selection.variant.container)
}

/// Whether the delivered file keeps only an audio stream.
fn is_audio_output(criteria: &SelectionCriteria, selection: &Selection) -> bool {
    selection.extract_audio
        || criteria.kind() == MediaKind::Audio
        || is_audio_container(output_extension(selection))
}

fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

async fn fetch(
    job: &mut DownloadJob,
    ctx: &JobContext,
    reporter: &mut ProgressReporter,
    meta: &ItemMetadata,
    selection: &Selection,
    cancel: &CancellationToken,
) -> Result<Fetched, JobError> {
    let parts = ctx.parts_dir();
    tokio::fs::create_dir_all(&parts)
        .await
        .map_err(|e| JobError::io(&parts, e))?;

    let token = job_token(job.ordinal(), &meta.id);
    let mut plan = FetchPlan::new(&parts, &token, meta, selection, &ctx.criteria);
    let ext = output_extension(selection);
    if ctx.criteria.embed_thumbnail() && meta.thumbnail.is_some() && !supports_cover_art(ext) {
        add_degradation(job, format!("thumbnail not embeddable in {ext}"));
    }

    // Partial files from an earlier run are not reused.
    for path in plan.paths() {
        remove_stale(path).await?;
    }

    loop {
        match fetch_streams(job, ctx, reporter, &mut plan, cancel).await {
            Ok(()) => break,
            Err(error) => {
                if error.is_cancelled() {
                    return Err(error);
                }
                if error.is_transient() {
                    enter(job, reporter, JobState::Failed { transient: true });
                }
                job.attempt = backoff(&ctx.retry_policy, error, job.attempt, cancel).await?;
                enter(job, reporter, JobState::Fetching);
            }
        }
    }

    if !plan.skipped.is_empty() {
        add_degradation(job, format!("skipped {}", plan.skipped.join(", ")));
    }
    Ok(plan.into_fetched())
}

async fn fetch_streams(
    job: &mut DownloadJob,
    ctx: &JobContext,
    reporter: &mut ProgressReporter,
    plan: &mut FetchPlan,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let transport = ctx.transport.as_ref();
    let limiter = ctx.rate_limiter.as_ref();

    let main_len = if plan.main.done {
        plan.main.len
    } else {
        let len = {
            let mut on_progress = |done: u64, total: Option<u64>| {
                job.bytes_done = done;
                job.bytes_total = total;
                reporter.bytes(done, total);
            };
            fetch_to_file(
                transport,
                limiter,
                &plan.main.url,
                &plan.main.path,
                &mut on_progress,
                cancel,
            )
            .await?
        };
        plan.main.done = true;
        plan.main.len = len;
        reporter.flush();
        len
    };

    if let Some(companion) = plan.companion.as_mut().filter(|s| !s.done) {
        {
            let mut on_progress = |done: u64, total: Option<u64>| {
                let done = main_len + done;
                let total = total.map(|t| main_len + t);
                job.bytes_done = done;
                job.bytes_total = total;
                reporter.bytes(done, total);
            };
            fetch_to_file(
                transport,
                limiter,
                &companion.url,
                &companion.path,
                &mut on_progress,
                cancel,
            )
            .await?;
        }
        companion.done = true;
        reporter.flush();
    }

    let aux = plan
        .subtitles
        .iter_mut()
        .map(|(lang, s)| (format!("{lang} subtitles"), s))
        .chain(plan.thumbnail.as_mut().map(|s| ("thumbnail".to_string(), s)));
    for (what, stream) in aux {
        if stream.done || plan.skipped.contains(&what) {
            continue;
        }
        match fetch_to_file(
            transport,
            limiter,
            &stream.url,
            &stream.path,
            &mut |_, _| {},
            cancel,
        )
        .await
        {
            Ok(_) => stream.done = true,
            Err(e) if e.is_transient() || e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(what = %what, error = %e, "optional download failed");
                plan.skipped.push(what);
            }
        }
    }
    Ok(())
}

fn add_degradation(job: &mut DownloadJob, reason: String) {
    job.degraded = Some(match job.degraded.take() {
        Some(previous) => format!("{previous}; {reason}"),
        None => reason,
    });
}

// ==================== Post-processing ====================

/// The file to finalize and what is left to place next to it.
#[derive(Debug)]
struct Produced {
    path: PathBuf,
    ext: String,
    sidecar_subtitles: Vec<SubtitleFile>,
    /// Companion audio that could not be muxed, with its container.
    sidecar_audio: Option<(PathBuf, String)>,
    work: WorkFiles,
}

impl Produced {
    /// The media tool wrote `path`; its inputs are no longer needed.
    fn processed(
        path: PathBuf,
        ext: String,
        request: &PostProcessRequest,
        fetched: Fetched,
        mut work: WorkFiles,
    ) -> Self {
        work.keep(&path);
        work.track(&fetched.main);
        fetched.companion.iter().for_each(|p| work.track(p));
        fetched.thumbnail.iter().for_each(|p| work.track(p));
        let sidecar_subtitles = if request.subtitles.is_empty() {
            fetched.subtitles
        } else {
            fetched.subtitles.iter().for_each(|s| work.track(&s.path));
            Vec::new()
        };
        debug!(path = %path.display(), "post-processing complete");
        Self {
            path,
            ext,
            sidecar_subtitles,
            sidecar_audio: None,
            work,
        }
    }

    /// The raw download is delivered as is.
    fn raw(fetched: Fetched, ext: String, mut work: WorkFiles) -> Self {
        fetched.thumbnail.iter().for_each(|p| work.track(p));
        Self {
            path: fetched.main,
            ext,
            sidecar_subtitles: fetched.subtitles,
            sidecar_audio: None,
            work,
        }
    }
}

fn build_request(
    job: &DownloadJob,
    criteria: &SelectionCriteria,
    meta: &ItemMetadata,
    selection: &Selection,
    fetched: &Fetched,
) -> PostProcessRequest {
    let audio_quality = match criteria.effective_quality() {
        QualityTarget::Label(label)
            if criteria.kind() == MediaKind::Audio && label.unit == LabelUnit::Bitrate =>
        {
            Some(label.to_string())
        }
        _ => None,
    };
    PostProcessRequest {
        subtitles: if criteria.embed_subtitles() && !is_audio_output(criteria, selection) {
            fetched.subtitles.clone()
        } else {
            Vec::new()
        },
        thumbnail: fetched.thumbnail.clone(),
        metadata: criteria.embed_metadata().then(|| MediaMetadata {
            title: meta.title.clone(),
            artist: meta.uploader.clone(),
            source_url: Some(job.source().url().to_string()),
        }),
        audio_track: fetched.companion.clone(),
        target_container: selection.convert_to.clone(),
        extract_audio: selection.extract_audio,
        audio_quality,
    }
}

/// Runs the media tool, mapping a tool failure to its reason.
async fn run_tool(
    ctx: &JobContext,
    input: &Path,
    request: &PostProcessRequest,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<Result<PathBuf, String>, JobError> {
    match ctx.media_tool.postprocess(input, request, output, cancel).await {
        Ok(path) => Ok(Ok(path)),
        Err(PostProcessError::Cancelled) => Err(JobError::Cancelled),
        Err(PostProcessError::Failed { reason, .. }) => Ok(Err(reason)),
    }
}

async fn postprocess(
    job: &mut DownloadJob,
    ctx: &JobContext,
    meta: &ItemMetadata,
    selection: &Selection,
    fetched: Fetched,
    cancel: &CancellationToken,
) -> Result<Produced, JobError> {
    let ext = output_extension(selection).to_string();
    if ctx.criteria.embed_subtitles()
        && !fetched.subtitles.is_empty()
        && is_audio_output(&ctx.criteria, selection)
    {
        add_degradation(
            job,
            format!("subtitles not embeddable in {ext}, kept as separate files"),
        );
    }

    let request = build_request(job, &ctx.criteria, meta, selection, &fetched);
    let raw_ext = selection.variant.container.clone();
    let mut work = WorkFiles::new();

    if request.is_noop() {
        debug!("nothing to post-process");
        return Ok(Produced::raw(fetched, raw_ext, work));
    }

    // Only the tool's output is a work file until it succeeds; fetched
    // inputs stay in place if the run is cancelled.
    let output = fetched.main.with_file_name(format!(
        "{}.pp.{ext}",
        job_token(job.ordinal(), &meta.id)
    ));
    work.track(&output);

    let reason = match run_tool(ctx, &fetched.main, &request, &output, cancel).await? {
        Ok(path) => return Ok(Produced::processed(path, ext, &request, fetched, work)),
        Err(reason) => reason,
    };
    let error = JobError::post_process(&fetched.main, reason);
    warn!(error = %error, "post-processing failed");
    add_degradation(job, error.to_string());

    let Some(audio) = fetched.companion.clone() else {
        return Ok(Produced::raw(fetched, raw_ext, work));
    };

    // A video-only stream is not a usable download on its own.
    let mux_only = PostProcessRequest {
        audio_track: Some(audio.clone()),
        target_container: request.target_container.clone(),
        ..PostProcessRequest::default()
    };
    if mux_only != request {
        match run_tool(ctx, &fetched.main, &mux_only, &output, cancel).await? {
            Ok(path) => {
                add_degradation(job, "muxed audio and video without embedding".to_string());
                return Ok(Produced::processed(path, ext, &mux_only, fetched, work));
            }
            Err(reason) => warn!(%reason, "muxing failed"),
        }
    }

    add_degradation(job, "audio track kept as a separate file".to_string());
    let audio_ext = selection
        .audio_companion
        .as_ref()
        .map_or_else(|| "m4a".to_string(), |a| a.container.clone());
    let mut produced = Produced::raw(fetched, raw_ext, work);
    produced.sidecar_audio = Some((audio, audio_ext));
    Ok(produced)
}

// ==================== Finalizing ====================

async fn finalize(
    job: &mut DownloadJob,
    ctx: &JobContext,
    meta: &ItemMetadata,
    produced: Produced,
) -> Result<(), JobError> {
    let output_dir = ctx.criteria.output_dir();
    let fields = TemplateFields {
        title: job.title.clone(),
        id: job.item_id.clone(),
        uploader: meta.uploader.clone(),
        playlist_index: job.source().playlist_index(),
        ext: produced.ext.clone(),
    };
    let name = render_template(ctx.criteria.filename_template(), &fields);

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| JobError::finalize(output_dir, e))?;
    let dest = reserve_unique_path(output_dir, &name)
        .await
        .map_err(|e| JobError::finalize(output_dir.join(&name), e))?;
    if let Err(e) = tokio::fs::rename(&produced.path, &dest).await {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(JobError::finalize(dest, e));
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, _) = split_extension(&file_name);
    for sub in &produced.sidecar_subtitles {
        let ext = sub
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vtt".to_string());
        let name = format!("{stem}.{}.{ext}", sanitize_filename(&sub.lang));
        place_sidecar(output_dir, &name, &sub.path).await;
    }
    if let Some((audio, ext)) = &produced.sidecar_audio {
        place_sidecar(output_dir, &format!("{stem}.audio.{ext}"), audio).await;
    }

    info!(path = %dest.display(), bytes = job.bytes_done, "download complete");
    job.output_path = Some(dest);
    drop(produced.work);
    Ok(())
}

/// Moves `path` next to the output as `name`, numbering it on collision.
async fn place_sidecar(output_dir: &Path, name: &str, path: &Path) {
    let dest = match reserve_unique_path(output_dir, name).await {
        Ok(dest) => dest,
        Err(e) => {
            warn!(name = %name, error = %e, "cannot place sidecar file");
            return;
        }
    };
    if let Err(e) = tokio::fs::rename(path, &dest).await {
        let _ = tokio::fs::remove_file(&dest).await;
        warn!(path = %dest.display(), error = %e, "cannot place sidecar file");
    }
}
