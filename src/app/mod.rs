//! Application runtime: config, wiring, progress display and reporting.

pub(crate) mod config;
pub(crate) mod exit;
pub(crate) mod progress_ui;
pub(crate) mod report;
pub(crate) mod settings;
pub(crate) mod terminal;

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ydownloader_core::download::work_dir;
use ydownloader_core::{
    Extractor, FfmpegTool, HttpTransport, JobContext, JobPlanner, PlanError, ProgressAggregator,
    RateLimiter, RetryPolicy, Scheduler, Target, YtDlpExtractor,
};

use crate::cli::Args;
use exit::ProcessExit;

/// Cancels `cancel` on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling downloads");
            cancel.cancel();
        }
    });
}

/// Removes the work directory if the run left it empty.
async fn remove_empty_work_dir(output_dir: &Path) {
    let work = work_dir(output_dir);
    for dir in [work.join("parts"), work] {
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "removed empty work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %dir.display(), error = %e, "work directory kept"),
        }
    }
}

pub(crate) async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = config::load_config(args.config.as_deref())?;
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "loaded config file");
    }
    let settings = settings::resolve_settings(&args, &loaded.config)?;
    let playlist = settings.criteria.playlist();
    let target = Target::from_url(&args.url, !playlist.enabled, playlist.start, playlist.end)
        .context("Invalid target")?;

    let criteria = Arc::new(settings.criteria);
    let extractor: Arc<dyn Extractor> = Arc::new(YtDlpExtractor::new(&settings.yt_dlp));
    let transport = HttpTransport::new().context("Failed to build HTTP client")?;
    let rate_limiter = Arc::new(RateLimiter::from_ceiling(criteria.rate_limit()));
    let retry_policy = RetryPolicy::with_max_attempts(criteria.max_attempts());
    let scheduler = Scheduler::new(settings.concurrency)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let planner = JobPlanner::new(Arc::clone(&extractor), retry_policy.clone());
    let planned = match planner.plan(&target, &cancel).await {
        Ok(planned) => planned,
        Err(PlanError::Cancelled) => return Ok(ProcessExit::Interrupted),
        Err(e) => return Err(e).context("Planning failed"),
    };
    for warning in &planned.warnings {
        warn!(%warning, "nothing planned");
    }
    if planned.jobs.is_empty() {
        info!("no jobs to run");
        return Ok(ProcessExit::Success);
    }

    let progress = Arc::new(ProgressAggregator::new());
    let ctx = Arc::new(JobContext {
        extractor,
        transport: Arc::new(transport),
        media_tool: Arc::new(FfmpegTool::new(&settings.ffmpeg)),
        criteria: Arc::clone(&criteria),
        rate_limiter,
        progress: Arc::clone(&progress),
        retry_policy,
    });

    let use_display = terminal::should_use_progress_display(
        std::io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (ui_handle, stop) = progress_ui::spawn_progress_ui(use_display, progress);
    let result = scheduler.run(planned.jobs, ctx, &cancel).await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = ui_handle {
        let _ = handle.await;
    }
    let report = result?;

    remove_empty_work_dir(criteria.output_dir()).await;
    println!("{}", report::render_report(&report));
    Ok(exit::exit_for_report(&report, settings.fail_on_partial))
}
