//! Multi-bar progress display driven by aggregator snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use ydownloader_core::progress::{JobProgress, Totals};
use ydownloader_core::{JobState, ProgressAggregator};

const POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Spawns the progress display when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `enabled` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    aggregator: Arc<ProgressAggregator>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !enabled {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(render_loop(aggregator, Arc::clone(&stop)));
    (Some(handle), stop)
}

async fn render_loop(aggregator: Arc<ProgressAggregator>, stop: Arc<AtomicBool>) {
    let multi = MultiProgress::new();
    let summary = multi.add(ProgressBar::new_spinner());
    summary.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    summary.enable_steady_tick(Duration::from_millis(100));
    let job_style = ProgressStyle::with_template("{prefix:>5} [{bar:30}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();
    while !stop.load(Ordering::SeqCst) {
        let snapshot = aggregator.snapshot();
        summary.set_message(summary_message(&snapshot.totals, snapshot.jobs.len()));

        for job in snapshot.live() {
            let bar = bars.entry(job.ordinal).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(job_style.clone());
                bar.set_prefix(format!("#{}", job.ordinal));
                bar
            });
            bar.set_length(job.bytes_total.unwrap_or(0).max(job.bytes_done));
            bar.set_position(job.bytes_done);
            bar.set_message(job_message(job));
        }
        bars.retain(|ordinal, bar| {
            let live = snapshot
                .jobs
                .iter()
                .any(|job| job.ordinal == *ordinal && job.is_live());
            if !live {
                bar.finish_and_clear();
                multi.remove(bar);
            }
            live
        });

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    for bar in bars.values() {
        bar.finish_and_clear();
    }
    summary.finish_and_clear();
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn human_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", HumanBytes(bytes_per_sec.max(0.0) as u64))
}

fn job_message(job: &JobProgress) -> String {
    let mut message = format!("{:<15} {}", job.state.as_str(), job.title);
    if job.state == JobState::Fetching || job.bytes_done > 0 {
        message.push_str(&format!("  {}", HumanBytes(job.bytes_done)));
        if let Some(total) = job.bytes_total {
            message.push_str(&format!(" / {}", HumanBytes(total)));
        }
    }
    if job.speed > 0.0 {
        message.push_str(&format!("  {}", human_rate(job.speed)));
    }
    if let Some(eta) = job.eta {
        message.push_str(&format!("  eta {}", HumanDuration(eta)));
    }
    message
}

fn summary_message(totals: &Totals, jobs: usize) -> String {
    let finished = totals.succeeded + totals.degraded + totals.failed + totals.cancelled;
    let mut message = format!(
        "[{finished}/{jobs}] {} done, {} active, {} queued",
        totals.succeeded + totals.degraded,
        totals.active,
        totals.pending
    );
    if totals.failed > 0 {
        message.push_str(&format!(", {} failed", totals.failed));
    }
    if totals.speed > 0.0 {
        message.push_str(&format!("  {}", human_rate(totals.speed)));
    }
    message
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fetching_job() -> JobProgress {
        JobProgress {
            ordinal: 2,
            title: "Clip".to_string(),
            state: JobState::Fetching,
            bytes_done: 1024,
            bytes_total: Some(4096),
            speed: 2048.0,
            eta: Some(Duration::from_secs(2)),
            outcome: None,
        }
    }

    #[test]
    fn test_job_message_includes_bytes_speed_and_eta() {
        let message = job_message(&fetching_job());
        assert!(message.starts_with("fetching"));
        assert!(message.contains("Clip"));
        assert!(message.contains("1.00 KiB / 4.00 KiB"));
        assert!(message.contains("2.00 KiB/s"));
        assert!(message.contains("eta"));
    }

    #[test]
    fn test_job_message_before_fetch_has_no_bytes() {
        let job = JobProgress {
            state: JobState::Resolving,
            bytes_done: 0,
            bytes_total: None,
            speed: 0.0,
            eta: None,
            ..fetching_job()
        };
        assert_eq!(job_message(&job).trim_end(), "resolving       Clip");
    }

    #[test]
    fn test_summary_message_counts() {
        let totals = Totals {
            succeeded: 2,
            degraded: 1,
            failed: 1,
            active: 2,
            pending: 4,
            ..Totals::default()
        };
        let message = summary_message(&totals, 10);
        assert_eq!(message, "[4/10] 3 done, 2 active, 4 queued, 1 failed");
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_disabled_returns_none_and_stop_true() {
        let (handle, stop) = spawn_progress_ui(false, Arc::new(ProgressAggregator::new()));
        assert!(handle.is_none());
        assert!(stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_enabled_stops_on_flag() {
        let aggregator = Arc::new(ProgressAggregator::new());
        aggregator.register(1, "one");
        let (handle, stop) = spawn_progress_ui(true, aggregator);
        assert!(!stop.load(Ordering::SeqCst));
        stop.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), handle.unwrap())
            .await
            .unwrap()
            .unwrap();
    }
}
