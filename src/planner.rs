//! Expands a [`Target`] into the ordered list of jobs for one run.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadJob, FailureType, JobSource, RetryDecision, RetryPolicy};
use crate::extractor::{Extractor, ExtractorError};
use crate::target::{Scope, Target};

/// Errors that abort planning, and with it the whole run.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The target is invalid or the extractor cannot resolve it.
    #[error("cannot resolve {url}: {reason}")]
    Resolution {
        /// The target URL.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The playlist length query kept failing with network errors.
    #[error("network error resolving {url}: {reason}")]
    TransientNetwork {
        /// The target URL.
        url: String,
        /// Human-readable cause of the last failure.
        reason: String,
    },

    /// The run was cancelled while planning.
    #[error("planning cancelled")]
    Cancelled,
}

impl PlanError {
    /// Creates a resolution error.
    pub fn resolution(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Non-fatal notes produced while planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    /// The requested start lies past the end of the playlist.
    EmptyRange {
        /// Requested first entry.
        start: usize,
        /// Actual playlist length.
        length: usize,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRange { start, length } => write!(
                f,
                "playlist start {start} is past the last entry ({length}); nothing to download"
            ),
        }
    }
}

/// Jobs for a run, in dispatch order, plus planning notes.
#[derive(Debug, Default)]
pub struct PlannedRun {
    /// Pending jobs; ordinals are 1-based and ascending.
    pub jobs: Vec<DownloadJob>,
    /// Non-fatal notes.
    pub warnings: Vec<PlanWarning>,
}

/// Checks a playlist range without touching the network.
///
/// # Errors
///
/// Returns [`PlanError::Resolution`] when `start < 1` or `start > end`.
pub fn validate_range(url: &str, start: usize, end: Option<usize>) -> Result<(), PlanError> {
    if start < 1 {
        return Err(PlanError::resolution(
            url,
            "playlist start must be 1 or greater",
        ));
    }
    if let Some(end) = end
        && start > end
    {
        return Err(PlanError::resolution(
            url,
            format!("playlist start {start} is after playlist end {end}"),
        ));
    }
    Ok(())
}

/// Playlist indices covered by `start..=end` on a playlist of `length`.
///
/// `end` past the length is clipped; an empty range means `start` is past
/// the end.
#[must_use]
pub fn entry_range(start: usize, end: Option<usize>, length: usize) -> std::ops::RangeInclusive<usize> {
    let last = end.map_or(length, |e| e.min(length));
    start..=last
}

/// Turns targets into job lists.
pub struct JobPlanner {
    extractor: Arc<dyn Extractor>,
    retry_policy: RetryPolicy,
}

impl fmt::Debug for JobPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPlanner")
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl JobPlanner {
    /// Creates a planner that asks `extractor` for playlist lengths.
    #[must_use]
    pub fn new(extractor: Arc<dyn Extractor>, retry_policy: RetryPolicy) -> Self {
        Self {
            extractor,
            retry_policy,
        }
    }

    /// Expands `target` into pending jobs.
    ///
    /// Single-item targets never touch the network here; items are resolved
    /// by their jobs. Playlist targets query the extractor once for the
    /// playlist length.
    ///
    /// # Errors
    ///
    /// [`PlanError::Resolution`] for an invalid range or an unresolvable
    /// playlist, [`PlanError::TransientNetwork`] when the length query keeps
    /// failing, and [`PlanError::Cancelled`] when `cancel` fires.
    #[instrument(skip(self, cancel), fields(url = %target.url(), scope = %target.scope()))]
    pub async fn plan(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<PlannedRun, PlanError> {
        let url = target.url();
        let (start, end) = match target.scope() {
            Scope::Single => return Ok(single_job(url)),
            Scope::Playlist { start, end } => (start, end),
        };
        validate_range(url, start, end)?;

        let meta = self.resolve_with_retry(url, cancel).await?;
        if !meta.is_playlist {
            info!("URL resolved to a single item, not a playlist");
            return Ok(single_job(url));
        }
        let Some(length) = meta.playlist_length else {
            return Err(PlanError::resolution(url, "playlist length is unknown"));
        };

        let range = entry_range(start, end, length);
        let mut run = PlannedRun::default();
        if range.is_empty() {
            let warning = PlanWarning::EmptyRange { start, length };
            warn!(start, length, "{warning}");
            run.warnings.push(warning);
            return Ok(run);
        }

        run.jobs = range
            .enumerate()
            .map(|(i, index)| {
                DownloadJob::new(
                    i + 1,
                    JobSource::PlaylistEntry {
                        playlist_url: url.to_string(),
                        index,
                    },
                )
            })
            .collect();
        info!(length, jobs = run.jobs.len(), "planned playlist");
        Ok(run)
    }

    async fn resolve_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<crate::extractor::ItemMetadata, PlanError> {
        let mut attempt = 1;
        loop {
            let reason = match self.extractor.resolve(url, cancel).await {
                Ok(meta) => return Ok(meta),
                Err(ExtractorError::Resolution { url, reason }) => {
                    return Err(PlanError::Resolution { url, reason });
                }
                Err(ExtractorError::Cancelled) => return Err(PlanError::Cancelled),
                Err(ExtractorError::Transient { reason, .. }) => reason,
            };

            match self
                .retry_policy
                .should_retry(FailureType::Transient, attempt)
            {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    info!(attempt, delay_ms = delay.as_millis(), error = %reason, "retrying playlist query");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(PlanError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason: why } => {
                    debug!(reason = %why, "giving up on playlist query");
                    return Err(PlanError::TransientNetwork {
                        url: url.to_string(),
                        reason,
                    });
                }
            }
        }
    }
}

fn single_job(url: &str) -> PlannedRun {
    PlannedRun {
        jobs: vec![DownloadJob::new(
            1,
            JobSource::Item {
                url: url.to_string(),
            },
        )],
        warnings: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::extractor::ItemMetadata;

    const PLAYLIST: &str = "https://www.youtube.com/playlist?list=PL1";

    /// Serves a playlist of `length`, failing transiently `failures` times first.
    struct FakePlaylist {
        length: usize,
        is_playlist: bool,
        failures: Mutex<usize>,
        calls: AtomicUsize,
    }

    impl FakePlaylist {
        fn new(length: usize) -> Self {
            Self {
                length,
                is_playlist: true,
                failures: Mutex::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for FakePlaylist {
        async fn resolve(
            &self,
            url: &str,
            _cancel: &CancellationToken,
        ) -> Result<ItemMetadata, ExtractorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ExtractorError::transient(url, "connection reset"));
                }
            }
            Ok(ItemMetadata {
                id: "PL1".to_string(),
                title: "List".to_string(),
                is_playlist: self.is_playlist,
                playlist_length: self.is_playlist.then_some(self.length),
                ..ItemMetadata::default()
            })
        }

        async fn resolve_entry(
            &self,
            playlist_url: &str,
            _index: usize,
            _cancel: &CancellationToken,
        ) -> Result<ItemMetadata, ExtractorError> {
            Err(ExtractorError::resolution(playlist_url, "not used"))
        }
    }

    fn planner(extractor: Arc<FakePlaylist>) -> JobPlanner {
        let policy = RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        )
        .without_jitter();
        JobPlanner::new(extractor, policy)
    }

    fn indices(run: &PlannedRun) -> Vec<usize> {
        run.jobs
            .iter()
            .filter_map(|j| j.source().playlist_index())
            .collect()
    }

    // ==================== Range expansion ====================

    #[tokio::test]
    async fn test_plan_range_inside_playlist() {
        let fake = Arc::new(FakePlaylist::new(7));
        let target = Target::playlist(PLAYLIST, 5, Some(10)).unwrap();
        let run = planner(fake)
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(indices(&run), vec![5, 6, 7]);
        assert!(run.warnings.is_empty());
        let ordinals: Vec<usize> = run.jobs.iter().map(DownloadJob::ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_plan_start_past_end_warns() {
        let fake = Arc::new(FakePlaylist::new(7));
        let target = Target::playlist(PLAYLIST, 20, None).unwrap();
        let run = planner(fake)
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert!(run.jobs.is_empty());
        assert_eq!(
            run.warnings,
            vec![PlanWarning::EmptyRange {
                start: 20,
                length: 7
            }]
        );
    }

    #[tokio::test]
    async fn test_plan_job_count_formula() {
        for length in [0usize, 1, 5, 9] {
            for start in 1..=10usize {
                for end in start..=12usize {
                    let fake = Arc::new(FakePlaylist::new(length));
                    let target = Target::playlist(PLAYLIST, start, Some(end)).unwrap();
                    let run = planner(fake)
                        .plan(&target, &CancellationToken::new())
                        .await
                        .unwrap();
                    let expected = (end.min(length) + 1).saturating_sub(start);
                    assert_eq!(run.jobs.len(), expected, "L={length} {start}..={end}");
                    let got = indices(&run);
                    assert!(got.windows(2).all(|w| w[0] < w[1]));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_plan_invalid_range_fails_before_network() {
        let fake = Arc::new(FakePlaylist::new(7));
        let p = planner(Arc::clone(&fake));
        for (start, end) in [(0, None), (5, Some(3))] {
            let target = Target::playlist(PLAYLIST, start, end).unwrap();
            let err = p.plan(&target, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, PlanError::Resolution { .. }));
        }
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    // ==================== Resolution ====================

    #[tokio::test]
    async fn test_plan_single_target_skips_extractor() {
        let fake = Arc::new(FakePlaylist::new(7));
        let target = Target::single("https://youtu.be/abc").unwrap();
        let run = planner(Arc::clone(&fake))
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.jobs.len(), 1);
        assert_eq!(
            run.jobs[0].source(),
            &JobSource::Item {
                url: "https://youtu.be/abc".to_string()
            }
        );
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plan_non_playlist_becomes_single_job() {
        let fake = Arc::new(FakePlaylist {
            is_playlist: false,
            ..FakePlaylist::new(0)
        });
        let target = Target::playlist(PLAYLIST, 1, None).unwrap();
        let run = planner(fake)
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.jobs.len(), 1);
        assert_eq!(run.jobs[0].source().playlist_index(), None);
    }

    #[tokio::test]
    async fn test_plan_retries_transient_length_query() {
        let fake = Arc::new(FakePlaylist::new(3));
        *fake.failures.lock().unwrap() = 2;
        let target = Target::playlist(PLAYLIST, 1, None).unwrap();
        let run = planner(Arc::clone(&fake))
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(indices(&run), vec![1, 2, 3]);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_plan_gives_up_after_retry_budget() {
        let fake = Arc::new(FakePlaylist::new(3));
        *fake.failures.lock().unwrap() = 10;
        let target = Target::playlist(PLAYLIST, 1, None).unwrap();
        let err = planner(Arc::clone(&fake))
            .plan(&target, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::TransientNetwork { .. }));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_entry_range_clips_end() {
        assert_eq!(entry_range(2, Some(100), 4), 2..=4);
        assert_eq!(entry_range(1, None, 3), 1..=3);
        assert!(entry_range(5, None, 4).is_empty());
    }
}
