//! The per-item job record and its lifecycle states.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::error::JobError;
use crate::format::VariantDescriptor;

/// Where a job's item comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// A single item URL.
    Item {
        /// Item URL.
        url: String,
    },
    /// One entry of a playlist, resolved lazily by the job.
    PlaylistEntry {
        /// Playlist URL.
        playlist_url: String,
        /// 1-based position in the playlist.
        index: usize,
    },
}

impl JobSource {
    /// The URL the job was planned from.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Item { url } => url,
            Self::PlaylistEntry { playlist_url, .. } => playlist_url,
        }
    }

    /// Playlist position, for playlist entries.
    #[must_use]
    pub fn playlist_index(&self) -> Option<usize> {
        match self {
            Self::Item { .. } => None,
            Self::PlaylistEntry { index, .. } => Some(*index),
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item { url } => f.write_str(url),
            Self::PlaylistEntry {
                playlist_url,
                index,
            } => write!(f, "{playlist_url} #{index}"),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Planned, not yet dispatched.
    Pending,
    /// Asking the extractor about the item.
    Resolving,
    /// Choosing a variant.
    Selecting,
    /// Transferring bytes.
    Fetching,
    /// Running the media tool.
    PostProcessing,
    /// Moving the result to its destination.
    Finalizing,
    /// Output written.
    Succeeded,
    /// The last step failed. A transient failure may re-enter fetching.
    Failed {
        /// Whether the failure is worth retrying.
        transient: bool,
    },
    /// The run was cancelled before the job finished.
    Cancelled,
}

impl JobState {
    /// Short lowercase name for display and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Selecting => "selecting",
            Self::Fetching => "fetching",
            Self::PostProcessing => "postprocessing",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed { transient: true } => "retrying",
            Self::Failed { transient: false } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    ///
    /// A transient failure is not terminal while the retry budget lasts.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { transient: false } | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// The pipeline only moves forward. The one way back is the retry
    /// transition `failed{transient} -> fetching`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Resolving)
            | (Self::Resolving, Self::Selecting)
            | (Self::Selecting, Self::Fetching)
            | (Self::Fetching, Self::PostProcessing)
            | (Self::PostProcessing, Self::Finalizing)
            | (Self::Finalizing, Self::Succeeded)
            | (Self::Failed { transient: true }, Self::Fetching) => true,
            (from, Self::Failed { .. } | Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item's lifecycle record.
///
/// Owned by the worker running it; only the job's own pipeline mutates it.
#[derive(Debug)]
pub struct DownloadJob {
    ordinal: usize,
    source: JobSource,
    state: JobState,
    /// Variant bound once selection succeeds.
    pub variant: Option<VariantDescriptor>,
    /// Bytes written in the current attempt, including any resume offset.
    pub bytes_done: u64,
    /// Expected total, when known.
    pub bytes_total: Option<u64>,
    /// Fetch attempt counter, 1-based.
    pub attempt: u32,
    /// Item title, once resolved.
    pub title: Option<String>,
    /// Extractor-side item id, once resolved.
    pub item_id: Option<String>,
    /// Final output, set on success.
    pub output_path: Option<PathBuf>,
    /// Why an optional embellishment was dropped.
    pub degraded: Option<String>,
}

impl DownloadJob {
    /// Creates a pending job at `ordinal` (1-based position in the run).
    #[must_use]
    pub fn new(ordinal: usize, source: JobSource) -> Self {
        Self {
            ordinal,
            source,
            state: JobState::Pending,
            variant: None,
            bytes_done: 0,
            bytes_total: None,
            attempt: 1,
            title: None,
            item_id: None,
            output_path: None,
            degraded: None,
        }
    }

    /// Position in the planned run, 1-based.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Where the item comes from.
    #[must_use]
    pub fn source(&self) -> &JobSource {
        &self.source
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Title when known, else the source.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| self.source.to_string())
    }

    /// Moves to `next`. Illegal transitions are ignored and return false.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                ordinal = self.ordinal,
                from = %self.state,
                to = %next,
                "ignoring illegal state transition"
            );
            return false;
        }
        debug!(ordinal = self.ordinal, from = %self.state, to = %next, "job state");
        self.state = next;
        true
    }

    /// Consumes the job into its terminal outcome.
    #[must_use]
    pub fn into_outcome(self, status: OutcomeStatus) -> JobOutcome {
        JobOutcome {
            ordinal: self.ordinal,
            title: self.title,
            source: self.source,
            status,
            output_path: self.output_path,
            bytes: self.bytes_done,
            attempts: self.attempt,
        }
    }
}

/// Coarse outcome classification, used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Output written with everything requested.
    Succeeded,
    /// Output written without some embellishment.
    Degraded,
    /// No output.
    Failed,
    /// Interrupted or never started.
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Terminal status of one job.
#[derive(Debug)]
pub enum OutcomeStatus {
    /// Output written with everything requested.
    Succeeded,
    /// Output written, but an optional step failed.
    Degraded {
        /// What was dropped and why.
        reason: String,
    },
    /// The job produced no output.
    Failed {
        /// The error that ended the job.
        error: JobError,
    },
    /// The run was cancelled before the job finished.
    Cancelled,
}

impl OutcomeStatus {
    /// Coarse classification.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Succeeded => OutcomeKind::Succeeded,
            Self::Degraded { .. } => OutcomeKind::Degraded,
            Self::Failed { .. } => OutcomeKind::Failed,
            Self::Cancelled => OutcomeKind::Cancelled,
        }
    }
}

/// Terminal record of one job, as listed in the run report.
#[derive(Debug)]
pub struct JobOutcome {
    /// Position in the planned run, 1-based.
    pub ordinal: usize,
    /// Item title, when it was resolved.
    pub title: Option<String>,
    /// Where the item came from.
    pub source: JobSource,
    /// How the job ended.
    pub status: OutcomeStatus,
    /// The written file, for successes.
    pub output_path: Option<PathBuf>,
    /// Bytes transferred in the final attempt.
    pub bytes: u64,
    /// Fetch attempts made.
    pub attempts: u32,
}

impl JobOutcome {
    /// Outcome for a job that was never dispatched, or whose task was lost.
    #[must_use]
    pub fn unfinished(ordinal: usize, source: JobSource, status: OutcomeStatus) -> Self {
        Self {
            ordinal,
            title: None,
            source,
            status,
            output_path: None,
            bytes: 0,
            attempts: 0,
        }
    }

    /// Title when known, else the source.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| self.source.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(index: usize) -> JobSource {
        JobSource::PlaylistEntry {
            playlist_url: "https://example.com/playlist?list=PL1".to_string(),
            index,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = DownloadJob::new(1, entry(1));
        for next in [
            JobState::Resolving,
            JobState::Selecting,
            JobState::Fetching,
            JobState::PostProcessing,
            JobState::Finalizing,
            JobState::Succeeded,
        ] {
            assert!(job.transition(next), "to {next}");
        }
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_retry_transition_only_from_transient_failure() {
        assert!(JobState::Failed { transient: true }.can_transition_to(JobState::Fetching));
        assert!(!JobState::Failed { transient: false }.can_transition_to(JobState::Fetching));
        assert!(!JobState::Fetching.can_transition_to(JobState::Resolving));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Cancelled));
    }

    #[test]
    fn test_failure_and_cancel_reachable_from_non_terminal() {
        for from in [
            JobState::Pending,
            JobState::Resolving,
            JobState::Selecting,
            JobState::Fetching,
            JobState::PostProcessing,
            JobState::Finalizing,
            JobState::Failed { transient: true },
        ] {
            assert!(from.can_transition_to(JobState::Cancelled), "{from}");
            assert!(
                from.can_transition_to(JobState::Failed { transient: false }),
                "{from}"
            );
        }
    }

    #[test]
    fn test_source_accessors() {
        let source = entry(4);
        assert_eq!(source.playlist_index(), Some(4));
        assert_eq!(source.to_string(), "https://example.com/playlist?list=PL1 #4");
        let item = JobSource::Item {
            url: "https://youtu.be/abc".to_string(),
        };
        assert_eq!(item.playlist_index(), None);
        assert_eq!(item.url(), "https://youtu.be/abc");
    }

    #[test]
    fn test_into_outcome_keeps_identity() {
        let mut job = DownloadJob::new(3, entry(7));
        job.title = Some("Clip".to_string());
        job.bytes_done = 42;
        let outcome = job.into_outcome(OutcomeStatus::Succeeded);
        assert_eq!(outcome.ordinal, 3);
        assert_eq!(outcome.display_name(), "Clip");
        assert_eq!(outcome.bytes, 42);
        assert_eq!(outcome.status.kind(), OutcomeKind::Succeeded);
    }
}
