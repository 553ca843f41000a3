//! Cross-job progress aggregation.
//!
//! Jobs report through a [`ProgressReporter`] handle, which coalesces byte
//! updates so the shared [`ProgressAggregator`] lock is touched at most once
//! per [`PROGRESS_REPORT_INTERVAL`] per job. The presentation layer polls
//! [`ProgressAggregator::snapshot`] for a copied-out view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::download::{JobState, OutcomeKind, PROGRESS_REPORT_INTERVAL};

/// Weight of the newest sample in the smoothed speed.
const SPEED_SMOOTHING: f64 = 0.3;

/// Samples closer together than this are folded into the next one.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// One progress update from a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The job moved to a new state.
    State(JobState),
    /// The item title became known.
    Title(String),
    /// Bytes written so far in this attempt, and the expected total.
    Bytes {
        /// Bytes done, including any resume offset.
        done: u64,
        /// Expected total, when known.
        total: Option<u64>,
    },
    /// The job reached its outcome.
    Finished(OutcomeKind),
}

/// Progress of one job, copied out of the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    /// Position in the run, 1-based.
    pub ordinal: usize,
    /// Title, or the source until the title is known.
    pub title: String,
    /// Current state.
    pub state: JobState,
    /// Bytes done in the current attempt.
    pub bytes_done: u64,
    /// Expected total, when known.
    pub bytes_total: Option<u64>,
    /// Smoothed transfer rate, bytes per second.
    pub speed: f64,
    /// Estimated time to completion, when total and speed are known.
    pub eta: Option<Duration>,
    /// Outcome, once finished.
    pub outcome: Option<OutcomeKind>,
}

impl JobProgress {
    /// Dispatched and not yet finished.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.outcome.is_none() && self.state != JobState::Pending
    }
}

/// Run-wide counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    /// Jobs that succeeded.
    pub succeeded: usize,
    /// Jobs that succeeded without some embellishment.
    pub degraded: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs that were cancelled.
    pub cancelled: usize,
    /// Jobs not yet dispatched.
    pub pending: usize,
    /// Jobs in flight.
    pub active: usize,
    /// Sum of the live jobs' speeds, bytes per second.
    pub speed: f64,
    /// Bytes written across all jobs.
    pub bytes: u64,
}

/// Read-only view of the whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Every registered job, by ordinal.
    pub jobs: Vec<JobProgress>,
    /// Run-wide counters.
    pub totals: Totals,
}

impl ProgressSnapshot {
    /// Jobs currently in flight.
    pub fn live(&self) -> impl Iterator<Item = &JobProgress> {
        self.jobs.iter().filter(|j| j.is_live())
    }
}

#[derive(Debug)]
struct Entry {
    title: String,
    state: JobState,
    bytes_done: u64,
    bytes_total: Option<u64>,
    speed: f64,
    sample_bytes: u64,
    sample_at: Option<Instant>,
    outcome: Option<OutcomeKind>,
}

impl Entry {
    fn new(title: String) -> Self {
        Self {
            title,
            state: JobState::Pending,
            bytes_done: 0,
            bytes_total: None,
            speed: 0.0,
            sample_bytes: 0,
            sample_at: None,
            outcome: None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_bytes(&mut self, done: u64, total: Option<u64>, now: Instant) {
        self.bytes_total = total;
        if done < self.bytes_done {
            // new attempt; restart the sample window, keep the speed estimate
            self.bytes_done = done;
            self.sample_bytes = done;
            self.sample_at = Some(now);
            return;
        }
        self.bytes_done = done;

        let Some(at) = self.sample_at else {
            self.sample_bytes = done;
            self.sample_at = Some(now);
            return;
        };
        let elapsed = now.saturating_duration_since(at);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return;
        }
        let rate = (done - self.sample_bytes) as f64 / elapsed.as_secs_f64();
        self.speed = if self.speed > 0.0 {
            SPEED_SMOOTHING * rate + (1.0 - SPEED_SMOOTHING) * self.speed
        } else {
            rate
        };
        self.sample_bytes = done;
        self.sample_at = Some(now);
    }

    #[allow(clippy::cast_precision_loss)]
    fn eta(&self) -> Option<Duration> {
        let total = self.bytes_total?;
        if self.speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.bytes_done) as f64;
        Some(Duration::from_secs_f64(remaining / self.speed))
    }

    fn is_active(&self) -> bool {
        self.outcome.is_none() && self.state != JobState::Pending
    }
}

/// Thread-safe accumulator shared by every job of a run.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    entries: Mutex<HashMap<usize, Entry>>,
}

impl ProgressAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a reporter panicked mid-update; the
    // counters are still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<usize, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending job.
    pub fn register(&self, ordinal: usize, title: impl Into<String>) {
        self.lock().insert(ordinal, Entry::new(title.into()));
    }

    /// Applies `event` to job `ordinal`. Unknown jobs are registered on the fly.
    pub fn report(&self, ordinal: usize, event: ProgressEvent) {
        self.report_at(ordinal, event, Instant::now());
    }

    fn report_at(&self, ordinal: usize, event: ProgressEvent, now: Instant) {
        let mut entries = self.lock();
        let entry = entries
            .entry(ordinal)
            .or_insert_with(|| Entry::new(format!("job {ordinal}")));
        match event {
            ProgressEvent::State(state) => {
                entry.state = state;
                if state != JobState::Fetching {
                    entry.speed = 0.0;
                    entry.sample_at = None;
                }
            }
            ProgressEvent::Title(title) => entry.title = title,
            ProgressEvent::Bytes { done, total } => entry.record_bytes(done, total, now),
            ProgressEvent::Finished(kind) => {
                entry.outcome = Some(kind);
                entry.speed = 0.0;
            }
        }
    }

    /// Copies out the current state of the run.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let entries = self.lock();
        let mut totals = Totals::default();
        let mut jobs: Vec<JobProgress> = entries
            .iter()
            .map(|(&ordinal, e)| {
                match e.outcome {
                    Some(OutcomeKind::Succeeded) => totals.succeeded += 1,
                    Some(OutcomeKind::Degraded) => totals.degraded += 1,
                    Some(OutcomeKind::Failed) => totals.failed += 1,
                    Some(OutcomeKind::Cancelled) => totals.cancelled += 1,
                    None if e.state == JobState::Pending => totals.pending += 1,
                    None => totals.active += 1,
                }
                if e.is_active() {
                    totals.speed += e.speed;
                }
                totals.bytes += e.bytes_done;
                JobProgress {
                    ordinal,
                    title: e.title.clone(),
                    state: e.state,
                    bytes_done: e.bytes_done,
                    bytes_total: e.bytes_total,
                    speed: e.speed,
                    eta: e.eta(),
                    outcome: e.outcome,
                }
            })
            .collect();
        drop(entries);
        jobs.sort_by_key(|j| j.ordinal);
        ProgressSnapshot { jobs, totals }
    }
}

/// Per-job reporting handle that coalesces byte updates.
#[derive(Debug)]
pub struct ProgressReporter {
    aggregator: Arc<ProgressAggregator>,
    ordinal: usize,
    interval: Duration,
    last_sent: Option<Instant>,
    held: Option<(u64, Option<u64>)>,
}

impl ProgressReporter {
    /// Creates a handle for job `ordinal`.
    #[must_use]
    pub fn new(aggregator: Arc<ProgressAggregator>, ordinal: usize) -> Self {
        Self {
            aggregator,
            ordinal,
            interval: PROGRESS_REPORT_INTERVAL,
            last_sent: None,
            held: None,
        }
    }

    /// Reports a state change immediately, flushing held bytes first.
    pub fn state(&mut self, state: JobState) {
        self.flush();
        self.aggregator
            .report(self.ordinal, ProgressEvent::State(state));
    }

    /// Reports the resolved title.
    pub fn title(&self, title: &str) {
        self.aggregator
            .report(self.ordinal, ProgressEvent::Title(title.to_string()));
    }

    /// Reports bytes, at most once per interval. Skipped updates are held
    /// until the next report or [`flush`](Self::flush).
    pub fn bytes(&mut self, done: u64, total: Option<u64>) {
        let now = Instant::now();
        let due = self
            .last_sent
            .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
        if due {
            self.held = None;
            self.last_sent = Some(now);
            self.aggregator
                .report(self.ordinal, ProgressEvent::Bytes { done, total });
        } else {
            self.held = Some((done, total));
        }
    }

    /// Sends any held byte update.
    pub fn flush(&mut self) {
        if let Some((done, total)) = self.held.take() {
            self.last_sent = Some(Instant::now());
            self.aggregator
                .report(self.ordinal, ProgressEvent::Bytes { done, total });
        }
    }

    /// Reports the job's outcome.
    pub fn finished(&mut self, kind: OutcomeKind) {
        self.flush();
        self.aggregator
            .report(self.ordinal, ProgressEvent::Finished(kind));
    }
}
