//! Bounded-concurrency execution of a planned run.
//!
//! The [`Scheduler`] dispatches jobs in planner order onto at most
//! `concurrency` worker tasks, using a semaphore-based concurrency control
//! pattern. A job's failure never affects its siblings.
//!
//! # Cancellation
//!
//! When the run's token fires, no further jobs are dispatched and in-flight
//! jobs stop at their next safe point. Jobs still running after the grace
//! period are aborted. Undispatched and interrupted jobs are reported as
//! cancelled; finished jobs keep their outcome.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ydownloader_core::download::JobContext;
//! use ydownloader_core::planner::PlannedRun;
//! use ydownloader_core::scheduler::Scheduler;
//!
//! # async fn example(run: PlannedRun, ctx: Arc<JobContext>) -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(3)?;
//! let report = scheduler.run(run.jobs, ctx, &CancellationToken::new()).await?;
//! println!("{} succeeded", report.count(ydownloader_core::download::OutcomeKind::Succeeded));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    CANCEL_GRACE_PERIOD, DownloadJob, JobContext, JobError, JobOutcome, JobSource, OutcomeKind,
    OutcomeStatus, run_job,
};
use crate::progress::ProgressEvent;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 16;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error("invalid concurrency {value}: must be between 1 and 16")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("scheduler semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Terminal outcomes of a run, in planner order.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One outcome per planned job.
    pub outcomes: Vec<JobOutcome>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Number of outcomes of `kind`.
    #[must_use]
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.kind() == kind)
            .count()
    }

    /// True when at least one job ran and every job failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.count(OutcomeKind::Failed) == self.outcomes.len()
    }

    /// True when any job failed.
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.count(OutcomeKind::Failed) > 0
    }

    /// Bytes transferred by the jobs' final attempts.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }
}

/// Runs jobs on a bounded worker pool.
#[derive(Debug)]
pub struct Scheduler {
    concurrency: usize,
    grace_period: Duration,
}

struct Dispatched {
    ordinal: usize,
    source: JobSource,
    handle: JoinHandle<JobOutcome>,
}

impl Scheduler {
    /// Creates a scheduler running at most `concurrency` jobs at once.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-16).
    ///
    /// # Example
    ///
    /// ```
    /// use ydownloader_core::scheduler::Scheduler;
    ///
    /// let scheduler = Scheduler::new(4).unwrap();
    /// assert_eq!(scheduler.concurrency(), 4);
    /// assert!(Scheduler::new(0).is_err());
    /// ```
    #[instrument(level = "debug")]
    pub fn new(concurrency: usize) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SchedulerError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            concurrency,
            grace_period: CANCEL_GRACE_PERIOD,
        })
    }

    /// Overrides how long in-flight jobs may run after cancellation.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `jobs` and returns one outcome per job, in planner order.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SemaphoreClosed`] if permit acquisition
    /// fails.
    #[instrument(skip_all, fields(jobs = jobs.len(), concurrency = self.concurrency))]
    pub async fn run(
        &self,
        jobs: Vec<DownloadJob>,
        ctx: Arc<JobContext>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, SchedulerError> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        for job in &jobs {
            ctx.progress.register(job.ordinal(), job.source().to_string());
        }

        info!("starting run");

        let mut dispatched: Vec<Dispatched> = Vec::with_capacity(jobs.len());
        let mut undispatched: Vec<DownloadJob> = Vec::new();
        let mut queue = jobs.into_iter();

        for job in queue.by_ref() {
            // Race the permit against cancellation so a full pool does not
            // delay shutdown.
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    Some(permit.map_err(|_| SchedulerError::SemaphoreClosed)?)
                }
            };
            let Some(permit) = permit else {
                undispatched.push(job);
                break;
            };

            debug!(ordinal = job.ordinal(), source = %job.source(), "dispatching job");
            let ordinal = job.ordinal();
            let source = job.source().clone();
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;
                run_job(job, &ctx, &cancel).await
            });
            dispatched.push(Dispatched {
                ordinal,
                source,
                handle,
            });
        }
        undispatched.extend(queue);

        let mut outcomes = Vec::with_capacity(dispatched.len() + undispatched.len());
        let mut deadline: Option<Instant> = None;

        for Dispatched {
            ordinal,
            source,
            mut handle,
        } in dispatched
        {
            let joined = loop {
                match deadline {
                    Some(at) => break tokio::time::timeout_at(at, &mut handle).await.ok(),
                    None => tokio::select! {
                        joined = &mut handle => break Some(joined),
                        () = cancel.cancelled() => {
                            deadline = Some(Instant::now() + self.grace_period);
                        }
                    },
                }
            };

            let outcome = match joined {
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => lost_job(ordinal, source, &e),
                None => {
                    warn!(ordinal, "job did not stop within the grace period, aborting");
                    handle.abort();
                    JobOutcome::unfinished(ordinal, source, OutcomeStatus::Cancelled)
                }
            };
            ctx.progress
                .report(outcome.ordinal, ProgressEvent::Finished(outcome.status.kind()));
            outcomes.push(outcome);
        }

        for job in undispatched {
            ctx.progress
                .report(job.ordinal(), ProgressEvent::Finished(OutcomeKind::Cancelled));
            outcomes.push(job.into_outcome(OutcomeStatus::Cancelled));
        }
        outcomes.sort_by_key(|o| o.ordinal);

        let report = RunReport {
            outcomes,
            cancelled: cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.count(OutcomeKind::Succeeded),
            degraded = report.count(OutcomeKind::Degraded),
            failed = report.count(OutcomeKind::Failed),
            cancelled = report.count(OutcomeKind::Cancelled),
            elapsed_ms = report.elapsed.as_millis(),
            "run complete"
        );
        Ok(report)
    }
}

/// Outcome for a job whose task panicked or was aborted.
fn lost_job(ordinal: usize, source: JobSource, error: &JoinError) -> JobOutcome {
    if error.is_cancelled() {
        return JobOutcome::unfinished(ordinal, source, OutcomeStatus::Cancelled);
    }
    warn!(ordinal, error = %error, "job task panicked");
    JobOutcome::unfinished(
        ordinal,
        source,
        OutcomeStatus::Failed {
            error: JobError::Aborted {
                reason: error.to_string(),
            },
        },
    )
}
