//! The per-job download pipeline.
//!
//! A [`DownloadJob`] is driven through resolve, select, fetch, post-process
//! and finalize by [`run_job`]. Bytes move through a [`Transport`], are
//! throttled by the run-wide [`RateLimiter`] and land in job-unique
//! temporary files under `<output>/.ydownloader/parts/` until the finished
//! file is renamed into place.
//!
//! # Features
//!
//! - Streaming transfers with `Range` resumption across retries
//! - Exponential backoff with jitter for transient network failures
//! - Degraded success when post-processing fails (the raw file is kept)
//! - Collision-free destinations (`name_1.ext`, `name_2.ext`, ...)
//!
//! # Example
//!
//! ```no_run
//! use ydownloader_core::download::{HttpTransport, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new()?;
//! let transfer = transport.open("https://cdn.example.com/clip.mp4", 0).await?;
//! println!("total: {:?}", transfer.total);
//! # Ok(())
//! # }
//! ```

mod constants;
mod error;
mod fetch;
mod filename;
mod job;
pub mod rate_limiter;
mod retry;
mod runner;
mod transport;

pub use constants::{
    CANCEL_GRACE_PERIOD, CONNECT_TIMEOUT_SECS, PROGRESS_REPORT_INTERVAL, READ_TIMEOUT_SECS,
    WORK_DIR_NAME,
};
pub use error::JobError;
pub use filename::{
    TemplateFields, job_token, render_template, reserve_unique_path, sanitize_filename,
    split_extension,
};
pub use job::{DownloadJob, JobOutcome, JobSource, JobState, OutcomeKind, OutcomeStatus};
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use runner::{JobContext, run_job, work_dir};
pub use transport::{
    ChunkStream, HttpTransport, Transfer, Transport, TransportError, parse_retry_after,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, JobError>` explicitly in function signatures.
