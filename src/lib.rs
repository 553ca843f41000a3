//! ydownloader Core Library
//!
//! This library provides the download orchestration pipeline behind the
//! `ydownloader` tool: a target (one item or a playlist range) is planned into
//! jobs, each job resolves its item, selects an encoding variant, fetches it
//! through a resumable, rate-limited transfer and post-processes it into a
//! finished file.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`target`] - What to download: a validated URL plus scope
//! - [`criteria`] - Validated, immutable selection criteria
//! - [`planner`] - Expands a target into ordered jobs
//! - [`format`] - Variant descriptions and deterministic selection
//! - [`download`] - Per-job pipeline, transport, retry and rate limiting
//! - [`scheduler`] - Bounded-concurrency execution with cancellation
//! - [`progress`] - Cross-job progress aggregation
//! - [`extractor`] - Metadata resolution (`yt-dlp`)
//! - [`media_tool`] - Post-processing (`ffmpeg`)
//! - [`process`] - Cancellable subprocess runner

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod criteria;
pub mod download;
pub mod extractor;
pub mod format;
pub mod media_tool;
pub mod planner;
pub mod process;
pub mod progress;
pub mod scheduler;
pub mod target;

// Re-export commonly used types
pub use criteria::{CriteriaError, MediaKind, SelectionCriteria};
pub use download::{
    DownloadJob, HttpTransport, JobContext, JobError, JobOutcome, JobState, OutcomeKind,
    OutcomeStatus, RateLimiter, RetryPolicy, Transport,
};
pub use extractor::{Extractor, ItemMetadata, YtDlpExtractor};
pub use format::{Selection, VariantDescriptor, VariantKind};
pub use media_tool::{FfmpegTool, MediaTool};
pub use planner::{JobPlanner, PlanError, PlanWarning, PlannedRun};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use scheduler::{DEFAULT_CONCURRENCY, RunReport, Scheduler, SchedulerError};
pub use target::{Scope, Target};
