//! Constants for the download module (timeouts, throttling, progress cadence).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between chunks (5 minutes for slow CDNs).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Warning threshold for cumulative throttling delay across the run (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Minimum spacing between progress reports from one job.
pub const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// How long in-flight jobs may take to reach a safe point after cancellation.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Directory (under the output directory) holding per-job temporary files.
pub const WORK_DIR_NAME: &str = ".ydownloader";
