//! Process-wide bandwidth limiting for media transfers.
//!
//! This module provides the [`RateLimiter`] struct, a token bucket shared by
//! every concurrent job. Each job acquires one token per byte before writing
//! a chunk, so the aggregate transfer rate of the whole run stays under the
//! configured ceiling.
//!
//! # Overview
//!
//! - Capacity is one second worth of the ceiling; the bucket starts full, so
//!   a run may burst by at most `capacity` bytes above the steady rate.
//! - Waiters are served first-in first-out: the bucket lock is a
//!   `tokio::sync::Mutex`, which queues waiters fairly, and it is held while a
//!   waiter sleeps for its deficit.
//! - A disabled limiter (no ceiling configured) returns immediately.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ydownloader_core::download::RateLimiter;
//!
//! # async fn example() {
//! // 1 MiB/s across all jobs
//! let limiter = Arc::new(RateLimiter::new(1024 * 1024));
//!
//! let worker = Arc::clone(&limiter);
//! tokio::spawn(async move {
//!     worker.acquire(64 * 1024).await;
//!     // ... write the chunk
//! });
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Token bucket limiting aggregate transfer bytes per second.
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` and hand a clone to every
/// job of the run.
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill rate in bytes per second (0 when disabled).
    bytes_per_sec: u64,

    /// Maximum number of tokens the bucket holds.
    capacity: u64,

    /// Whether limiting is disabled (no ceiling configured).
    disabled: bool,

    /// Bucket state. Held across the deficit sleep so waiters queue in order.
    bucket: Mutex<Bucket>,

    /// Total time jobs have spent throttled, in milliseconds.
    cumulative_delay_ms: AtomicU64,

    /// Set once the excessive-throttling warning has been logged.
    warned: AtomicBool,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    #[allow(clippy::cast_precision_loss)]
    fn refill(&mut self, bytes_per_sec: u64, capacity: u64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * bytes_per_sec as f64).min(capacity as f64);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Creates a limiter with the given ceiling in bytes per second.
    ///
    /// A ceiling of zero creates a disabled limiter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    #[instrument(skip_all, fields(bytes_per_sec))]
    pub fn new(bytes_per_sec: u64) -> Self {
        if bytes_per_sec == 0 {
            return Self::disabled();
        }
        debug!("creating rate limiter");
        Self {
            bytes_per_sec,
            capacity: bytes_per_sec,
            disabled: false,
            bucket: Mutex::new(Bucket {
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Creates a limiter from an optional ceiling; `None` disables limiting.
    #[must_use]
    pub fn from_ceiling(ceiling: Option<u64>) -> Self {
        ceiling.map_or_else(Self::disabled, Self::new)
    }

    /// Creates a disabled rate limiter that never waits.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            bytes_per_sec: 0,
            capacity: 0,
            disabled: true,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured ceiling in bytes per second, if any.
    #[must_use]
    pub fn ceiling(&self) -> Option<u64> {
        (!self.disabled).then_some(self.bytes_per_sec)
    }

    /// Returns the bucket capacity (maximum burst) in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the total time jobs have been throttled so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until `bytes` tokens are available and consumes them.
    ///
    /// Requests larger than the bucket capacity are served in capacity-sized
    /// pieces so they can never wait forever. Dropping the returned future
    /// (for example on cancellation) releases the caller's place in line.
    #[allow(clippy::cast_precision_loss)]
    pub async fn acquire(&self, bytes: u64) {
        if self.disabled || bytes == 0 {
            return;
        }

        let mut remaining = bytes;
        while remaining > 0 {
            let take = remaining.min(self.capacity);
            let needed = take as f64;

            let mut bucket = self.bucket.lock().await;
            bucket.refill(self.bytes_per_sec, self.capacity, Instant::now());

            if bucket.tokens < needed {
                let deficit = needed - bucket.tokens;
                let wait = Duration::from_secs_f64(deficit / self.bytes_per_sec as f64);
                self.record_delay(wait);
                tokio::time::sleep(wait).await;
                bucket.refill(self.bytes_per_sec, self.capacity, Instant::now());
            }

            bucket.tokens -= needed;
            remaining -= take;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record_delay(&self, delay: Duration) {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        let cumulative = Duration::from_millis(total);

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && !self.warned.swap(true, Ordering::SeqCst)
        {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                bytes_per_sec = self.bytes_per_sec,
                "transfers are being throttled heavily by the rate limit"
            );
        }
    }
}
