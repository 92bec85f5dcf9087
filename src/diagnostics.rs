//! Rate-limited warnings about dropped records.
//!
//! The sender can reject records when its queue is full, after it has been
//! closed, or when a record cannot be encoded. Logging on every rejection
//! would flood the host's logs during an outage, so drops are counted and
//! summarised at most once per interval per reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;

/// How often to emit warnings about dropped records.
pub(crate) const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Helper that rate limits dropped-record warnings.
///
/// The caller increments the drop counter via [`record_drop`]. The next call
/// to [`warn_if_due`] emits a warning using the provided callback if the
/// configured interval has elapsed. [`flush`] emits a warning immediately if
/// any records have been dropped since the last emission.
///
/// [`record_drop`]: Self::record_drop
/// [`warn_if_due`]: Self::warn_if_due
/// [`flush`]: Self::flush
pub(crate) struct RateLimitedWarner {
    interval_secs: u64,
    last_warn: AtomicU64,
    dropped: AtomicU64,
}

impl RateLimitedWarner {
    /// Create a new [`RateLimitedWarner`]. The first warning can be emitted
    /// immediately.
    pub(crate) fn new(interval: Duration) -> Self {
        let interval_secs = interval.as_secs().max(1);
        Self {
            interval_secs,
            last_warn: AtomicU64::new(now_secs().saturating_sub(interval_secs)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Increment the dropped-record counter.
    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit a warning if the rate limit interval has elapsed.
    pub(crate) fn warn_if_due(&self, mut warn: impl FnMut(u64)) {
        let now = now_secs();
        let prev = self.last_warn.load(Ordering::Relaxed);
        if now.saturating_sub(prev) >= self.interval_secs {
            let count = self.dropped.swap(0, Ordering::Relaxed);
            if count > 0 {
                warn(count);
            }
            self.last_warn.store(now, Ordering::Relaxed);
        }
    }

    /// Immediately warn about any dropped records.
    pub(crate) fn flush(&self, mut warn: impl FnMut(u64)) {
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            warn(count);
            self.last_warn.store(now_secs(), Ordering::Relaxed);
        }
    }
}

/// Categorises why a record was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DropReason {
    QueueFull,
    Closed,
    Unencodable,
}

/// Tracks dropped records and emits rate-limited warnings per reason.
pub(crate) struct DropWarner {
    queue_full: RateLimitedWarner,
    closed: RateLimitedWarner,
    unencodable: RateLimitedWarner,
}

impl DropWarner {
    pub(crate) fn new() -> Self {
        Self {
            queue_full: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
            closed: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
            unencodable: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
        }
    }

    pub(crate) fn record(&self, reason: DropReason) {
        match reason {
            DropReason::QueueFull => {
                self.queue_full.record_drop();
                self.queue_full.warn_if_due(|count| {
                    warn!("FluentSender: {count} records dropped because the queue was full");
                });
            }
            DropReason::Closed => {
                self.closed.record_drop();
                self.closed.warn_if_due(|count| {
                    warn!("FluentSender: {count} records dropped after the sender was closed");
                });
            }
            DropReason::Unencodable => {
                self.unencodable.record_drop();
                self.unencodable.warn_if_due(|count| {
                    warn!("FluentSender: {count} records dropped because they could not be encoded");
                });
            }
        }
    }

    pub(crate) fn flush(&self) {
        self.queue_full.flush(|count| {
            warn!("FluentSender: {count} records dropped because the queue was full");
        });
        self.closed.flush(|count| {
            warn!("FluentSender: {count} records dropped after the sender was closed");
        });
        self.unencodable.flush(|count| {
            warn!("FluentSender: {count} records dropped because they could not be encoded");
        });
    }
}
