//! Shared byte-progress accounting for one pull.
//!
//! A [`ProgressCounter`] is shared across the blob workers of a single pull;
//! it is not reused across pulls. The total is set once at pull start (zero
//! means unknown) and the done counter is clamped to `[0, total]` whenever a
//! total is known. Negative deltas support the range-downgrade rollback path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Atomic byte counter with a known (or unknown) total.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    done: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounter {
    /// New counter with everything at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total once at pull start. Zero means unknown.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Total bytes, zero when unknown.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Bytes accounted so far.
    #[must_use]
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Advance (or roll back, for negative deltas) the done counter,
    /// clamping to `[0, total]` when a total is known.
    pub fn add(&self, delta: i64) {
        let total = self.total();
        let mut current = self.done.load(Ordering::Relaxed);
        loop {
            let moved = if delta.is_negative() {
                current.saturating_sub(delta.unsigned_abs())
            } else {
                current.saturating_add(delta.unsigned_abs())
            };
            let next = if total > 0 { moved.min(total) } else { moved };
            match self
                .done
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Set the done counter directly, with the same clamp as [`add`].
    ///
    /// [`add`]: Self::add
    pub fn set_done(&self, done: u64) {
        let total = self.total();
        let clamped = if total > 0 { done.min(total) } else { done };
        self.done.store(clamped, Ordering::Relaxed);
    }

    /// Immutable snapshot for display and the `/progress` endpoint.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let done = self.done();
        let total = self.total();
        let percent = if total > 0 {
            // Truncation is acceptable for display percentages.
            #[allow(clippy::cast_precision_loss)]
            {
                (done as f64 / total as f64) * 100.0
            }
        } else {
            0.0
        };
        ProgressSnapshot {
            done,
            total,
            percent,
        }
    }
}

/// A byte sink that advances the counter by the written length.
impl std::io::Write for &ProgressCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.add(i64::try_from(buf.len()).unwrap_or(i64::MAX));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Point-in-time view of a counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub done: u64,
    pub total: u64,
    pub percent: f64,
}

/// Windowed byte-rate sampler for display and ETA.
///
/// Feed it `observe(done)` on a fixed cadence; `rate()` averages over the
/// retained window. Owned by whoever renders (the CLI ticker), not shared.
#[derive(Debug)]
pub struct RateSampler {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl RateSampler {
    /// Sampler with the given averaging window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record the current done count.
    pub fn observe(&mut self, done: u64) {
        let now = Instant::now();
        self.samples.push_back((now, done));
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes/second over the window, zero until two samples exist.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let (Some(&(t0, d0)), Some(&(t1, d1))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = t1.duration_since(t0).as_secs_f64();
        if elapsed <= 0.0 || d1 <= d0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (d1 - d0) as f64 / elapsed
        }
    }

    /// Estimated time to completion at the current rate.
    #[must_use]
    pub fn eta(&self, done: u64, total: u64) -> Option<Duration> {
        if total == 0 || done >= total {
            return None;
        }
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = (total - done) as f64 / rate;
        Some(Duration::from_secs_f64(secs))
    }
}

impl Default for RateSampler {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
