//! Token-bucket rate limiter for pacing byte streams.
//!
//! Credit accrues at `rate` units per second up to a cap of `rate` (one
//! second of burst). A request for more credit than is available is not
//! rejected: the caller is suspended until the deficit has accrued.
//!
//! - [`RateLimiter::allow`] blocks the calling thread and holds the bucket
//!   lock for the whole wait, so concurrent callers are paced one at a time.
//! - [`RateLimiter::allow_async`] reserves the deficit under the lock and
//!   waits on a tokio timer with the lock released.
//! - [`RateLimiter::try_allow`] never waits and reports whether credit was
//!   taken.
//!
//! Do not call the blocking variant from inside an async runtime.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::error::{Error, Result};

/// Mutable bucket state, only touched under the limiter lock.
#[derive(Debug)]
struct Bucket {
    /// Available credit, within `[0, rate]` after every refill.
    credit: f64,
    /// Time credit was last accounted up to. Ahead of `now` while an async
    /// caller's reserved wait is still running.
    last_refill: Instant,
}

impl Bucket {
    #[inline]
    fn refill(&mut self, rate: f64, now: Instant) {
        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.credit = (self.credit + elapsed * rate).min(rate);
            self.last_refill = now;
        }
    }

    #[inline]
    fn try_consume(&mut self, amount: f64) -> bool {
        if self.credit >= amount {
            self.credit -= amount;
            true
        } else {
            false
        }
    }

    /// Time until `amount` credit is available, counting any reservation
    /// still outstanding.
    #[inline]
    fn deficit_wait(&self, amount: f64, rate: f64, now: Instant) -> Duration {
        let deficit = (amount - self.credit).max(0.0);
        Duration::try_from_secs_f64(deficit / rate)
            .unwrap_or(Duration::MAX)
            .saturating_add(self.last_refill.saturating_duration_since(now))
    }
}

/// Token-bucket limiter shared by all writers of one throttled resource.
#[derive(Debug)]
pub struct RateLimiter {
    rate: u64,
    bucket: Mutex<Bucket>,
    calls: AtomicU64,
    throttled: AtomicU64,
    waited_us: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter allowing `bytes_per_second` on average, starting
    /// with a full bucket.
    pub fn new(bytes_per_second: u64) -> Result<Self> {
        if bytes_per_second == 0 {
            return Err(Error::InvalidRate(bytes_per_second));
        }

        debug!("Rate limiter created: {} bytes/s", bytes_per_second);

        Ok(Self {
            rate: bytes_per_second,
            bucket: Mutex::new(Bucket {
                credit: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
            calls: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            waited_us: AtomicU64::new(0),
        })
    }

    /// Create a limiter from a [`LimiterConfig`].
    pub fn with_config(config: &LimiterConfig) -> Result<Self> {
        Self::new(config.bytes_per_second)
    }

    /// Configured rate; also the bucket capacity.
    #[inline]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Take `amount` credit, sleeping until it has accrued if necessary.
    ///
    /// Always returns `true`. The lock is held while sleeping, so a caller
    /// may wait behind earlier callers' deficits as well as its own.
    pub fn allow(&self, amount: u64) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if amount == 0 {
            return true;
        }

        let rate = self.rate as f64;
        let amount = amount as f64;

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        bucket.refill(rate, now);
        if bucket.try_consume(amount) {
            return true;
        }

        let wait = bucket.deficit_wait(amount, rate, now);
        self.record_wait(wait);
        std::thread::sleep(wait);

        // The wait paid for the deficit
        bucket.credit = 0.0;
        bucket.last_refill = Instant::now();
        true
    }

    /// Take `amount` credit only if it is available now.
    ///
    /// Returns `false` without consuming anything otherwise.
    pub fn try_allow(&self, amount: u64) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if amount == 0 {
            return true;
        }

        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate as f64, Instant::now());
        bucket.try_consume(amount as f64)
    }

    /// Async form of [`allow`](Self::allow).
    ///
    /// The deficit is reserved under the lock and the wait runs on a tokio
    /// timer, so other callers queue behind the reservation without being
    /// blocked on the lock. Always returns `true`.
    pub async fn allow_async(&self, amount: u64) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if amount == 0 {
            return true;
        }

        let rate = self.rate as f64;
        let amount = amount as f64;

        let wait = {
            let mut bucket = self.bucket.lock();
            let now = Instant::now();
            bucket.refill(rate, now);
            if bucket.try_consume(amount) {
                return true;
            }

            let wait = bucket.deficit_wait(amount, rate, now);
            bucket.credit = 0.0;
            bucket.last_refill = now.checked_add(wait).unwrap_or(now);
            wait
        };

        self.record_wait(wait);
        tokio::time::sleep(wait).await;
        true
    }

    /// Credit available right now, rounded down.
    pub fn available(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.rate as f64, Instant::now());
        bucket.credit as u64
    }

    /// Get limiter statistics.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            calls: self.calls.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            waited: Duration::from_micros(self.waited_us.load(Ordering::Relaxed)),
        }
    }

    #[inline]
    fn record_wait(&self, wait: Duration) {
        trace!(wait_us = wait.as_micros() as u64, "pacing caller");
        self.throttled.fetch_add(1, Ordering::Relaxed);
        self.waited_us
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Limiter statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Admission calls of any kind.
    pub calls: u64,
    /// Calls that had to wait for credit.
    pub throttled: u64,
    /// Total time callers were told to wait.
    pub waited: Duration,
}

impl LimiterStats {
    /// Format as INFO-style `key:value` lines.
    pub fn to_info_string(&self) -> String {
        let mut out = String::with_capacity(96);
        out.push_str("# Limiter\n");
        out.push_str(&format!("limiter_calls:{}\n", self.calls));
        out.push_str(&format!("limiter_throttled:{}\n", self.throttled));
        out.push_str(&format!("limiter_waited_ms:{}\n", self.waited.as_millis()));
        out
    }
}
