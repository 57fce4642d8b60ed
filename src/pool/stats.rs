//! Pool usage statistics.
//!
//! Counters are independent atomics updated with relaxed ordering, so reading
//! a snapshot never blocks the acquire/release hot path. A snapshot taken under
//! concurrent traffic is not a consistent cut across the four fields.
//!
//! The idle gauge is bumped on every free-list push and pop rather than read
//! from the queues, so a reset zeroes it like the other counters. Buffers
//! already pooled at reset time are not counted again until they cycle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed ordering for counters (eventual visibility is fine for statistics).
const RELAXED: Ordering = Ordering::Relaxed;

/// Live counters owned by a pool.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    acquires: AtomicU64,
    releases: AtomicU64,
    hits: AtomicU64,
    idle: AtomicU64,
}

impl PoolCounters {
    pub(crate) const fn new() -> Self {
        Self {
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            idle: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_acquire(&self, hit: bool) {
        self.acquires.fetch_add(1, RELAXED);
        if hit {
            self.hits.fetch_add(1, RELAXED);
        }
    }

    #[inline]
    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn idle_pushed(&self) {
        self.idle.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn idle_popped(&self) {
        // Saturates: a buffer pooled before a reset may be popped after it
        let _ = self
            .idle
            .fetch_update(RELAXED, RELAXED, |n| Some(n.saturating_sub(1)));
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            total_acquires: self.acquires.load(RELAXED),
            total_releases: self.releases.load(RELAXED),
            hits: self.hits.load(RELAXED),
            idle_approx: self.idle.load(RELAXED),
        }
    }

    pub(crate) fn reset(&self) {
        self.acquires.store(0, RELAXED);
        self.releases.store(0, RELAXED);
        self.hits.store(0, RELAXED);
        self.idle.store(0, RELAXED);
    }
}

/// Point-in-time snapshot of pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total `acquire` calls.
    pub total_acquires: u64,
    /// Total `release` calls, including discarded buffers.
    pub total_releases: u64,
    /// Acquires served by an idle buffer.
    pub hits: u64,
    /// Approximate number of idle buffers across all size classes.
    ///
    /// A gauge of free-list pushes minus pops since the last reset, so it
    /// undercounts buffers that were already idle when stats were reset.
    pub idle_approx: u64,
}

impl PoolStats {
    /// Acquires that had to allocate.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.total_acquires.saturating_sub(self.hits)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.total_acquires == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_acquires as f64
        }
    }

    /// Format as INFO-style `key:value` lines.
    pub fn to_info_string(&self) -> String {
        let mut out = String::with_capacity(160);
        out.push_str("# Pool\n");
        out.push_str(&format!("pool_acquires:{}\n", self.total_acquires));
        out.push_str(&format!("pool_releases:{}\n", self.total_releases));
        out.push_str(&format!("pool_hits:{}\n", self.hits));
        out.push_str(&format!("pool_misses:{}\n", self.misses()));
        out.push_str(&format!("pool_hit_rate:{:.3}\n", self.hit_rate()));
        out.push_str(&format!("pool_idle_approx:{}\n", self.idle_approx));
        out
    }
}
