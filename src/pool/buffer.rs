//! Size-classed pool of reusable BytesMut buffers.
//!
//! Each size class owns an independent lock-free free list, so acquire and
//! release on different classes never contend. Buffers are handed out by
//! value: the pool and the caller never hold the same buffer at once.

use bytes::BytesMut;
use crossbeam::queue::SegQueue;
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

use super::stats::{PoolCounters, PoolStats};
use crate::config::{PoolConfig, DEFAULT_SIZE_CLASSES};
use crate::error::{Error, Result};

/// Capacity of fresh buffers when pooling is disabled and no minimum was asked for.
pub const FALLBACK_CAPACITY: usize = 256;

/// Buffers larger than this multiple of their matched class are dropped on release.
const OVERSIZE_FACTOR: usize = 2;

/// Process-wide pool, installed once.
static GLOBAL_POOL: OnceLock<SizeClassPool> = OnceLock::new();

/// Install the process-wide pool.
///
/// Must run before the first call to [`global_pool`]; afterwards the slot is
/// fixed and this returns [`Error::AlreadyInitialized`].
pub fn install_global(pool: SizeClassPool) -> Result<&'static SizeClassPool> {
    GLOBAL_POOL
        .set(pool)
        .map_err(|_| Error::AlreadyInitialized)?;
    Ok(global_pool())
}

/// Get the process-wide pool, installing one with the default size classes
/// if start-up code did not.
pub fn global_pool() -> &'static SizeClassPool {
    GLOBAL_POOL.get_or_init(SizeClassPool::default)
}

/// Free list for one size class.
struct SizeClass {
    capacity: usize,
    free: SegQueue<BytesMut>,
}

impl SizeClass {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: SegQueue::new(),
        }
    }
}

/// Concurrent pool of reusable buffers bucketed by capacity.
pub struct SizeClassPool {
    /// Size classes, strictly ascending. Empty means pooling is disabled.
    classes: Box<[SizeClass]>,
    counters: PoolCounters,
}

impl SizeClassPool {
    /// Create a pool with the given size classes.
    ///
    /// Classes are sorted and deduplicated. An empty set is accepted and
    /// yields a pool that never retains buffers. A zero class is rejected.
    pub fn new(size_classes: &[usize]) -> Result<Self> {
        if size_classes.contains(&0) {
            return Err(Error::InvalidSizeClass(0));
        }

        let mut sizes = size_classes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();

        if sizes.is_empty() {
            warn!("Buffer pool has no size classes, pooling disabled");
        } else {
            debug!("Buffer pool size classes: {:?}", sizes);
        }

        Ok(Self::from_sorted(sizes))
    }

    /// Create a pool from a [`PoolConfig`].
    pub fn with_config(config: &PoolConfig) -> Result<Self> {
        Self::new(&config.size_classes)
    }

    fn from_sorted(sizes: Vec<usize>) -> Self {
        Self {
            classes: sizes.into_iter().map(SizeClass::new).collect(),
            counters: PoolCounters::new(),
        }
    }

    /// Index of the smallest class holding `capacity`, or the largest class
    /// when `capacity` exceeds all of them. `None` when pooling is disabled.
    #[inline]
    fn class_index(&self, capacity: usize) -> Option<usize> {
        let last = self.classes.len().checked_sub(1)?;
        let idx = self.classes.partition_point(|class| class.capacity < capacity);
        Some(idx.min(last))
    }

    /// Get an empty buffer with at least `min_capacity` bytes of capacity.
    ///
    /// Requests above the largest class get a buffer of the largest class;
    /// callers needing more grow it themselves.
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        let Some(idx) = self.class_index(min_capacity) else {
            self.counters.record_acquire(false);
            let capacity = if min_capacity == 0 {
                FALLBACK_CAPACITY
            } else {
                min_capacity
            };
            return BytesMut::with_capacity(capacity);
        };

        let class = &self.classes[idx];
        match class.free.pop() {
            Some(mut buf) => {
                self.counters.record_acquire(true);
                self.counters.idle_popped();
                buf.clear();
                // Buffers filed under a larger class than their capacity are topped up
                if buf.capacity() < class.capacity {
                    buf.reserve(class.capacity);
                }
                trace!(class = class.capacity, "buffer pool hit");
                buf
            }
            None => {
                self.counters.record_acquire(false);
                trace!(class = class.capacity, "buffer pool miss");
                BytesMut::with_capacity(class.capacity)
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is cleared and filed under the smallest class holding its
    /// capacity (or the largest class). Buffers that grew past twice that
    /// class are dropped instead.
    pub fn release(&self, mut buf: BytesMut) {
        self.counters.record_release();
        buf.clear();

        let capacity = buf.capacity();
        let Some(idx) = self.class_index(capacity) else {
            return;
        };

        let class = &self.classes[idx];
        if capacity > class.capacity.saturating_mul(OVERSIZE_FACTOR) {
            debug!(
                capacity,
                class = class.capacity,
                "dropping oversized buffer"
            );
            return;
        }

        // Counted before the push so a racing pop never decrements first
        self.counters.idle_pushed();
        class.free.push(buf);
    }

    /// Get a guarded buffer from the smallest class.
    #[inline]
    pub fn get(&self) -> PooledBuffer<'_> {
        self.get_with_capacity(0)
    }

    /// Get a guarded buffer with at least `min_capacity` bytes of capacity.
    #[inline]
    pub fn get_with_capacity(&self, min_capacity: usize) -> PooledBuffer<'_> {
        PooledBuffer {
            buf: Some(self.acquire(min_capacity)),
            pool: self,
        }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Zero the counters, idle gauge included. Pooled buffers are kept.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Number of idle buffers across all classes, summed from the free lists.
    ///
    /// Exact when the pool is quiescent; unaffected by `reset_stats`.
    pub fn idle_count(&self) -> usize {
        self.classes.iter().map(|class| class.free.len()).sum()
    }

    /// Configured size classes, ascending.
    pub fn size_classes(&self) -> Vec<usize> {
        self.classes.iter().map(|class| class.capacity).collect()
    }

    /// Whether released buffers can be retained at all.
    #[inline]
    pub fn is_pooling(&self) -> bool {
        !self.classes.is_empty()
    }
}

impl Default for SizeClassPool {
    fn default() -> Self {
        Self::from_sorted(DEFAULT_SIZE_CLASSES.to_vec())
    }
}

impl std::fmt::Debug for SizeClassPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeClassPool")
            .field("size_classes", &self.size_classes())
            .field("stats", &self.stats())
            .finish()
    }
}

/// RAII guard that returns its buffer to the pool on drop.
pub struct PooledBuffer<'a> {
    buf: Option<BytesMut>,
    pool: &'a SizeClassPool,
}

impl PooledBuffer<'_> {
    /// Take the buffer, preventing return to pool.
    pub fn take(mut self) -> BytesMut {
        self.buf.take().expect("buffer present until taken")
    }
}

impl std::ops::Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer present until taken")
    }
}

impl std::ops::DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer present until taken")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// Get a guarded buffer from the process-wide pool.
pub fn get_buffer() -> PooledBuffer<'static> {
    global_pool().get()
}

/// Get a guarded buffer with minimum capacity from the process-wide pool.
pub fn get_buffer_with_capacity(min_capacity: usize) -> PooledBuffer<'static> {
    global_pool().get_with_capacity(min_capacity)
}

/// Return a buffer to the process-wide pool.
pub fn put_buffer(buf: BytesMut) {
    global_pool().release(buf)
}

/// Statistics of the process-wide pool.
pub fn global_stats() -> PoolStats {
    global_pool().stats()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_pool() -> SizeClassPool {
        SizeClassPool::new(&[64, 256, 1024]).unwrap()
    }

    #[test]
    fn test_classes_sorted_and_deduplicated() {
        let pool = SizeClassPool::new(&[1024, 64, 256, 64]).unwrap();
        assert_eq!(pool.size_classes(), vec![64, 256, 1024]);
        assert!(pool.is_pooling());

        let pool = SizeClassPool::default();
        assert_eq!(pool.size_classes(), vec![64, 256, 1024, 4096, 16384]);
    }

    #[test]
    fn test_zero_class_rejected() {
        assert!(matches!(
            SizeClassPool::new(&[64, 0, 256]),
            Err(Error::InvalidSizeClass(0))
        ));
    }

    #[test]
    fn test_acquire_capacity_bounds() {
        let pool = SizeClassPool::default();
        for min in [0, 1, 63, 64, 65, 255, 1000, 4096, 10_000, 16384, 20_000, 100_000] {
            let buf = pool.acquire(min);
            assert_eq!(buf.len(), 0);
            assert!(buf.capacity() >= min.min(16384), "min={} cap={}", min, buf.capacity());
            pool.release(buf);
        }
    }

    #[test]
    fn test_acquire_selects_smallest_fitting_class() {
        let pool = small_pool();
        assert_eq!(pool.acquire(0).capacity(), 64);
        assert_eq!(pool.acquire(65).capacity(), 256);
        assert_eq!(pool.acquire(256).capacity(), 256);
        assert_eq!(pool.acquire(5000).capacity(), 1024);
    }

    #[test]
    fn test_round_trip_is_hit() {
        let pool = small_pool();

        let buf = pool.acquire(32);
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.stats().hits, 0);

        pool.release(buf);
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.acquire(32);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_acquires, 2);
        assert_eq!(stats.misses(), 1);
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn test_release_clears_buffer() {
        let pool = small_pool();

        let mut buf = pool.acquire(10);
        buf.extend_from_slice(b"hello world");
        pool.release(buf);

        let buf = pool.acquire(10);
        assert!(buf.is_empty());
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_oversized_buffer_discarded() {
        let pool = small_pool();

        // 3000 matches the largest class (1024); 3000 > 2048
        pool.release(BytesMut::with_capacity(3000));
        assert_eq!(pool.idle_count(), 0);

        let buf = pool.acquire(1000);
        let stats = pool.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.total_releases, 1);
        assert!(buf.capacity() < 3000);
    }

    #[test]
    fn test_twice_class_is_retained() {
        let pool = small_pool();

        pool.release(BytesMut::with_capacity(2048));
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.acquire(1024);
        assert_eq!(pool.stats().hits, 1);
        assert!(buf.capacity() >= 2048);
    }

    #[test]
    fn test_grown_buffer_topped_up_on_reuse() {
        let pool = small_pool();

        // 200 matches class 256 but is smaller than it
        pool.release(BytesMut::with_capacity(200));

        let buf = pool.acquire(256);
        assert_eq!(pool.stats().hits, 1);
        assert!(buf.capacity() >= 256);
    }

    #[test]
    fn test_classes_are_independent() {
        let pool = small_pool();

        pool.release(pool.acquire(1024));
        let _small = pool.acquire(64);
        assert_eq!(pool.stats().hits, 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_empty_classes_disable_pooling() {
        let pool = SizeClassPool::new(&[]).unwrap();
        assert!(!pool.is_pooling());

        let buf = pool.acquire(0);
        assert_eq!(buf.capacity(), FALLBACK_CAPACITY);
        pool.release(buf);

        let buf = pool.acquire(5000);
        assert!(buf.capacity() >= 5000);
        pool.release(buf);

        let stats = pool.stats();
        assert_eq!(stats.total_acquires, 2);
        assert_eq!(stats.total_releases, 2);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.idle_approx, 0);
    }

    #[test]
    fn test_reset_stats_keeps_buffers() {
        let pool = small_pool();
        pool.release(pool.acquire(100));
        pool.reset_stats();

        assert_eq!(pool.stats(), PoolStats::default());
        assert_eq!(pool.idle_count(), 1);

        let _buf = pool.acquire(100);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_acquires, 1);
        assert_eq!(stats.idle_approx, 0);
    }

    #[test]
    fn test_concurrent_access() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 1000;

        let pool = Arc::new(SizeClassPool::default());
        let mut handles = vec![];

        for t in 0..THREADS {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for i in 0..ROUNDS {
                    let mut buf = pool.acquire((t * 97 + i * 31) % 20_000);
                    assert!(buf.is_empty());
                    buf.extend_from_slice(b"concurrent test");
                    pool.release(buf);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.total_acquires, (THREADS * ROUNDS) as u64);
        assert_eq!(stats.total_releases, (THREADS * ROUNDS) as u64);
        assert!(stats.hits <= stats.total_acquires);
        assert_eq!(stats.idle_approx, pool.idle_count() as u64);

        let buf = pool.acquire(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pooled_buffer_returns_on_drop() {
        let pool = small_pool();
        {
            let mut buf = pool.get_with_capacity(100);
            buf.extend_from_slice(b"test");
            assert_eq!(&buf[..], b"test");
        }
        let stats = pool.stats();
        assert_eq!(stats.total_releases, 1);
        assert_eq!(stats.idle_approx, 1);

        let buf = pool.get_with_capacity(100);
        assert!(buf.is_empty());
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_pooled_buffer_take() {
        let pool = small_pool();
        let buf = pool.get().take();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(pool.stats().total_releases, 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_global_pool_single_install() {
        let pool = global_pool();
        assert!(pool.is_pooling());
        assert!(matches!(
            install_global(SizeClassPool::default()),
            Err(Error::AlreadyInitialized)
        ));

        let before = global_stats().total_releases;
        {
            let mut buf = get_buffer_with_capacity(512);
            buf.extend_from_slice(b"global");
        }
        put_buffer(get_buffer().take());
        assert!(global_stats().total_releases >= before + 2);
    }
}
