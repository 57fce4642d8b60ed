//! Memory pooling utilities for reducing allocation overhead.
//!
//! This module provides a size-classed, lock-free pool of reusable byte
//! buffers for transient I/O scratch space.

mod buffer;
mod stats;

pub use buffer::{
    get_buffer, get_buffer_with_capacity, global_pool, global_stats, install_global, put_buffer,
    PooledBuffer, SizeClassPool, FALLBACK_CAPACITY,
};
pub use stats::PoolStats;
