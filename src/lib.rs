pub mod config;
pub mod error;
pub mod io;
pub mod limiter;
pub mod pool;

pub use config::{Config, LimiterConfig, PoolConfig};
pub use error::{Error, Result};
pub use limiter::{LimiterStats, RateLimiter};
pub use pool::{PoolStats, PooledBuffer, SizeClassPool};
