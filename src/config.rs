use clap::Parser;

/// Default size classes used when the caller supplies none.
pub const DEFAULT_SIZE_CLASSES: [usize; 5] = [64, 256, 1024, 4096, 16384];

/// Default pacing rate (1 MiB/s).
pub const DEFAULT_RATE: u64 = 1024 * 1024;

/// Configuration for a size-classed buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Buffer size classes. Sorted and deduplicated by the pool.
    /// An empty list puts the pool in non-pooling fallback mode.
    pub size_classes: Vec<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size_classes: DEFAULT_SIZE_CLASSES.to_vec(),
        }
    }
}

/// Configuration for a token-bucket rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Sustained rate; also the bucket capacity (one second of credit).
    pub bytes_per_second: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            bytes_per_second: DEFAULT_RATE,
        }
    }
}

/// iopace - pooled, paced I/O soak driver
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Buffer size classes (comma-separated, e.g. "64,256,1024")
    #[arg(long, value_delimiter = ',', default_value = "64,256,1024,4096,16384")]
    pub size_classes: Vec<usize>,

    /// Pacing rate in bytes per second
    #[arg(short, long, default_value = "1048576")]
    pub rate: u64,

    /// Number of worker threads
    #[arg(short, long, default_value = "4")]
    pub threads: usize,

    /// Write rounds per worker
    #[arg(short, long, default_value = "256")]
    pub iterations: usize,

    /// Minimum buffer capacity requested per round
    #[arg(long, default_value = "1024")]
    pub chunk_size: usize,

    /// Bytes written per round (may exceed the acquired capacity)
    #[arg(long, default_value = "1024")]
    pub payload_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Pool settings for this run
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size_classes: self.size_classes.clone(),
        }
    }

    /// Limiter settings for this run
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            bytes_per_second: self.rate,
        }
    }

    /// Bytes the whole run will push through the limiter, saturating at `u64::MAX`
    pub fn total_bytes(&self) -> u64 {
        (self.threads as u64)
            .saturating_mul(self.iterations as u64)
            .saturating_mul(self.payload_size as u64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_classes: DEFAULT_SIZE_CLASSES.to_vec(),
            rate: DEFAULT_RATE,
            threads: 4,
            iterations: 256,
            chunk_size: 1024,
            payload_size: 1024,
            log_level: "info".to_string(),
        }
    }
}
