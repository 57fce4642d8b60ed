use std::io;

use thiserror::Error;

/// Unified error type for iopace operations
#[derive(Debug, Error)]
pub enum Error {
    /// Rate limiter configured with a zero rate
    #[error("Invalid rate: {0} bytes/s (must be greater than zero)")]
    InvalidRate(u64),

    /// Buffer pool configured with a zero-sized class
    #[error("Invalid size class: {0} (size classes must be positive)")]
    InvalidSizeClass(usize),

    /// The process-wide pool was installed twice
    #[error("Global buffer pool already initialized")]
    AlreadyInitialized,

    /// I/O error from a pooled or throttled stream
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for iopace operations
pub type Result<T> = std::result::Result<T, Error>;
