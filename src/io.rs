//! Pooled and paced stream helpers.
//!
//! These are the consumers the pool and limiter exist for: scratch space
//! comes from a [`SizeClassPool`] and writes are paced by a shared
//! [`RateLimiter`].

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::pool::SizeClassPool;

/// Scratch space requested by [`copy_pooled`].
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Writer that paces every write through a rate limiter.
///
/// Each write is charged for the bytes the inner writer accepted, after the
/// fact, so short writes are not billed for the unwritten tail.
#[derive(Debug)]
pub struct ThrottledWriter<W> {
    inner: W,
    limiter: Arc<RateLimiter>,
    written: u64,
}

impl<W: Write> ThrottledWriter<W> {
    /// Wrap `inner`, sharing `limiter` with any other writers of the same resource.
    pub fn new(inner: W, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            written: 0,
        }
    }

    /// Bytes written through this writer.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Get a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap, returning the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ThrottledWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.limiter.allow(n as u64);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `reader` to `writer` through one buffer borrowed from `pool`.
///
/// Returns the number of bytes copied. The buffer goes back to the pool
/// whether or not the copy succeeds.
pub fn copy_pooled<R, W>(reader: &mut R, writer: &mut W, pool: &SizeClassPool) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = pool.get_with_capacity(COPY_BUFFER_SIZE);
    let capacity = buf.capacity();
    buf.resize(capacity, 0);

    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buf[..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }

    Ok(copied)
}
