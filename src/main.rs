use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use iopace::config::Config;
use iopace::io::ThrottledWriter;
use iopace::limiter::RateLimiter;
use iopace::pool::{self, SizeClassPool};

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = Config::parse_args();

    // Initialize tracing
    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("iopace v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: {} threads x {} rounds, {} bytes/round, rate={} bytes/s",
        config.threads, config.iterations, config.payload_size, config.rate
    );

    let pool = pool::install_global(SizeClassPool::with_config(&config.pool_config())?)?;
    let limiter = Arc::new(RateLimiter::with_config(&config.limiter_config())?);

    let total_bytes = config.total_bytes();
    let expected_secs = total_bytes.saturating_sub(limiter.rate()) as f64 / limiter.rate() as f64;
    if expected_secs > 60.0 {
        warn!(
            "Run will take about {:.0}s at the configured rate",
            expected_secs
        );
    }

    let payload: Arc<[u8]> = (0..config.payload_size)
        .map(|i| (i % 251) as u8)
        .collect::<Vec<u8>>()
        .into();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.threads);

    for worker in 0..config.threads {
        let limiter = limiter.clone();
        let payload = payload.clone();
        let iterations = config.iterations;
        let chunk_size = config.chunk_size;

        handles.push(thread::spawn(move || -> std::io::Result<u64> {
            let mut writer = ThrottledWriter::new(std::io::sink(), limiter);
            for _ in 0..iterations {
                let mut buf = pool.acquire(chunk_size);
                buf.extend_from_slice(&payload);
                let result = writer.write_all(&buf);
                pool.release(buf);
                result?;
            }
            tracing::debug!("Worker {} finished", worker);
            Ok(writer.written())
        }));
    }

    let mut written = 0u64;
    for handle in handles {
        match handle.join() {
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => warn!("Worker failed: {}", e),
            Err(_) => warn!("Worker panicked"),
        }
    }

    let elapsed = start.elapsed();
    let throughput = written as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        "Wrote {} bytes in {:.3}s ({:.0} bytes/s)",
        written,
        elapsed.as_secs_f64(),
        throughput
    );

    for line in pool
        .stats()
        .to_info_string()
        .lines()
        .chain(limiter.stats().to_info_string().lines())
    {
        info!("{}", line);
    }

    Ok(())
}
