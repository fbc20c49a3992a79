//! Basic pool usage
//!
//! Run with `RUST_LOG=nebula_pool=debug cargo run --example basic_pool` to
//! see the pool's own logging.

use std::time::Duration;

use nebula_pool::{Error, Pool, PoolConfig, PoolConfigUpdate};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Basic Pool Example ===\n");

    let pool = Pool::new(
        PoolConfig::default()
            .with_max_resources(2)
            .with_acquisition_timeout(Duration::from_millis(200))
            .with_health_check_interval(Duration::from_secs(1)),
    )?;
    pool.start_maintenance();

    // Fill the pool.
    let first = pool.acquire().await?;
    let second = pool.acquire_guard().await?;
    println!("Acquired {first} and {}", *second);
    println!("Stats: {:?}\n", pool.stats());

    // A third caller waits, then gives up.
    match pool.acquire().await {
        Err(err @ Error::AcquisitionTimeout { .. }) => println!("Third acquire failed: {err}"),
        other => println!("Unexpected outcome: {other:?}"),
    }

    // A queued caller is served as soon as a handle comes back.
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.release(first);
    let granted = waiter.await??;
    println!("Queued caller received {granted}");
    pool.release(granted);
    drop(second);

    // Raise capacity at runtime, then go through the retry helper.
    pool.update_config(PoolConfigUpdate::max_resources(4))?;
    let handle = pool.acquire_with_retry().await?;
    println!("Acquired with retry: {handle}");
    pool.release(handle);

    println!("\nFinal stats: {:#?}", pool.detailed_stats().stats);
    pool.shutdown();
    Ok(())
}
