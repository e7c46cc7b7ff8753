//! Structured logging for the cache
//!
//! Run with `cargo run --example logging --features profiling`.
//! Set `RUST_LOG=asset_cache=debug` to see per-asset events, or pass a
//! directory argument to write daily-rotated JSON log files there.

use asset_cache::config::LogConfig;
use asset_cache::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

fn main() -> asset_cache::Result<()> {
    let directory: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let log = LogConfig {
        filter: "asset_cache=debug,info".to_string(),
        json: directory.is_some(),
        directory,
    };
    let _guard = asset_cache::profiling::init_logging(&log)?;

    let config = CacheConfig::never_expire()
        .with_idle_expiry(Duration::from_millis(300))
        .with_grace_period(Duration::ZERO)
        .with_sweep_tick(Duration::from_millis(100));
    let cache = CacheManager::builder().config(config).build()?;

    tracing::info!("loading assets");
    cache.load_texture("missing/texture.png", TextureFormat::Auto);
    cache.load_font(0.0, vec![0u8; 4]);
    let id = cache.load_texture(vec![0u8; 16], TextureFormat::Rgba);
    tracing::info!(%id, "expected an invalid id");

    std::thread::sleep(Duration::from_millis(500));
    tracing::info!(stats = ?cache.stats(), "before close");
    cache.close();
    Ok(())
}
