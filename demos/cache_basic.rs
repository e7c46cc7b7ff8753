//! Loading, lookup and idle expiry
//!
//! Loads a few textures from memory, uploads one, then stops touching
//! everything and watches the sweep reclaim the cache.

use asset_cache::prelude::*;
use std::io::Cursor;
use std::thread;
use std::time::Duration;

fn checkerboard(size: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_fn(size, size, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .expect("encode png");
    bytes
}

fn main() -> asset_cache::Result<()> {
    println!("=== Asset Cache Basics ===");

    let config = CacheConfig::new(1)
        .with_grace_period(Duration::ZERO)
        .with_sweep_tick(Duration::from_millis(200));
    let cache = CacheManager::builder().config(config).build()?;

    let ids = cache.load_textures((8..12).map(|n| checkerboard(n * 4)), TextureFormat::Auto);
    println!("Loaded {} textures: {:?}", ids.len(), ids);

    let missing = cache.load_texture("does/not/exist.png", TextureFormat::Auto);
    println!("Missing file gives {:?} (valid: {})", missing, missing.is_valid());

    if let Some(texture) = cache.get_texture(ids[0]) {
        let handle = cache.make_ready(&texture)?;
        println!(
            "Uploaded {}x{} texture as device handle {}",
            texture.width(),
            texture.height(),
            handle
        );
    }

    // Keep the first texture warm for a while
    for _ in 0..4 {
        cache.get_texture(ids[0]);
        thread::sleep(Duration::from_millis(500));
        let stats = cache.stats();
        println!("live textures: {}", stats.textures.live);
    }

    println!("Letting everything go idle...");
    thread::sleep(Duration::from_millis(1500));
    let stats = cache.stats();
    println!(
        "live: {}, reclaimed: {}, memory: {} bytes",
        stats.live(),
        stats.textures.reclaimed,
        cache.memory_usage()
    );
    println!(
        "stats as JSON: {}",
        serde_json::to_string(&stats).unwrap_or_default()
    );

    cache.close();
    println!("Closed");
    Ok(())
}
