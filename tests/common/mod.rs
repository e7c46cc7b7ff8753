#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use asset_cache::assets::{AssetLoader, BakedGlyph, FontData, FontSettings, LoadContext};
use asset_cache::prelude::*;
use glam::{UVec2, Vec2};

pub const RATE: u32 = 8000;

/// In-memory PNG filled with one RGB colour
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// In-memory 16-bit WAV at `RATE` Hz
pub fn wav(channels: u16, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
    for i in 0..frames * channels as usize {
        writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
    }
    writer.finalize().unwrap();
    bytes
}

pub fn frames_for(duration: Duration) -> usize {
    (duration.as_secs_f64() * RATE as f64) as usize
}

/// Fast timings for tests; expiry disabled unless `idle` is non-zero
pub fn config(idle: Duration) -> CacheConfig {
    CacheConfig::never_expire()
        .with_idle_expiry(idle)
        .with_grace_period(Duration::ZERO)
        .with_sweep_tick(Duration::from_millis(50))
        .with_monitor_poll(Duration::from_millis(4))
        .with_stream_chunk_frames(256)
}

pub struct Rig {
    pub cache: CacheManager,
    pub graphics: Arc<HeadlessGraphics>,
    pub audio: Arc<SoftwareAudioDevice>,
}

pub fn rig(idle: Duration) -> Rig {
    rig_with(idle, SoftwareAudioDevice::new())
}

pub fn rig_with(idle: Duration, device: SoftwareAudioDevice) -> Rig {
    let graphics = Arc::new(HeadlessGraphics::new());
    let audio = Arc::new(device);
    let cache = CacheManager::builder()
        .config(config(idle))
        .graphics(graphics.clone())
        .audio_device(audio.clone())
        .font_loader(GridFontLoader)
        .build()
        .unwrap();
    Rig {
        cache,
        graphics,
        audio,
    }
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Font loader that bakes fixed-size boxes instead of rasterizing a face
pub struct GridFontLoader;

impl AssetLoader for GridFontLoader {
    type Output = FontData;
    type Settings = FontSettings;

    fn load(
        &self,
        context: LoadContext<'_>,
        settings: &FontSettings,
    ) -> asset_cache::Result<FontData> {
        if context.read_bytes()?.is_empty() {
            return Err(CacheError::DecodeFailed {
                kind: AssetKind::Font,
                reason: "empty font".to_string(),
            });
        }
        let cell = settings.size as u32;
        let glyphs = (0..96u32)
            .map(|i| BakedGlyph {
                ch: char::from_u32(32 + i).unwrap(),
                min: UVec2::new((i % 16) * cell, (i / 16) * cell),
                max: UVec2::new((i % 16 + 1) * cell, (i / 16 + 1) * cell),
                offset: Vec2::new(0.0, -(cell as f32)),
                advance: cell as f32 * 0.5,
            })
            .collect();
        let atlas_size = UVec2::new(16 * cell, 6 * cell);
        Ok(FontData {
            size: settings.size,
            atlas_size,
            atlas: vec![0; (atlas_size.x * atlas_size.y) as usize],
            glyphs,
            line_height: settings.size * 1.25,
        })
    }
}
