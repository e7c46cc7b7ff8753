// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::assets::{
    Asset, AssetId, AssetKind, AssetLoader, AssetSource, Audio, AudioData, AudioLoader,
    CacheTable, Font, FontData, FontLoader, FontSettings, LoadContext, ReclaimContext,
    SoundInfo, SoundLoader, StreamingSound, TableStats, Texture, TextureData, TextureFormat,
    TextureLoader,
};
use crate::audio::{AudioCallback, AudioEngine, SoundCallback};
use crate::cache::sweep::{self, SweepEngine, SweepState};
use crate::config::CacheConfig;
use crate::device::{AudioDevice, GraphicsDevice, HeadlessGraphics, TextureUpload};
use crate::error::{CacheError, Result};

type DynTextureLoader = dyn AssetLoader<Output = TextureData, Settings = TextureFormat>;
type DynFontLoader = dyn AssetLoader<Output = FontData, Settings = FontSettings>;
type DynAudioLoader = dyn AssetLoader<Output = AudioData, Settings = ()>;
type DynSoundLoader = dyn AssetLoader<Output = SoundInfo, Settings = ()>;

/// Everything guarded by the cache mutex
pub(crate) struct CacheTables {
    next_id: u64,
    textures: CacheTable<Texture>,
    fonts: CacheTable<Font>,
    audio: CacheTable<Audio>,
    sounds: CacheTable<StreamingSound>,
}

/// Static dispatch from a handle type to its table
pub(crate) trait HasTable<T: Asset> {
    fn table(&mut self) -> &mut CacheTable<T>;
}

impl HasTable<Texture> for CacheTables {
    fn table(&mut self) -> &mut CacheTable<Texture> {
        &mut self.textures
    }
}

impl HasTable<Font> for CacheTables {
    fn table(&mut self) -> &mut CacheTable<Font> {
        &mut self.fonts
    }
}

impl HasTable<Audio> for CacheTables {
    fn table(&mut self) -> &mut CacheTable<Audio> {
        &mut self.audio
    }
}

impl HasTable<StreamingSound> for CacheTables {
    fn table(&mut self) -> &mut CacheTable<StreamingSound> {
        &mut self.sounds
    }
}

struct Loaders {
    texture: Box<DynTextureLoader>,
    font: Box<DynFontLoader>,
    audio: Box<DynAudioLoader>,
    sound: Box<DynSoundLoader>,
}

/// State shared between the manager and its sweep thread
pub(crate) struct Inner {
    config: CacheConfig,
    tables: Mutex<CacheTables>,
    graphics: Arc<dyn GraphicsDevice>,
    audio: AudioEngine,
    loaders: Loaders,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn graphics(&self) -> &dyn GraphicsDevice {
        &*self.graphics
    }

    pub(crate) fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    /// Run `f` on one table with the cache mutex held
    pub(crate) fn with_table<T, R, F>(&self, f: F) -> R
    where
        T: Asset,
        F: FnOnce(&mut CacheTable<T>) -> R,
        CacheTables: HasTable<T>,
    {
        let mut tables = self.tables.lock();
        f(HasTable::<T>::table(&mut *tables))
    }

    /// Allocate the next id and insert, both under the cache mutex
    fn insert<T, F>(&self, build: F) -> AssetId
    where
        T: Asset,
        F: FnOnce(AssetId) -> T,
        CacheTables: HasTable<T>,
    {
        let mut tables = self.tables.lock();
        let id = AssetId::new(tables.next_id);
        tables.next_id += 1;
        HasTable::<T>::table(&mut *tables).insert(Arc::new(build(id)), Instant::now());
        tracing::debug!(%id, kind = %T::KIND, "asset cached");
        id
    }

    fn get<T>(&self, id: AssetId) -> Option<Arc<T>>
    where
        T: Asset,
        CacheTables: HasTable<T>,
    {
        if !id.is_valid() {
            return None;
        }
        let found = self.with_table::<T, _, _>(|table| table.get(id, Instant::now()));
        if found.is_none() {
            tracing::debug!(%id, kind = %T::KIND, "lookup miss");
        }
        found
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Per-kind counters plus the allocator position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub next_id: u64,
    pub textures: TableStats,
    pub fonts: TableStats,
    pub audio: TableStats,
    pub sounds: TableStats,
    pub sweep: SweepState,
}

impl CacheStats {
    /// Live entries across every table
    pub fn live(&self) -> usize {
        self.textures.live + self.fonts.live + self.audio.live + self.sounds.live
    }
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    graphics: Option<Arc<dyn GraphicsDevice>>,
    audio_device: Option<Arc<dyn AudioDevice>>,
    loaders: Loaders,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            graphics: None,
            audio_device: None,
            loaders: Loaders {
                texture: Box::new(TextureLoader),
                font: Box::new(FontLoader),
                audio: Box::new(AudioLoader),
                sound: Box::new(SoundLoader),
            },
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Idle-expiry interval; zero disables the sweep
    pub fn idle_expiry(mut self, idle: Duration) -> Self {
        self.config.idle_expiry = idle;
        self
    }

    pub fn graphics(mut self, graphics: Arc<dyn GraphicsDevice>) -> Self {
        self.graphics = Some(graphics);
        self
    }

    /// Audio device to use instead of the process-wide default
    pub fn audio_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.audio_device = Some(device);
        self
    }

    pub fn texture_loader(
        mut self,
        loader: impl AssetLoader<Output = TextureData, Settings = TextureFormat> + 'static,
    ) -> Self {
        self.loaders.texture = Box::new(loader);
        self
    }

    pub fn font_loader(
        mut self,
        loader: impl AssetLoader<Output = FontData, Settings = FontSettings> + 'static,
    ) -> Self {
        self.loaders.font = Box::new(loader);
        self
    }

    pub fn audio_loader(
        mut self,
        loader: impl AssetLoader<Output = AudioData, Settings = ()> + 'static,
    ) -> Self {
        self.loaders.audio = Box::new(loader);
        self
    }

    pub fn sound_loader(
        mut self,
        loader: impl AssetLoader<Output = SoundInfo, Settings = ()> + 'static,
    ) -> Self {
        self.loaders.sound = Box::new(loader);
        self
    }

    pub fn build(self) -> Result<CacheManager> {
        self.config.validate()?;
        let graphics = self
            .graphics
            .unwrap_or_else(|| Arc::new(HeadlessGraphics::new()));
        let inner = Arc::new(Inner {
            audio: AudioEngine::new(self.audio_device, &self.config),
            config: self.config,
            tables: Mutex::new(CacheTables {
                next_id: 0,
                textures: CacheTable::new(),
                fonts: CacheTable::new(),
                audio: CacheTable::new(),
                sounds: CacheTable::new(),
            }),
            graphics,
            loaders: self.loaders,
            closed: AtomicBool::new(false),
        });

        let sweep = if inner.config.expiry_enabled() {
            Some(SweepEngine::spawn(inner.clone())?)
        } else {
            tracing::debug!("idle expiry disabled, no sweep thread");
            None
        };

        Ok(CacheManager {
            inner,
            sweep: Mutex::new(sweep),
        })
    }
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn report(kind: AssetKind, source: &AssetSource, result: Result<AssetId>) -> AssetId {
    match result {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(%kind, source = %source.describe(), %err, "asset load failed");
            AssetId::INVALID
        }
    }
}

/// Owns every loaded texture, font, audio clip and streaming sound.
///
/// All four tables and the id counter sit behind one mutex. Handles are
/// shared `Arc`s; the cache releases its reference only through the sweep
/// or [`close`](Self::close).
pub struct CacheManager {
    inner: Arc<Inner>,
    sweep: Mutex<Option<SweepEngine>>,
}

impl CacheManager {
    /// Manager with headless devices and the given idle expiry in seconds
    pub fn new(idle_expiry_secs: u64) -> Result<Self> {
        CacheManagerBuilder::new()
            .config(CacheConfig::new(idle_expiry_secs))
            .build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn graphics(&self) -> &Arc<dyn GraphicsDevice> {
        &self.inner.graphics
    }

    /// Decode a texture. Returns [`AssetId::INVALID`] on failure.
    pub fn load_texture(&self, source: impl Into<AssetSource>, format: TextureFormat) -> AssetId {
        let source = source.into();
        report(AssetKind::Texture, &source, self.texture_from(&source, format))
    }

    pub fn try_load_texture(
        &self,
        source: impl Into<AssetSource>,
        format: TextureFormat,
    ) -> Result<AssetId> {
        self.texture_from(&source.into(), format)
    }

    fn texture_from(&self, source: &AssetSource, format: TextureFormat) -> Result<AssetId> {
        self.inner.ensure_open()?;
        let data = self
            .inner
            .loaders
            .texture
            .load(LoadContext::new(source), &format)?;
        Ok(self.inner.insert(|id| Texture::new(id, data)))
    }

    /// Decode several textures, in parallel with the `parallel` feature.
    ///
    /// Ids are assigned in input order; failures yield [`AssetId::INVALID`]
    /// in place.
    pub fn load_textures<S: Into<AssetSource>>(
        &self,
        sources: impl IntoIterator<Item = S>,
        format: TextureFormat,
    ) -> Vec<AssetId> {
        let sources: Vec<AssetSource> = sources.into_iter().map(Into::into).collect();
        if let Err(err) = self.inner.ensure_open() {
            tracing::error!(%err, count = sources.len(), "batch load rejected");
            return vec![AssetId::INVALID; sources.len()];
        }

        let loader = &*self.inner.loaders.texture;
        #[cfg(feature = "parallel")]
        let decoded: Vec<Result<TextureData>> = sources
            .par_iter()
            .map(|source| loader.load(LoadContext::new(source), &format))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let decoded: Vec<Result<TextureData>> = sources
            .iter()
            .map(|source| loader.load(LoadContext::new(source), &format))
            .collect();

        decoded
            .into_iter()
            .zip(&sources)
            .map(|(result, source)| {
                let result = result.map(|data| self.inner.insert(|id| Texture::new(id, data)));
                report(AssetKind::Texture, source, result)
            })
            .collect()
    }

    /// Decode a font and bake its atlas. Requires an initialized graphics
    /// context.
    pub fn load_font(&self, size: f32, source: impl Into<AssetSource>) -> AssetId {
        let source = source.into();
        report(AssetKind::Font, &source, self.font_from(size, &source))
    }

    pub fn try_load_font(&self, size: f32, source: impl Into<AssetSource>) -> Result<AssetId> {
        self.font_from(size, &source.into())
    }

    fn font_from(&self, size: f32, source: &AssetSource) -> Result<AssetId> {
        self.inner.ensure_open()?;
        if !self.inner.graphics.is_initialized() {
            return Err(CacheError::ContextUnavailable("graphics"));
        }
        let data = self
            .inner
            .loaders
            .font
            .load(LoadContext::new(source), &FontSettings { size })?;
        let atlas = self.inner.graphics.create_texture(TextureUpload {
            width: data.atlas_size.x,
            height: data.atlas_size.y,
            channels: 1,
            pixels: &data.atlas,
        })?;
        Ok(self.inner.insert(|id| Font::new(id, data, atlas)))
    }

    /// Decode an audio clip, establishing the audio context on first use
    pub fn load_audio(&self, source: impl Into<AssetSource>) -> AssetId {
        let source = source.into();
        report(AssetKind::Audio, &source, self.audio_from(&source))
    }

    pub fn try_load_audio(&self, source: impl Into<AssetSource>) -> Result<AssetId> {
        self.audio_from(&source.into())
    }

    fn audio_from(&self, source: &AssetSource) -> Result<AssetId> {
        self.inner.ensure_open()?;
        self.inner.audio.ensure_context()?;
        let data = self.inner.loaders.audio.load(LoadContext::new(source), &())?;
        let origin = source.describe();
        Ok(self.inner.insert(|id| Audio::new(id, origin, data)))
    }

    /// Open a streaming sound; only the header is decoded here
    pub fn load_sound(&self, source: impl Into<AssetSource>) -> AssetId {
        let source = source.into();
        report(AssetKind::Sound, &source, self.sound_from(&source))
    }

    pub fn try_load_sound(&self, source: impl Into<AssetSource>) -> Result<AssetId> {
        self.sound_from(&source.into())
    }

    fn sound_from(&self, source: &AssetSource) -> Result<AssetId> {
        self.inner.ensure_open()?;
        self.inner.audio.ensure_context()?;
        let info = self.inner.loaders.sound.load(LoadContext::new(source), &())?;
        let origin = source.clone();
        Ok(self.inner.insert(|id| StreamingSound::new(id, origin, info)))
    }

    pub fn get_texture(&self, id: AssetId) -> Option<Arc<Texture>> {
        self.inner.get(id)
    }

    pub fn get_font(&self, id: AssetId) -> Option<Arc<Font>> {
        self.inner.get(id)
    }

    pub fn get_audio(&self, id: AssetId) -> Option<Arc<Audio>> {
        self.inner.get(id)
    }

    pub fn get_sound(&self, id: AssetId) -> Option<Arc<StreamingSound>> {
        self.inner.get(id)
    }

    /// Upload a texture's pixels to the graphics device, once
    ///
    /// Fails with [`CacheError::Released`] once the sweep has reclaimed it.
    pub fn make_ready(&self, texture: &Texture) -> Result<u32> {
        texture.make_ready(&*self.inner.graphics)
    }

    /// Start playback. `volume` is 0..=100.
    ///
    /// `callback` fires on the monitor thread when a non-looping session
    /// ends naturally; never after [`stop`](Self::stop).
    pub fn play(
        &self,
        audio: &Arc<Audio>,
        volume: f32,
        looping: bool,
        callback: Option<AudioCallback>,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.audio.play(audio, volume, looping, callback)
    }

    /// Stop an active session without running its callback.
    /// Returns whether anything was playing.
    pub fn stop(&self, audio: &Audio) -> bool {
        self.inner.audio.stop(audio)
    }

    /// Move the play position; the session and its callback survive
    pub fn seek(&self, audio: &Audio, position: Duration) -> Result<()> {
        self.inner.audio.seek(audio, position)
    }

    /// Play position, zero when not playing
    pub fn get_time(&self, audio: &Audio) -> Duration {
        self.inner.audio.time(audio)
    }

    pub fn play_sound(
        &self,
        sound: &Arc<StreamingSound>,
        volume: f32,
        looping: bool,
        callback: Option<SoundCallback>,
    ) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.audio.play_sound(sound, volume, looping, callback)
    }

    pub fn stop_sound(&self, sound: &StreamingSound) -> bool {
        self.inner.audio.stop_sound(sound)
    }

    /// Frame-loop tick feeding every playing stream
    pub fn update_music_streams(&self) {
        let playing: SmallVec<[Arc<StreamingSound>; 8]> = self
            .inner
            .with_table::<StreamingSound, _, _>(|table| {
                table.iter().filter(|s| s.is_busy()).cloned().collect()
            });
        for sound in &playing {
            self.inner.audio.update_stream(sound);
        }
    }

    /// Run one sweep pass now, regardless of the sweep thread.
    /// Returns the number of reclaimed entries.
    pub fn sweep_now(&self) -> usize {
        if self.inner.ensure_open().is_err() || !self.inner.config.expiry_enabled() {
            return 0;
        }
        sweep::tick(&self.inner, Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let sweep = self
            .sweep
            .lock()
            .as_ref()
            .map_or(SweepState::Stopped, SweepEngine::state);
        let tables = self.inner.tables.lock();
        CacheStats {
            next_id: tables.next_id,
            textures: tables.textures.stats(),
            fonts: tables.fonts.stats(),
            audio: tables.audio.stats(),
            sounds: tables.sounds.stats(),
            sweep,
        }
    }

    /// Approximate host memory held by cached payloads
    pub fn memory_usage(&self) -> usize {
        let tables = self.inner.tables.lock();
        tables.textures.memory_usage()
            + tables.fonts.memory_usage()
            + tables.audio.memory_usage()
            + tables.sounds.memory_usage()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut down in order: stop and join the sweep, stop the playback
    /// monitor, release every cached asset, then destroy the audio context.
    ///
    /// Blocks while a sweep tick finishes its teardown. Calling it again is
    /// a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("closing cache manager");

        if let Some(sweep) = self.sweep.lock().take() {
            sweep.stop();
        }
        self.inner.audio.stop_monitor();

        let (textures, fonts, audio, sounds) = {
            let mut tables = self.inner.tables.lock();
            (
                tables.textures.drain(),
                tables.fonts.drain(),
                tables.audio.drain(),
                tables.sounds.drain(),
            )
        };
        let device = self.inner.audio.current();
        let ctx = ReclaimContext {
            graphics: &*self.inner.graphics,
            audio: device.as_deref(),
            force: true,
        };
        let mut released = 0;
        released += reclaim_all(&textures, &ctx);
        released += reclaim_all(&fonts, &ctx);
        released += reclaim_all(&audio, &ctx);
        released += reclaim_all(&sounds, &ctx);
        drop(device);

        self.inner.audio.release_context();
        tracing::info!(released, "cache manager closed");
    }
}

fn reclaim_all<T: Asset>(assets: &[Arc<T>], ctx: &ReclaimContext<'_>) -> usize {
    for asset in assets {
        asset.reclaim(ctx);
    }
    assets.len()
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareAudioDevice;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = image::GrayImage::from_pixel(width, height, image::Luma([128]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn manager() -> CacheManager {
        CacheManager::builder()
            .config(CacheConfig::never_expire())
            .audio_device(Arc::new(SoftwareAudioDevice::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_ids_are_shared_across_kinds() {
        let cache = manager();
        let a = cache.load_texture(png(2, 2), TextureFormat::Auto);
        let b = cache.load_texture(png(3, 1), TextureFormat::Rgba);
        assert_eq!((a.raw(), b.raw()), (0, 1));
        assert!(cache.get_font(a).is_none());
        assert!(cache.get_audio(b).is_none());
        assert_eq!(cache.get_texture(b).unwrap().channels(), 4);
    }

    #[test]
    fn test_failed_load_does_not_consume_id() {
        let cache = manager();
        assert_eq!(
            cache.load_texture(vec![1u8, 2, 3], TextureFormat::Auto),
            AssetId::INVALID
        );
        assert_eq!(cache.load_texture(png(1, 1), TextureFormat::Auto).raw(), 0);
        assert_eq!(cache.stats().next_id, 1);
    }

    #[test]
    fn test_invalid_id_lookup_is_empty() {
        let cache = manager();
        assert!(cache.get_texture(AssetId::INVALID).is_none());
        assert!(cache.get_sound(AssetId::new(40)).is_none());
    }

    #[test]
    fn test_font_requires_graphics_context() {
        let cache = CacheManager::builder()
            .config(CacheConfig::never_expire())
            .graphics(Arc::new(HeadlessGraphics::uninitialized()))
            .build()
            .unwrap();
        assert!(matches!(
            cache.try_load_font(16.0, vec![0u8; 16]),
            Err(CacheError::ContextUnavailable("graphics"))
        ));
        assert_eq!(cache.stats().next_id, 0);
    }

    #[test]
    fn test_no_sweep_without_expiry() {
        let cache = manager();
        assert_eq!(cache.stats().sweep, SweepState::Stopped);
        assert_eq!(cache.sweep_now(), 0);
    }

    #[test]
    fn test_batch_keeps_input_order() {
        let cache = manager();
        let ids = cache.load_textures(
            vec![png(1, 1), vec![9u8; 4], png(2, 2)],
            TextureFormat::Auto,
        );
        assert_eq!(ids[0].raw(), 0);
        assert_eq!(ids[1], AssetId::INVALID);
        assert_eq!(ids[2].raw(), 1);
        assert_eq!(cache.get_texture(ids[2]).unwrap().width(), 2);
    }

    #[test]
    fn test_close_rejects_new_loads() {
        let cache = manager();
        let id = cache.load_texture(png(1, 1), TextureFormat::Auto);
        cache.close();
        assert!(cache.is_closed());
        assert!(cache.get_texture(id).is_none());
        assert!(matches!(
            cache.try_load_texture(png(1, 1), TextureFormat::Auto),
            Err(CacheError::Closed)
        ));
        cache.close();
    }
}
