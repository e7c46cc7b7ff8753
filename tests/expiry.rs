mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use asset_cache::device::DeviceResult;
use asset_cache::prelude::*;
use common::{config, frames_for, png, rig, wait_for, wav};

#[test]
fn test_touched_asset_survives_then_expires() {
    let rig = rig(Duration::from_secs(1));
    let cache = &rig.cache;
    let id = cache.load_texture(png(4, 4), TextureFormat::Auto);
    let texture = cache.get_texture(id).unwrap();
    cache.make_ready(&texture).unwrap();
    drop(texture);

    // Touch every 500ms for 3 seconds
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        assert!(cache.get_texture(id).is_some(), "expired while in use");
        thread::sleep(Duration::from_millis(500));
    }

    // Stop touching; the next ticks must reclaim it
    assert!(wait_for(Duration::from_secs(3), || cache.stats().textures.live == 0));
    assert!(cache.get_texture(id).is_none());
    assert_eq!(rig.graphics.live_textures(), 0);
    assert_eq!(cache.stats().textures.reclaimed, 1);
}

#[test]
fn test_reclaimed_texture_cannot_be_realized() {
    let rig = rig(Duration::from_millis(200));
    let cache = &rig.cache;
    let id = cache.load_texture(png(4, 4), TextureFormat::Auto);
    let texture = cache.get_texture(id).unwrap();

    assert!(wait_for(Duration::from_secs(3), || cache.stats().textures.live == 0));
    assert!(!texture.has_pixels());
    assert!(matches!(
        cache.make_ready(&texture),
        Err(CacheError::Released(released)) if released == id
    ));
    assert_eq!(rig.graphics.live_textures(), 0);
}

#[test]
fn test_sweep_releases_device_resources() {
    let rig = rig(Duration::from_millis(200));
    let cache = &rig.cache;
    let font = cache.load_font(8.0, vec![1u8]);
    let audio_id = cache.load_audio(wav(1, 800));
    let audio = cache.get_audio(audio_id).unwrap();
    cache.play(&audio, 100.0, false, None).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !audio.is_playing()));
    assert_eq!(rig.audio.live_buffers(), 1);

    assert!(wait_for(Duration::from_secs(3), || cache.stats().live() == 0));
    assert!(cache.get_font(font).is_none());
    assert_eq!(rig.graphics.live_textures(), 0);
    assert_eq!(rig.audio.live_buffers(), 0);
    assert_eq!(rig.audio.live_sources(), 0);
    assert!(audio.is_released());
    assert!(matches!(
        cache.play(&audio, 100.0, false, None),
        Err(CacheError::Released(_))
    ));
}

#[test]
fn test_playing_audio_is_never_idle() {
    let rig = rig(Duration::from_millis(300));
    let cache = &rig.cache;
    let id = cache.load_audio(wav(1, frames_for(Duration::from_secs(10))));
    let audio = cache.get_audio(id).unwrap();
    cache.play(&audio, 80.0, true, None).unwrap();

    thread::sleep(Duration::from_millis(1200));
    assert_eq!(cache.stats().audio.live, 1);
    assert!(audio.is_playing());
    assert!(!audio.is_released());

    cache.stop(&audio);
    assert!(wait_for(Duration::from_secs(3), || cache.stats().audio.live == 0));
    assert!(audio.is_released());
}

#[test]
fn test_playing_stream_is_never_idle() {
    let rig = rig(Duration::from_millis(300));
    let cache = &rig.cache;
    let sound = cache.get_sound(cache.load_sound(wav(1, 2000))).unwrap();
    cache.play_sound(&sound, 100.0, true, None).unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(1000) {
        cache.update_music_streams();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(cache.stats().sounds.live, 1);
    assert!(sound.is_playing());

    cache.stop_sound(&sound);
    assert!(wait_for(Duration::from_secs(3), || cache.stats().sounds.live == 0));
    assert!(sound.is_released());
}

#[test]
fn test_no_expiry_when_disabled() {
    let rig = rig(Duration::ZERO);
    let id = rig.cache.load_texture(png(1, 1), TextureFormat::Auto);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(rig.cache.stats().sweep, SweepState::Stopped);
    assert_eq!(rig.cache.sweep_now(), 0);
    assert!(rig.cache.get_texture(id).is_some());
}

/// Audio device that takes a long time to report a source as started
struct SlowStartDevice {
    inner: SoftwareAudioDevice,
    delay: Duration,
}

impl AudioDevice for SlowStartDevice {
    fn open(&self) -> DeviceResult<()> {
        self.inner.open()
    }

    fn create_context(&self) -> DeviceResult<()> {
        self.inner.create_context()
    }

    fn destroy_context(&self) {
        self.inner.destroy_context()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn create_buffer(
        &self,
        samples: &[i16],
        format: SampleFormat,
        sample_rate: u32,
    ) -> DeviceResult<u32> {
        self.inner.create_buffer(samples, format, sample_rate)
    }

    fn delete_buffer(&self, buffer: u32) -> DeviceResult<()> {
        self.inner.delete_buffer(buffer)
    }

    fn create_source(&self) -> DeviceResult<u32> {
        self.inner.create_source()
    }

    fn delete_source(&self, source: u32) -> DeviceResult<()> {
        self.inner.delete_source(source)
    }

    fn set_gain(&self, source: u32, gain: f32) -> DeviceResult<()> {
        self.inner.set_gain(source, gain)
    }

    fn set_looping(&self, source: u32, looping: bool) -> DeviceResult<()> {
        self.inner.set_looping(source, looping)
    }

    fn attach_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()> {
        self.inner.attach_buffer(source, buffer)
    }

    fn queue_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()> {
        self.inner.queue_buffer(source, buffer)
    }

    fn unqueue_processed(&self, source: u32) -> DeviceResult<Vec<u32>> {
        self.inner.unqueue_processed(source)
    }

    fn play(&self, source: u32) -> DeviceResult<()> {
        self.inner.play(source)
    }

    fn stop(&self, source: u32) -> DeviceResult<()> {
        self.inner.stop(source)
    }

    fn state(&self, source: u32) -> DeviceResult<SourceState> {
        self.inner.state(source)
    }

    fn offset(&self, source: u32) -> DeviceResult<Duration> {
        self.inner.offset(source)
    }

    fn seek(&self, source: u32, position: Duration) -> DeviceResult<()> {
        self.inner.seek(source, position)
    }

    fn wait_until_playing(&self, source: u32, timeout: Duration) -> DeviceResult<bool> {
        thread::sleep(self.delay);
        self.inner.wait_until_playing(source, timeout)
    }
}

#[test]
fn test_slow_playback_start_does_not_stall_lookups() {
    let device = Arc::new(SlowStartDevice {
        inner: SoftwareAudioDevice::new(),
        delay: Duration::from_millis(800),
    });
    let cache = CacheManager::builder()
        .config(config(Duration::from_millis(300)))
        .audio_device(device)
        .build()
        .unwrap();
    let texture = cache.load_texture(png(2, 2), TextureFormat::Auto);
    let audio = cache
        .get_audio(cache.load_audio(wav(1, frames_for(Duration::from_secs(5)))))
        .unwrap();

    // The clip goes idle while `play` is still waiting on the device
    let mut worst = Duration::ZERO;
    let played = thread::scope(|scope| {
        let player = scope.spawn(|| cache.play(&audio, 100.0, false, None));
        while !player.is_finished() {
            let started = Instant::now();
            assert!(cache.get_texture(texture).is_some());
            worst = worst.max(started.elapsed());
            thread::sleep(Duration::from_millis(5));
        }
        player.join().unwrap()
    });

    assert!(played.is_ok());
    assert!(worst < Duration::from_millis(150), "lookup blocked for {worst:?}");
    assert!(audio.is_playing());
    assert!(!audio.is_released());
    assert_eq!(cache.stats().audio.live, 1);
}
