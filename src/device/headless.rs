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

//! Headless device backends.
//!
//! [`HeadlessGraphics`] hands out texture names and remembers which are
//! alive. [`SoftwareAudioDevice`] models sources playing queued buffers
//! against the wall clock, which is enough to drive the playback monitor,
//! seeking and streaming without sound hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

use super::{
    AudioDevice, DeviceError, DeviceResult, GraphicsDevice, SampleFormat, SourceState,
    TextureUpload,
};

/// Graphics backend without a GPU
pub struct HeadlessGraphics {
    initialized: AtomicBool,
    next_id: AtomicU32,
    textures: Mutex<AHashMap<u32, usize>>,
}

impl HeadlessGraphics {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(true),
            next_id: AtomicU32::new(1),
            textures: Mutex::new(AHashMap::new()),
        }
    }

    /// A context that reports itself as not yet initialized
    pub fn uninitialized() -> Self {
        let graphics = Self::new();
        graphics.initialized.store(false, Ordering::Release);
        graphics
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::Release);
    }

    /// Number of textures created and not yet deleted
    pub fn live_textures(&self) -> usize {
        self.textures.lock().len()
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.textures.lock().contains_key(&id)
    }

    /// Bytes held by live textures
    pub fn memory_usage(&self) -> usize {
        self.textures.lock().values().sum()
    }
}

impl Default for HeadlessGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessGraphics {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn create_texture(&self, upload: TextureUpload<'_>) -> DeviceResult<u32> {
        if !self.is_initialized() {
            return Err(DeviceError::Unavailable);
        }
        let expected = upload.width as usize * upload.height as usize * upload.channels as usize;
        if upload.pixels.len() != expected {
            return Err(DeviceError::Backend(format!(
                "pixel buffer holds {} bytes, expected {expected}",
                upload.pixels.len()
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.textures.lock().insert(id, expected);
        Ok(id)
    }

    fn delete_texture(&self, id: u32) -> DeviceResult<()> {
        match self.textures.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(DeviceError::InvalidHandle(id)),
        }
    }
}

/// Default number of playback sources, matching common hardware mixers
pub const DEFAULT_MAX_SOURCES: usize = 32;

struct SimBuffer {
    duration: Duration,
}

struct SimSource {
    queue: VecDeque<u32>,
    looping: bool,
    gain: f32,
    state: SourceState,
    /// Position at `resumed_at`, or the frozen position when not playing
    position: Duration,
    resumed_at: Option<Instant>,
}

impl SimSource {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            looping: false,
            gain: 1.0,
            state: SourceState::Initial,
            position: Duration::ZERO,
            resumed_at: None,
        }
    }
}

#[derive(Default)]
struct AudioState {
    open: bool,
    context: bool,
    buffers: AHashMap<u32, SimBuffer>,
    sources: AHashMap<u32, SimSource>,
    next_buffer: u32,
    next_source: u32,
}

impl AudioState {
    fn queued(&self, source: &SimSource) -> Duration {
        source
            .queue
            .iter()
            .filter_map(|b| self.buffers.get(b))
            .map(|b| b.duration)
            .sum()
    }

    /// Advance a playing source to `now`, stopping it at the end of its queue
    fn advance(&mut self, id: u32, now: Instant) -> DeviceResult<Duration> {
        let total = {
            let source = self.sources.get(&id).ok_or(DeviceError::InvalidHandle(id))?;
            self.queued(source)
        };
        let source = self.sources.get_mut(&id).ok_or(DeviceError::InvalidHandle(id))?;
        if source.state != SourceState::Playing {
            return Ok(source.position);
        }
        let elapsed = source
            .resumed_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        let mut position = source.position + elapsed;
        if total.is_zero() {
            source.state = SourceState::Stopped;
            source.position = Duration::ZERO;
            source.resumed_at = None;
            return Ok(Duration::ZERO);
        }
        if source.looping {
            let nanos = position.as_nanos() % total.as_nanos();
            position = Duration::from_nanos(nanos as u64);
            source.position = position;
            source.resumed_at = Some(now);
        } else if position >= total {
            source.state = SourceState::Stopped;
            source.position = total;
            source.resumed_at = None;
            position = total;
        }
        Ok(position)
    }

    fn require_context(&self) -> DeviceResult<()> {
        if self.open && self.context {
            Ok(())
        } else {
            Err(DeviceError::Unavailable)
        }
    }
}

/// Audio backend that simulates playback against the wall clock
pub struct SoftwareAudioDevice {
    state: Mutex<AudioState>,
    started: Condvar,
    available: bool,
    max_sources: usize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    contexts_destroyed: AtomicUsize,
}

impl SoftwareAudioDevice {
    pub fn new() -> Self {
        Self::with_max_sources(DEFAULT_MAX_SOURCES)
    }

    pub fn with_max_sources(max_sources: usize) -> Self {
        Self {
            state: Mutex::new(AudioState {
                next_buffer: 1,
                next_source: 1,
                ..AudioState::default()
            }),
            started: Condvar::new(),
            available: true,
            max_sources,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            contexts_destroyed: AtomicUsize::new(0),
        }
    }

    /// A device that can never be opened
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn has_context(&self) -> bool {
        self.state.lock().context
    }

    pub fn live_sources(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Times the device went from closed to open
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    pub fn contexts_destroyed(&self) -> usize {
        self.contexts_destroyed.load(Ordering::Acquire)
    }

    pub fn gain(&self, source: u32) -> Option<f32> {
        self.state.lock().sources.get(&source).map(|s| s.gain)
    }

    pub fn is_looping(&self, source: u32) -> Option<bool> {
        self.state.lock().sources.get(&source).map(|s| s.looping)
    }

    pub fn queue_len(&self, source: u32) -> Option<usize> {
        self.state.lock().sources.get(&source).map(|s| s.queue.len())
    }
}

impl Default for SoftwareAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for SoftwareAudioDevice {
    fn open(&self) -> DeviceResult<()> {
        if !self.available {
            return Err(DeviceError::Unavailable);
        }
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            self.opens.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn create_context(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(DeviceError::ContextFailed("device is not open".to_string()));
        }
        state.context = true;
        Ok(())
    }

    fn destroy_context(&self) {
        let mut state = self.state.lock();
        if state.context {
            state.context = false;
            state.sources.clear();
            self.contexts_destroyed.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.buffers.clear();
            self.closes.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn create_buffer(
        &self,
        samples: &[i16],
        format: SampleFormat,
        sample_rate: u32,
    ) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        state.require_context()?;
        let channels = format.channels() as usize;
        if sample_rate == 0 || samples.len() % channels != 0 {
            return Err(DeviceError::Backend(format!(
                "{} samples do not form whole {format:?} frames at {sample_rate} Hz",
                samples.len()
            )));
        }
        let frames = samples.len() / channels;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate as f64);
        let id = state.next_buffer;
        state.next_buffer += 1;
        state.buffers.insert(id, SimBuffer { duration });
        Ok(id)
    }

    fn delete_buffer(&self, buffer: u32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.sources.values().any(|s| s.queue.contains(&buffer)) {
            return Err(DeviceError::Backend(format!(
                "buffer {buffer} is still queued on a source"
            )));
        }
        state
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(DeviceError::InvalidHandle(buffer))
    }

    fn create_source(&self) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        state.require_context()?;
        if state.sources.len() >= self.max_sources {
            return Err(DeviceError::SourcesExhausted);
        }
        let id = state.next_source;
        state.next_source += 1;
        state.sources.insert(id, SimSource::new());
        Ok(id)
    }

    fn delete_source(&self, source: u32) -> DeviceResult<()> {
        self.state
            .lock()
            .sources
            .remove(&source)
            .map(|_| ())
            .ok_or(DeviceError::InvalidHandle(source))
    }

    fn set_gain(&self, source: u32, gain: f32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.gain = gain.clamp(0.0, 1.0);
        Ok(())
    }

    fn set_looping(&self, source: u32, looping: bool) -> DeviceResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.advance(source, now)?;
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.looping = looping;
        Ok(())
    }

    fn attach_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.buffers.contains_key(&buffer) {
            return Err(DeviceError::InvalidHandle(buffer));
        }
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.queue.clear();
        src.queue.push_back(buffer);
        src.state = SourceState::Initial;
        src.position = Duration::ZERO;
        src.resumed_at = None;
        Ok(())
    }

    fn queue_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if !state.buffers.contains_key(&buffer) {
            return Err(DeviceError::InvalidHandle(buffer));
        }
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.queue.push_back(buffer);
        Ok(())
    }

    fn unqueue_processed(&self, source: u32) -> DeviceResult<Vec<u32>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut position = state.advance(source, now)?;
        let durations: Vec<(u32, Duration)> = {
            let src = state.sources.get(&source).ok_or(DeviceError::InvalidHandle(source))?;
            if src.looping {
                return Ok(Vec::new());
            }
            src.queue
                .iter()
                .map(|b| (*b, state.buffers.get(b).map(|b| b.duration).unwrap_or_default()))
                .collect()
        };

        let mut processed = Vec::new();
        for (buffer, duration) in durations {
            if duration > position {
                break;
            }
            position -= duration;
            processed.push(buffer);
        }

        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.queue.drain(..processed.len());
        src.position = position;
        if src.state == SourceState::Playing {
            src.resumed_at = Some(now);
        }
        Ok(processed)
    }

    fn play(&self, source: u32) -> DeviceResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.require_context()?;
        state.advance(source, now)?;
        let total = {
            let src = state.sources.get(&source).ok_or(DeviceError::InvalidHandle(source))?;
            state.queued(src)
        };
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        if src.state != SourceState::Paused || src.position >= total {
            src.position = Duration::ZERO;
        }
        src.state = SourceState::Playing;
        src.resumed_at = Some(now);
        self.started.notify_all();
        Ok(())
    }

    fn stop(&self, source: u32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let total = {
            let src = state.sources.get(&source).ok_or(DeviceError::InvalidHandle(source))?;
            state.queued(src)
        };
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.state = SourceState::Stopped;
        src.position = total;
        src.resumed_at = None;
        Ok(())
    }

    fn state(&self, source: u32) -> DeviceResult<SourceState> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.advance(source, now)?;
        state
            .sources
            .get(&source)
            .map(|s| s.state)
            .ok_or(DeviceError::InvalidHandle(source))
    }

    fn offset(&self, source: u32) -> DeviceResult<Duration> {
        let now = Instant::now();
        self.state.lock().advance(source, now)
    }

    fn seek(&self, source: u32, position: Duration) -> DeviceResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.advance(source, now)?;
        let total = {
            let src = state.sources.get(&source).ok_or(DeviceError::InvalidHandle(source))?;
            state.queued(src)
        };
        let src = state
            .sources
            .get_mut(&source)
            .ok_or(DeviceError::InvalidHandle(source))?;
        src.position = position.min(total);
        if src.state == SourceState::Playing {
            src.resumed_at = Some(now);
        }
        Ok(())
    }

    fn wait_until_playing(&self, source: u32, timeout: Duration) -> DeviceResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            state.advance(source, Instant::now())?;
            let current = state
                .sources
                .get(&source)
                .map(|s| s.state)
                .ok_or(DeviceError::InvalidHandle(source))?;
            if current == SourceState::Playing {
                return Ok(true);
            }
            if self.started.wait_until(&mut state, deadline).timed_out() {
                return Ok(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_device() -> SoftwareAudioDevice {
        let device = SoftwareAudioDevice::new();
        device.open().unwrap();
        device.create_context().unwrap();
        device
    }

    #[test]
    fn test_headless_texture_lifecycle() {
        let graphics = HeadlessGraphics::new();
        let pixels = vec![0u8; 4 * 4 * 4];
        let id = graphics
            .create_texture(TextureUpload {
                width: 4,
                height: 4,
                channels: 4,
                pixels: &pixels,
            })
            .unwrap();
        assert_ne!(id, 0);
        assert_eq!(graphics.live_textures(), 1);
        graphics.delete_texture(id).unwrap();
        assert_eq!(graphics.delete_texture(id), Err(DeviceError::InvalidHandle(id)));
    }

    #[test]
    fn test_uninitialized_graphics_rejects_uploads() {
        let graphics = HeadlessGraphics::uninitialized();
        let result = graphics.create_texture(TextureUpload {
            width: 1,
            height: 1,
            channels: 1,
            pixels: &[0],
        });
        assert_eq!(result, Err(DeviceError::Unavailable));
    }

    #[test]
    fn test_open_is_idempotent() {
        let device = SoftwareAudioDevice::new();
        device.open().unwrap();
        device.open().unwrap();
        assert_eq!(device.open_count(), 1);
    }

    #[test]
    fn test_sources_exhaust() {
        let device = SoftwareAudioDevice::with_max_sources(2);
        device.open().unwrap();
        device.create_context().unwrap();
        device.create_source().unwrap();
        device.create_source().unwrap();
        assert_eq!(device.create_source(), Err(DeviceError::SourcesExhausted));
    }

    #[test]
    fn test_playback_runs_to_end() {
        let device = ready_device();
        // 50 ms of mono audio at 1 kHz
        let buffer = device.create_buffer(&[0i16; 50], SampleFormat::Mono16, 1000).unwrap();
        let source = device.create_source().unwrap();
        device.attach_buffer(source, buffer).unwrap();
        device.play(source).unwrap();
        assert!(device.wait_until_playing(source, Duration::from_millis(10)).unwrap());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(device.state(source).unwrap(), SourceState::Stopped);
    }

    #[test]
    fn test_looping_never_stops() {
        let device = ready_device();
        let buffer = device.create_buffer(&[0i16; 20], SampleFormat::Mono16, 1000).unwrap();
        let source = device.create_source().unwrap();
        device.attach_buffer(source, buffer).unwrap();
        device.set_looping(source, true).unwrap();
        device.play(source).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(device.state(source).unwrap(), SourceState::Playing);
        assert!(device.offset(source).unwrap() < Duration::from_millis(20));
    }

    #[test]
    fn test_seek_moves_position() {
        let device = ready_device();
        let buffer = device.create_buffer(&[0i16; 2000], SampleFormat::Mono16, 1000).unwrap();
        let source = device.create_source().unwrap();
        device.attach_buffer(source, buffer).unwrap();
        device.play(source).unwrap();
        device.seek(source, Duration::from_millis(1500)).unwrap();
        assert!(device.offset(source).unwrap() >= Duration::from_millis(1500));
    }

    #[test]
    fn test_unqueue_processed_after_stop() {
        let device = ready_device();
        let a = device.create_buffer(&[0i16; 10], SampleFormat::Mono16, 1000).unwrap();
        let b = device.create_buffer(&[0i16; 10], SampleFormat::Mono16, 1000).unwrap();
        let source = device.create_source().unwrap();
        device.queue_buffer(source, a).unwrap();
        device.queue_buffer(source, b).unwrap();
        device.play(source).unwrap();
        device.stop(source).unwrap();
        assert_eq!(device.unqueue_processed(source).unwrap(), vec![a, b]);
        assert_eq!(device.queue_len(source), Some(0));
    }

    #[test]
    fn test_queued_buffer_cannot_be_deleted() {
        let device = ready_device();
        let buffer = device.create_buffer(&[0i16; 10], SampleFormat::Mono16, 1000).unwrap();
        let source = device.create_source().unwrap();
        device.attach_buffer(source, buffer).unwrap();
        assert!(device.delete_buffer(buffer).is_err());
        device.delete_source(source).unwrap();
        assert!(device.delete_buffer(buffer).is_ok());
    }

    #[test]
    fn test_context_teardown_counts() {
        let device = ready_device();
        device.destroy_context();
        device.close();
        device.close();
        assert_eq!(device.contexts_destroyed(), 1);
        assert_eq!(device.close_count(), 1);
        assert!(!device.is_open());
    }
}
