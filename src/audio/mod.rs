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

// Audio Module
//
// Playback on top of the AudioDevice collaborator:
// - Shared context established lazily on first audio use
// - One playback session per handle, started synchronously
// - Completion detected by the monitor thread
// - Streaming sounds fed chunk by chunk from the frame loop

pub mod monitor;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::assets::audio::{release_source, Playback};
use crate::assets::loader::StreamDecoder;
use crate::assets::sound::Stream;
use crate::assets::{Asset, AssetKind, Audio, StreamingSound};
use crate::config::CacheConfig;
use crate::device::{acquire_default_audio, release_default_audio, AudioDevice, DeviceError};
use crate::error::{CacheError, Result};

pub use monitor::{AudioCallback, SoundCallback};
pub use stream::STREAM_BUFFERS;

use monitor::{PlaybackMonitor, Watch};

/// Map a 0..=100 volume to device gain
pub fn volume_to_gain(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 100.0) / 100.0
}

struct Context {
    device: Option<Arc<dyn AudioDevice>>,
    /// `device` is the process-wide default, released by user count
    shared: bool,
    /// Set once released; the context is never re-established afterwards
    closed: bool,
}

/// Audio context owner and playback driver
pub(crate) struct AudioEngine {
    preferred: Option<Arc<dyn AudioDevice>>,
    context: Mutex<Context>,
    monitor: PlaybackMonitor,
    start_timeout: Duration,
    chunk_frames: usize,
}

impl AudioEngine {
    pub(crate) fn new(preferred: Option<Arc<dyn AudioDevice>>, config: &CacheConfig) -> Self {
        Self {
            preferred,
            context: Mutex::new(Context {
                device: None,
                shared: false,
                closed: false,
            }),
            monitor: PlaybackMonitor::new(config.monitor_poll),
            start_timeout: config.start_timeout,
            chunk_frames: config.stream_chunk_frames,
        }
    }

    /// The device with a live context, opening it on first use
    pub(crate) fn ensure_context(&self) -> Result<Arc<dyn AudioDevice>> {
        let mut context = self.context.lock();
        if context.closed {
            return Err(CacheError::Closed);
        }
        if let Some(device) = context.device.as_ref() {
            return Ok(device.clone());
        }
        let device = match self.preferred.clone() {
            Some(device) => {
                device.open()?;
                if let Err(err) = device.create_context() {
                    device.close();
                    return Err(err.into());
                }
                device
            }
            None => {
                let device = acquire_default_audio()?;
                context.shared = true;
                device
            }
        };
        tracing::info!(shared = context.shared, "audio context established");
        context.device = Some(device.clone());
        Ok(device)
    }

    /// The established device, if any
    pub(crate) fn current(&self) -> Option<Arc<dyn AudioDevice>> {
        self.context.lock().device.clone()
    }

    pub(crate) fn stop_monitor(&self) {
        self.monitor.shutdown();
    }

    /// Destroy the context and close the device, if this engine opened them.
    /// A shared default device is only torn down by its last user.
    pub(crate) fn release_context(&self) {
        let (device, shared) = {
            let mut context = self.context.lock();
            context.closed = true;
            (context.device.take(), context.shared)
        };
        if let Some(device) = device {
            if shared {
                release_default_audio();
            } else {
                device.destroy_context();
                device.close();
            }
            tracing::info!(shared, "audio context released");
        }
    }

    pub(crate) fn play(
        &self,
        audio: &Arc<Audio>,
        volume: f32,
        looping: bool,
        callback: Option<AudioCallback>,
    ) -> Result<()> {
        let device = self.ensure_context()?;
        let session = {
            let mut playback = audio.playback();
            if playback.released {
                return Err(CacheError::Released(audio.id()));
            }
            if playback.playing {
                tracing::warn!(id = %audio.id(), "audio is already playing");
                return Err(CacheError::AlreadyPlaying(audio.id()));
            }
            // Visible to the sweep while the device start below is pending
            playback.busy.set(true);
            if let Err(err) = self.start_audio(&*device, audio, &mut playback, volume, looping) {
                playback.busy.set(false);
                return Err(err);
            }
            playback.begin_session(looping);
            playback.session
        };
        tracing::debug!(id = %audio.id(), volume, looping, "audio playing");

        let watch = Watch::Audio {
            handle: audio.clone(),
            session,
            device,
            callback,
        };
        if let Err(err) = self.monitor.watch(watch) {
            self.stop(audio);
            return Err(err);
        }
        Ok(())
    }

    fn start_audio(
        &self,
        device: &dyn AudioDevice,
        audio: &Audio,
        playback: &mut Playback,
        volume: f32,
        looping: bool,
    ) -> Result<()> {
        if playback.buffer == 0 {
            playback.buffer =
                device.create_buffer(&playback.samples, audio.format(), audio.sample_rate())?;
        }
        if playback.source == 0 {
            let source = acquire_source(device, audio)?;
            if let Err(err) = device.attach_buffer(source, playback.buffer) {
                release_source(device, audio.id(), source);
                return Err(err.into());
            }
            playback.source = source;
        }

        let source = playback.source;
        device.set_gain(source, volume_to_gain(volume))?;
        device.set_looping(source, looping)?;
        device.play(source)?;
        if !device.wait_until_playing(source, self.start_timeout)? {
            if let Err(err) = device.stop(source) {
                tracing::warn!(id = %audio.id(), %err, "failed to stop stalled source");
            }
            return Err(CacheError::StartTimeout(audio.id()));
        }
        Ok(())
    }

    /// Returns whether a session was stopped
    pub(crate) fn stop(&self, audio: &Audio) -> bool {
        let mut playback = audio.playback();
        if !playback.playing {
            return false;
        }
        if let Some(device) = self.current() {
            if let Err(err) = device.stop(playback.source) {
                tracing::warn!(id = %audio.id(), %err, "failed to stop source");
            }
        }
        playback.end_session();
        tracing::debug!(id = %audio.id(), "audio stopped");
        true
    }

    pub(crate) fn seek(&self, audio: &Audio, position: Duration) -> Result<()> {
        let playback = audio.playback();
        if playback.released {
            return Err(CacheError::Released(audio.id()));
        }
        if playback.source == 0 {
            tracing::debug!(id = %audio.id(), "seek before first play ignored");
            return Ok(());
        }
        let device = self
            .current()
            .ok_or(CacheError::ContextUnavailable("audio"))?;
        device.seek(playback.source, position.min(audio.duration()))?;
        Ok(())
    }

    pub(crate) fn time(&self, audio: &Audio) -> Duration {
        let playback = audio.playback();
        if !playback.playing {
            return Duration::ZERO;
        }
        self.current()
            .and_then(|device| device.offset(playback.source).ok())
            .unwrap_or_default()
    }

    pub(crate) fn play_sound(
        &self,
        sound: &Arc<StreamingSound>,
        volume: f32,
        looping: bool,
        callback: Option<SoundCallback>,
    ) -> Result<()> {
        let device = self.ensure_context()?;
        let session = {
            let mut stream = sound.stream();
            if stream.released {
                return Err(CacheError::Released(sound.id()));
            }
            if stream.playing {
                tracing::warn!(id = %sound.id(), "sound is already playing");
                return Err(CacheError::AlreadyPlaying(sound.id()));
            }
            stream.busy.set(true);
            if let Err(err) = self.start_stream(&*device, sound, &mut stream, volume, looping) {
                stream.decoder = None;
                stream.busy.set(false);
                return Err(err);
            }
            stream.begin_session();
            stream.session
        };
        tracing::debug!(id = %sound.id(), volume, looping, "stream playing");

        let watch = Watch::Sound {
            handle: sound.clone(),
            session,
            device,
            callback,
        };
        if let Err(err) = self.monitor.watch(watch) {
            self.stop_sound(sound);
            return Err(err);
        }
        Ok(())
    }

    fn start_stream(
        &self,
        device: &dyn AudioDevice,
        sound: &StreamingSound,
        stream: &mut Stream,
        volume: f32,
        looping: bool,
    ) -> Result<()> {
        let decoder = StreamDecoder::open(sound.origin())?;
        if stream.source == 0 {
            stream.source = acquire_source(device, sound)?;
        }
        let source = stream.source;

        stream::recycle_all(device, sound, stream);
        stream.decoder = Some(decoder);
        stream.chunks_loaded = 0;
        stream.looping = looping;
        stream::fill(device, sound, stream, self.chunk_frames)?;
        if stream.queued.is_empty() {
            return Err(CacheError::DecodeFailed {
                kind: AssetKind::Sound,
                reason: "stream holds no samples".to_string(),
            });
        }

        device.set_gain(source, volume_to_gain(volume))?;
        device.set_looping(source, false)?;
        device.play(source)?;
        if !device.wait_until_playing(source, self.start_timeout)? {
            stream::recycle_all(device, sound, stream);
            return Err(CacheError::StartTimeout(sound.id()));
        }
        Ok(())
    }

    pub(crate) fn stop_sound(&self, sound: &StreamingSound) -> bool {
        let mut stream = sound.stream();
        if !stream.playing {
            return false;
        }
        if let Some(device) = self.current() {
            if let Err(err) = device.stop(stream.source) {
                tracing::warn!(id = %sound.id(), %err, "failed to stop stream source");
            }
        }
        stream.end_session();
        tracing::debug!(id = %sound.id(), "stream stopped");
        true
    }

    pub(crate) fn update_stream(&self, sound: &StreamingSound) {
        if let Some(device) = self.current() {
            stream::update(&*device, sound, self.chunk_frames);
        }
    }
}

fn acquire_source<T: Asset>(device: &dyn AudioDevice, asset: &T) -> Result<u32> {
    device.create_source().map_err(|err| {
        if err == DeviceError::SourcesExhausted {
            tracing::warn!(id = %asset.id(), "no free playback source, playback skipped");
        }
        CacheError::from(err)
    })
}
