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

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::assets::{Asset, AssetId, AssetKind, BusyFlag, Reclaim, ReclaimContext};
use crate::device::{AudioDevice, SampleFormat};

/// Decoded audio payload, interleaved 16-bit samples
#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub format: SampleFormat,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels() as usize
    }
}

/// Playback fields guarded by the handle's own lock.
///
/// `session` is bumped whenever a session ends so that a watcher holding an
/// older value knows it lost ownership.
pub(crate) struct Playback {
    pub(crate) samples: Vec<i16>,
    pub(crate) buffer: u32,
    pub(crate) source: u32,
    pub(crate) playing: bool,
    pub(crate) looping: bool,
    pub(crate) session: u64,
    pub(crate) released: bool,
    pub(crate) busy: BusyFlag,
}

impl Playback {
    pub(crate) fn begin_session(&mut self, looping: bool) {
        self.playing = true;
        self.looping = looping;
        self.busy.set(true);
    }

    /// End the current session without touching the device
    pub(crate) fn end_session(&mut self) {
        self.playing = false;
        self.busy.set(false);
        self.session += 1;
    }
}

/// Audio resource handle
pub struct Audio {
    id: AssetId,
    origin: String,
    sample_rate: u32,
    format: SampleFormat,
    frames: usize,
    busy: BusyFlag,
    playback: Mutex<Playback>,
}

impl Audio {
    pub(crate) fn new(id: AssetId, origin: String, data: AudioData) -> Self {
        let frames = data.frames();
        let busy = BusyFlag::default();
        Self {
            id,
            origin,
            sample_rate: data.sample_rate,
            format: data.format,
            frames,
            busy: busy.clone(),
            playback: Mutex::new(Playback {
                samples: data.samples,
                buffer: 0,
                source: 0,
                playing: false,
                looping: false,
                session: 0,
                released: false,
                busy,
            }),
        }
    }

    pub(crate) fn playback(&self) -> MutexGuard<'_, Playback> {
        self.playback.lock()
    }

    /// File path or `[memory]`
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    pub fn is_playing(&self) -> bool {
        self.playback.lock().playing
    }

    pub fn is_released(&self) -> bool {
        self.playback.lock().released
    }

    /// Device buffer name, `0` until first play
    pub fn device_buffer(&self) -> u32 {
        self.playback.lock().buffer
    }

    pub fn device_source(&self) -> u32 {
        self.playback.lock().source
    }
}

pub(crate) fn release_source(audio: &dyn AudioDevice, id: AssetId, source: u32) {
    if let Err(err) = audio.stop(source) {
        tracing::warn!(%id, source, %err, "failed to stop source");
    }
    if let Err(err) = audio.delete_source(source) {
        tracing::warn!(%id, source, %err, "failed to delete source");
    }
}

pub(crate) fn release_buffer(audio: &dyn AudioDevice, id: AssetId, buffer: u32) {
    if let Err(err) = audio.delete_buffer(buffer) {
        tracing::warn!(%id, buffer, %err, "failed to delete buffer");
    }
}

impl Asset for Audio {
    const KIND: AssetKind = AssetKind::Audio;

    fn id(&self) -> AssetId {
        self.id
    }

    fn is_busy(&self) -> bool {
        self.busy.get()
    }

    fn reclaim(&self, ctx: &ReclaimContext<'_>) -> Reclaim {
        let mut playback = self.playback.lock();
        if playback.playing && !ctx.force {
            return Reclaim::Busy;
        }
        if let Some(audio) = ctx.audio {
            if playback.source != 0 {
                release_source(audio, self.id, playback.source);
            }
            if playback.buffer != 0 {
                release_buffer(audio, self.id, playback.buffer);
            }
        }
        playback.source = 0;
        playback.buffer = 0;
        playback.samples = Vec::new();
        playback.released = true;
        playback.end_session();
        Reclaim::Released
    }

    fn memory_size(&self) -> usize {
        self.playback.lock().samples.len() * std::mem::size_of::<i16>()
    }
}
