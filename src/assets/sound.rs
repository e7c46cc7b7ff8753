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

//! Streaming sounds decode on demand instead of holding every sample.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::assets::audio::{release_buffer, release_source};
use crate::assets::loader::StreamDecoder;
use crate::assets::{Asset, AssetId, AssetKind, AssetSource, BusyFlag, Reclaim, ReclaimContext};
use crate::device::SampleFormat;

/// Stream header captured at load time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoundInfo {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub frames: u64,
}

pub(crate) struct Stream {
    pub(crate) decoder: Option<StreamDecoder>,
    pub(crate) chunks_loaded: u64,
    pub(crate) source: u32,
    /// Buffers currently queued on `source`, oldest first
    pub(crate) queued: Vec<u32>,
    pub(crate) playing: bool,
    pub(crate) looping: bool,
    pub(crate) session: u64,
    pub(crate) released: bool,
    pub(crate) busy: BusyFlag,
}

impl Stream {
    pub(crate) fn begin_session(&mut self) {
        self.playing = true;
        self.busy.set(true);
    }

    pub(crate) fn end_session(&mut self) {
        self.playing = false;
        self.busy.set(false);
        self.decoder = None;
        self.session += 1;
    }
}

/// Streaming sound resource handle
pub struct StreamingSound {
    id: AssetId,
    origin: AssetSource,
    info: SoundInfo,
    busy: BusyFlag,
    stream: Mutex<Stream>,
}

impl StreamingSound {
    pub(crate) fn new(id: AssetId, origin: AssetSource, info: SoundInfo) -> Self {
        let busy = BusyFlag::default();
        Self {
            id,
            origin,
            info,
            busy: busy.clone(),
            stream: Mutex::new(Stream {
                decoder: None,
                chunks_loaded: 0,
                source: 0,
                queued: Vec::new(),
                playing: false,
                looping: false,
                session: 0,
                released: false,
                busy,
            }),
        }
    }

    pub(crate) fn stream(&self) -> MutexGuard<'_, Stream> {
        self.stream.lock()
    }

    pub fn origin(&self) -> &AssetSource {
        &self.origin
    }

    pub fn info(&self) -> SoundInfo {
        self.info
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.info.frames as f64 / self.info.sample_rate as f64)
    }

    pub fn is_playing(&self) -> bool {
        self.stream.lock().playing
    }

    /// Whether a decoder is open and more chunks will follow
    pub fn is_decoding(&self) -> bool {
        self.stream.lock().decoder.is_some()
    }

    /// Chunks decoded since the current session started
    pub fn chunks_loaded(&self) -> u64 {
        self.stream.lock().chunks_loaded
    }

    pub fn is_released(&self) -> bool {
        self.stream.lock().released
    }
}

impl Asset for StreamingSound {
    const KIND: AssetKind = AssetKind::Sound;

    fn id(&self) -> AssetId {
        self.id
    }

    fn is_busy(&self) -> bool {
        self.busy.get()
    }

    fn reclaim(&self, ctx: &ReclaimContext<'_>) -> Reclaim {
        let mut stream = self.stream.lock();
        if stream.playing && !ctx.force {
            return Reclaim::Busy;
        }
        if let Some(audio) = ctx.audio {
            if stream.source != 0 {
                release_source(audio, self.id, stream.source);
            }
            for buffer in stream.queued.drain(..) {
                release_buffer(audio, self.id, buffer);
            }
        }
        stream.source = 0;
        stream.queued.clear();
        stream.released = true;
        stream.end_session();
        Reclaim::Released
    }

    fn memory_size(&self) -> usize {
        match &self.origin {
            AssetSource::Bytes(bytes) => bytes.len(),
            AssetSource::Path(_) => 0,
        }
    }
}
