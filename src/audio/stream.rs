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

use crate::assets::audio::release_buffer;
use crate::assets::loader::StreamDecoder;
use crate::assets::sound::Stream;
use crate::assets::{Asset, StreamingSound};
use crate::device::{AudioDevice, SourceState};
use crate::error::Result;

/// Device buffers kept queued per stream
pub const STREAM_BUFFERS: usize = 3;

/// Stop the source and delete every buffer left from a previous session
pub(crate) fn recycle_all(device: &dyn AudioDevice, sound: &StreamingSound, stream: &mut Stream) {
    if stream.source == 0 {
        return;
    }
    if let Err(err) = device.stop(stream.source) {
        tracing::warn!(id = %sound.id(), %err, "failed to stop stream source");
    }
    if let Err(err) = device.unqueue_processed(stream.source) {
        tracing::warn!(id = %sound.id(), %err, "failed to unqueue stream buffers");
    }
    for buffer in stream.queued.drain(..) {
        release_buffer(device, sound.id(), buffer);
    }
}

/// Decode and queue chunks until `STREAM_BUFFERS` are in flight or the
/// decoder closes. Looping streams rewind at end of file.
pub(crate) fn fill(
    device: &dyn AudioDevice,
    sound: &StreamingSound,
    stream: &mut Stream,
    frames: usize,
) -> Result<()> {
    let info = sound.info();
    let mut rewound = false;
    while stream.queued.len() < STREAM_BUFFERS {
        let Some(decoder) = stream.decoder.as_mut() else {
            break;
        };
        let chunk = decoder.next_chunk(frames)?;
        let full = chunk.len() == frames * decoder.channels();

        if !chunk.is_empty() {
            let buffer = device.create_buffer(&chunk, info.format, info.sample_rate)?;
            if let Err(err) = device.queue_buffer(stream.source, buffer) {
                release_buffer(device, sound.id(), buffer);
                return Err(err.into());
            }
            stream.queued.push(buffer);
            stream.chunks_loaded += 1;
        }
        if full {
            continue;
        }

        if stream.looping && !(chunk.is_empty() && rewound) {
            stream.decoder = Some(StreamDecoder::open(sound.origin())?);
            rewound = true;
        } else {
            tracing::trace!(id = %sound.id(), chunks = stream.chunks_loaded, "stream decoded to end");
            stream.decoder = None;
        }
    }
    Ok(())
}

/// One frame-loop tick for a playing stream
pub(crate) fn update(device: &dyn AudioDevice, sound: &StreamingSound, frames: usize) {
    let mut stream = sound.stream();
    if !stream.playing || stream.released || stream.source == 0 {
        return;
    }
    let source = stream.source;

    match device.unqueue_processed(source) {
        Ok(processed) => {
            for buffer in processed {
                stream.queued.retain(|queued| *queued != buffer);
                release_buffer(device, sound.id(), buffer);
            }
        }
        Err(err) => {
            tracing::warn!(id = %sound.id(), %err, "failed to unqueue stream buffers");
            return;
        }
    }

    if let Err(err) = fill(device, sound, &mut stream, frames) {
        tracing::error!(id = %sound.id(), %err, "stream decode failed, closing decoder");
        stream.decoder = None;
    }

    if stream.queued.is_empty() {
        return;
    }
    match device.state(source) {
        Ok(SourceState::Playing) => {}
        Ok(_) => {
            tracing::debug!(id = %sound.id(), "stream underran, resuming");
            if let Err(err) = device.play(source) {
                tracing::warn!(id = %sound.id(), %err, "failed to resume stream");
            }
        }
        Err(err) => tracing::warn!(id = %sound.id(), %err, "stream source query failed"),
    }
}
