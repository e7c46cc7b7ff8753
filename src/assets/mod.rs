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

// Asset Module
//
// Resource handles for every kind the cache owns:
// - Textures (host pixels + lazily created device texture)
// - Fonts (glyph bake table + atlas texture)
// - Audio (decoded samples + device buffer/source)
// - Streaming sounds (decoder cursor + queued device buffers)

pub mod audio;
pub mod cache;
pub mod font;
pub mod loader;
pub mod sound;
pub mod texture;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::{AudioDevice, GraphicsDevice};

pub use audio::{Audio, AudioData};
pub use cache::{CacheTable, TableStats};
pub use font::{BakedGlyph, Font, FontData, FontSettings};
pub use loader::{AssetLoader, AudioLoader, FontLoader, LoadContext, SoundLoader, TextureLoader};
pub use sound::{SoundInfo, StreamingSound};
pub use texture::{Texture, TextureData, TextureFormat};

/// Opaque asset identifier.
///
/// Allocated from one counter shared by every kind, so an id handed to the
/// wrong getter simply misses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(u64);

impl AssetId {
    /// Returned by `load_*` when the load failed
    pub const INVALID: AssetId = AssetId(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u64::MAX
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#invalid")
        }
    }
}

/// The four cached kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Texture,
    Font,
    Audio,
    Sound,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Texture => "texture",
            AssetKind::Font => "font",
            AssetKind::Audio => "audio",
            AssetKind::Sound => "sound",
        };
        f.write_str(name)
    }
}

/// Where an asset's encoded bytes come from
#[derive(Clone, Debug)]
pub enum AssetSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl AssetSource {
    /// Human-readable origin for log lines
    pub fn describe(&self) -> String {
        match self {
            AssetSource::Path(path) => path.display().to_string(),
            AssetSource::Bytes(bytes) => format!("[memory, {} bytes]", bytes.len()),
        }
    }
}

impl From<&str> for AssetSource {
    fn from(path: &str) -> Self {
        AssetSource::Path(PathBuf::from(path))
    }
}

impl From<&Path> for AssetSource {
    fn from(path: &Path) -> Self {
        AssetSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for AssetSource {
    fn from(path: PathBuf) -> Self {
        AssetSource::Path(path)
    }
}

impl From<Vec<u8>> for AssetSource {
    fn from(bytes: Vec<u8>) -> Self {
        AssetSource::Bytes(bytes.into())
    }
}

impl From<&[u8]> for AssetSource {
    fn from(bytes: &[u8]) -> Self {
        AssetSource::Bytes(bytes.into())
    }
}

/// Devices available while reclaiming an asset
/// Playback activity readable without the handle's lock.
///
/// Raised while a session starts or runs. The sweep reads it under the cache
/// mutex, where waiting on a playback lock would stall every lookup.
#[derive(Clone, Default)]
pub(crate) struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub(crate) fn set(&self, busy: bool) {
        self.0.store(busy, Ordering::Release);
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct ReclaimContext<'a> {
    pub graphics: &'a dyn GraphicsDevice,
    /// `None` until the audio context has been established
    pub audio: Option<&'a dyn AudioDevice>,
    /// Shutdown teardown: stop live playback instead of skipping it
    pub force: bool,
}

/// Outcome of [`Asset::reclaim`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reclaim {
    /// Device resources released, payload dropped
    Released,
    /// Asset became busy after it was selected; it stays cached
    Busy,
}

/// A cached resource handle
pub trait Asset: Send + Sync + 'static {
    const KIND: AssetKind;

    fn id(&self) -> AssetId;

    /// Busy assets are never treated as idle (live playback)
    fn is_busy(&self) -> bool {
        false
    }

    /// Release the device handle, then the host payload.
    ///
    /// Device errors are logged, never propagated: teardown always finishes.
    fn reclaim(&self, ctx: &ReclaimContext<'_>) -> Reclaim;

    /// Approximate host memory held by the payload
    fn memory_size(&self) -> usize;
}
