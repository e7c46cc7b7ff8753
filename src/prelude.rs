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

//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use asset_cache::prelude::*;
//! ```

pub use crate::assets::{
    Asset, AssetId, AssetKind, AssetSource, Audio, Font, FontSettings, StreamingSound, Texture,
    TextureFormat,
};
pub use crate::audio::{AudioCallback, SoundCallback};
pub use crate::cache::{CacheManager, CacheManagerBuilder, CacheStats, SweepState};
pub use crate::config::CacheConfig;
pub use crate::device::{
    AudioDevice, GraphicsDevice, HeadlessGraphics, SampleFormat, SoftwareAudioDevice, SourceState,
};
pub use crate::error::{CacheError, Result};
