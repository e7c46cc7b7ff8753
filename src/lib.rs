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

//! Asset Cache - cross-thread resource cache for textures, fonts and audio
//!
//! One [`CacheManager`] owns every loaded asset, reclaims idle device
//! resources from a background sweep, watches playback for natural
//! completion, and shuts all of it down in a fixed order on [`CacheManager::close`].
//!
//! ```
//! use asset_cache::prelude::*;
//!
//! let cache = CacheManager::new(0).unwrap();
//! let id = cache.load_texture("missing.png", TextureFormat::Auto);
//! assert_eq!(id, AssetId::INVALID);
//! assert!(cache.get_texture(id).is_none());
//! ```

pub mod assets;
pub mod audio;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod prelude;
#[cfg(feature = "profiling")]
pub mod profiling;

pub use assets::{
    Asset, AssetId, AssetKind, AssetSource, Audio, Font, StreamingSound, Texture, TextureFormat,
};
pub use audio::{AudioCallback, SoundCallback};
pub use cache::{CacheManager, CacheManagerBuilder, CacheStats, SweepState};
pub use config::{CacheConfig, LogConfig};
pub use device::{AudioDevice, DeviceError, GraphicsDevice, HeadlessGraphics, SoftwareAudioDevice};
pub use error::{CacheError, Result};
