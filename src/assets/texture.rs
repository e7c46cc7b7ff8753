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

use glam::UVec2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::assets::{Asset, AssetId, AssetKind, Reclaim, ReclaimContext};
use crate::device::{GraphicsDevice, TextureUpload};
use crate::error::{CacheError, Result};

/// Channel layout requested at load time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// Keep the channel count stored in the file
    #[default]
    Auto,
    Grey,
    GreyAlpha,
    Rgb,
    Rgba,
}

impl TextureFormat {
    /// Forced channel count, `None` for [`TextureFormat::Auto`]
    pub fn channels(self) -> Option<u8> {
        match self {
            TextureFormat::Auto => None,
            TextureFormat::Grey => Some(1),
            TextureFormat::GreyAlpha => Some(2),
            TextureFormat::Rgb => Some(3),
            TextureFormat::Rgba => Some(4),
        }
    }
}

/// Decoded texture payload
#[derive(Clone, Debug)]
pub struct TextureData {
    pub size: UVec2,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

struct TextureState {
    pixels: Option<Vec<u8>>,
    device: u32,
    released: bool,
}

/// Texture resource handle
pub struct Texture {
    id: AssetId,
    size: UVec2,
    channels: u8,
    state: Mutex<TextureState>,
}

impl Texture {
    pub(crate) fn new(id: AssetId, data: TextureData) -> Self {
        Self {
            id,
            size: data.size,
            channels: data.channels,
            state: Mutex::new(TextureState {
                pixels: Some(data.pixels),
                device: 0,
                released: false,
            }),
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.x
    }

    pub fn height(&self) -> u32 {
        self.size.y
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Device texture name, `0` until [`make_ready`](Self::make_ready)
    pub fn device_handle(&self) -> u32 {
        self.state.lock().device
    }

    pub fn is_ready(&self) -> bool {
        self.device_handle() != 0
    }

    /// Host pixels are present until the texture is realized or reclaimed
    pub fn has_pixels(&self) -> bool {
        self.state.lock().pixels.is_some()
    }

    /// Run `f` over the host pixels if they are still resident
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.state.lock().pixels.as_deref().map(f)
    }

    /// Realize the device texture. Host pixels are freed afterwards.
    ///
    /// Returns the existing handle on repeated calls. A reclaimed texture
    /// fails with [`CacheError::Released`].
    pub fn make_ready(&self, graphics: &dyn GraphicsDevice) -> Result<u32> {
        let mut state = self.state.lock();
        if state.released {
            return Err(CacheError::Released(self.id));
        }
        if state.device != 0 {
            return Ok(state.device);
        }
        let Some(pixels) = state.pixels.as_deref() else {
            return Ok(0);
        };
        let handle = graphics.create_texture(TextureUpload {
            width: self.size.x,
            height: self.size.y,
            channels: self.channels,
            pixels,
        })?;
        state.device = handle;
        state.pixels = None;
        tracing::trace!(id = %self.id, handle, "texture realized");
        Ok(handle)
    }
}

impl Asset for Texture {
    const KIND: AssetKind = AssetKind::Texture;

    fn id(&self) -> AssetId {
        self.id
    }

    fn reclaim(&self, ctx: &ReclaimContext<'_>) -> Reclaim {
        let mut state = self.state.lock();
        if state.device != 0 {
            if let Err(err) = ctx.graphics.delete_texture(state.device) {
                tracing::warn!(id = %self.id, handle = state.device, %err, "texture deletion failed");
            }
            state.device = 0;
        }
        state.pixels = None;
        state.released = true;
        Reclaim::Released
    }

    fn memory_size(&self) -> usize {
        self.state.lock().pixels.as_ref().map_or(0, Vec::len)
    }
}
