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

use crate::assets::{Asset, AssetId, AssetKind, Reclaim, ReclaimContext};

/// First baked character (space)
pub const FIRST_GLYPH: char = ' ';
/// Number of baked characters (printable ASCII)
pub const GLYPH_COUNT: usize = 96;
/// Atlas dimensions used by the default font loader
pub const ATLAS_SIZE: UVec2 = UVec2::new(512, 512);

/// Font load settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FontSettings {
    /// Pixel height glyphs are baked at
    pub size: f32,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self { size: 16.0 }
    }
}

/// One baked glyph: where it lives in the atlas and how to place it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BakedGlyph {
    pub ch: char,
    /// Top-left corner in the atlas
    pub min: UVec2,
    /// Bottom-right corner in the atlas (exclusive)
    pub max: UVec2,
    /// Offset from the pen position to the glyph's top-left, y down
    pub offset: glam::Vec2,
    pub advance: f32,
}

/// Decoded font payload
#[derive(Clone, Debug)]
pub struct FontData {
    pub size: f32,
    pub atlas_size: UVec2,
    /// Single-channel coverage bitmap
    pub atlas: Vec<u8>,
    pub glyphs: Vec<BakedGlyph>,
    pub line_height: f32,
}

struct FontState {
    glyphs: Vec<BakedGlyph>,
    device: u32,
}

/// Font resource handle
pub struct Font {
    id: AssetId,
    size: f32,
    line_height: f32,
    atlas_size: UVec2,
    state: Mutex<FontState>,
}

impl Font {
    /// The atlas bitmap has already been uploaded as `device`
    pub(crate) fn new(id: AssetId, data: FontData, device: u32) -> Self {
        Self {
            id,
            size: data.size,
            line_height: data.line_height,
            atlas_size: data.atlas_size,
            state: Mutex::new(FontState {
                glyphs: data.glyphs,
                device,
            }),
        }
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    pub fn atlas_size(&self) -> UVec2 {
        self.atlas_size
    }

    /// Atlas texture name, `0` once reclaimed
    pub fn device_handle(&self) -> u32 {
        self.state.lock().device
    }

    pub fn glyph(&self, ch: char) -> Option<BakedGlyph> {
        let index = (ch as u32).checked_sub(FIRST_GLYPH as u32)? as usize;
        self.state.lock().glyphs.get(index).copied()
    }

    pub fn glyph_count(&self) -> usize {
        self.state.lock().glyphs.len()
    }

    /// Horizontal extent of `text` at the baked size
    pub fn measure(&self, text: &str) -> f32 {
        let state = self.state.lock();
        text.chars()
            .filter_map(|ch| {
                let index = (ch as u32).checked_sub(FIRST_GLYPH as u32)? as usize;
                state.glyphs.get(index)
            })
            .map(|glyph| glyph.advance)
            .sum()
    }
}

impl Asset for Font {
    const KIND: AssetKind = AssetKind::Font;

    fn id(&self) -> AssetId {
        self.id
    }

    fn reclaim(&self, ctx: &ReclaimContext<'_>) -> Reclaim {
        let mut state = self.state.lock();
        if state.device != 0 {
            if let Err(err) = ctx.graphics.delete_texture(state.device) {
                tracing::warn!(id = %self.id, handle = state.device, %err, "font atlas deletion failed");
            }
            state.device = 0;
        }
        state.glyphs = Vec::new();
        Reclaim::Released
    }

    fn memory_size(&self) -> usize {
        self.state.lock().glyphs.len() * std::mem::size_of::<BakedGlyph>()
    }
}
