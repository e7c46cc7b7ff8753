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

use std::borrow::Cow;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};

use glam::{UVec2, Vec2};
use hound::WavReader;

use crate::assets::font::{ATLAS_SIZE, FIRST_GLYPH, GLYPH_COUNT};
use crate::assets::{
    AssetKind, AssetSource, AudioData, BakedGlyph, FontData, FontSettings, SoundInfo, TextureData,
    TextureFormat,
};
use crate::device::SampleFormat;
use crate::error::{CacheError, Result};

/// Context provided to asset loaders
pub struct LoadContext<'a> {
    pub source: &'a AssetSource,
}

impl<'a> LoadContext<'a> {
    pub fn new(source: &'a AssetSource) -> Self {
        Self { source }
    }

    /// Whole encoded payload; borrowed when the source is already in memory
    pub fn read_bytes(&self) -> Result<Cow<'a, [u8]>> {
        match self.source {
            AssetSource::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            AssetSource::Bytes(bytes) => Ok(Cow::Borrowed(&bytes[..])),
        }
    }
}

/// Trait for decoding an encoded payload.
///
/// Loaders run synchronously on the thread that called `load_*`.
pub trait AssetLoader: Send + Sync {
    type Output: Send;
    type Settings: Default + Send + Sync;

    fn load(&self, context: LoadContext<'_>, settings: &Self::Settings) -> Result<Self::Output>;
}

fn decode_error(kind: AssetKind, err: impl Display) -> CacheError {
    CacheError::DecodeFailed {
        kind,
        reason: err.to_string(),
    }
}

/// Image loader backed by the `image` crate
pub struct TextureLoader;

impl AssetLoader for TextureLoader {
    type Output = TextureData;
    type Settings = TextureFormat;

    fn load(&self, context: LoadContext<'_>, format: &TextureFormat) -> Result<TextureData> {
        let bytes = context.read_bytes()?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| decode_error(AssetKind::Texture, e))?;

        let channels = format
            .channels()
            .unwrap_or_else(|| image.color().channel_count().clamp(1, 4));

        let ((width, height), pixels) = match channels {
            1 => {
                let buffer = image.to_luma8();
                (buffer.dimensions(), buffer.into_raw())
            }
            2 => {
                let buffer = image.to_luma_alpha8();
                (buffer.dimensions(), buffer.into_raw())
            }
            3 => {
                let buffer = image.to_rgb8();
                (buffer.dimensions(), buffer.into_raw())
            }
            _ => {
                let buffer = image.to_rgba8();
                (buffer.dimensions(), buffer.into_raw())
            }
        };

        Ok(TextureData {
            size: UVec2::new(width, height),
            channels,
            pixels,
        })
    }
}

/// TrueType/OpenType loader backed by `fontdue`.
///
/// Bakes printable ASCII into a single-channel atlas.
pub struct FontLoader;

impl AssetLoader for FontLoader {
    type Output = FontData;
    type Settings = FontSettings;

    fn load(&self, context: LoadContext<'_>, settings: &FontSettings) -> Result<FontData> {
        if !(settings.size > 0.0) {
            return Err(decode_error(
                AssetKind::Font,
                format!("invalid pixel size {}", settings.size),
            ));
        }
        let bytes = context.read_bytes()?;
        let font = fontdue::Font::from_bytes(
            bytes.as_ref(),
            fontdue::FontSettings {
                scale: settings.size,
                ..fontdue::FontSettings::default()
            },
        )
        .map_err(|e| decode_error(AssetKind::Font, e))?;

        let (atlas, glyphs) = bake_atlas(&font, settings.size, ATLAS_SIZE)?;
        let line_height = font
            .horizontal_line_metrics(settings.size)
            .map(|m| m.ascent - m.descent + m.line_gap)
            .unwrap_or(settings.size);

        Ok(FontData {
            size: settings.size,
            atlas_size: ATLAS_SIZE,
            atlas,
            glyphs,
            line_height,
        })
    }
}

/// Shelf-pack the printable ASCII range, one pixel of padding per glyph
fn bake_atlas(
    font: &fontdue::Font,
    size: f32,
    atlas_size: UVec2,
) -> Result<(Vec<u8>, Vec<BakedGlyph>)> {
    let (atlas_w, atlas_h) = (atlas_size.x as usize, atlas_size.y as usize);
    let mut atlas = vec![0u8; atlas_w * atlas_h];
    let mut glyphs = Vec::with_capacity(GLYPH_COUNT);
    let (mut x, mut y, mut row_height) = (1usize, 1usize, 0usize);

    for code in 0..GLYPH_COUNT as u32 {
        let Some(ch) = char::from_u32(FIRST_GLYPH as u32 + code) else {
            continue;
        };
        let (metrics, bitmap) = font.rasterize(ch, size);
        let (w, h) = (metrics.width, metrics.height);

        if x + w + 1 >= atlas_w {
            y += row_height + 1;
            x = 1;
            row_height = 0;
        }
        if y + h + 1 >= atlas_h {
            return Err(decode_error(
                AssetKind::Font,
                format!("glyphs at {size}px do not fit a {atlas_w}x{atlas_h} atlas"),
            ));
        }

        for row in 0..h {
            let dst = (y + row) * atlas_w + x;
            atlas[dst..dst + w].copy_from_slice(&bitmap[row * w..(row + 1) * w]);
        }

        glyphs.push(BakedGlyph {
            ch,
            min: UVec2::new(x as u32, y as u32),
            max: UVec2::new((x + w) as u32, (y + h) as u32),
            offset: Vec2::new(metrics.xmin as f32, -(metrics.ymin as f32 + h as f32)),
            advance: metrics.advance_width,
        });

        x += w + 1;
        row_height = row_height.max(h);
    }

    Ok((atlas, glyphs))
}

type BoxedRead = Box<dyn Read + Send>;

fn open_wav(source: &AssetSource, kind: AssetKind) -> Result<WavReader<BoxedRead>> {
    let reader: BoxedRead = match source {
        AssetSource::Path(path) => Box::new(BufReader::new(File::open(path)?)),
        AssetSource::Bytes(bytes) => Box::new(Cursor::new(bytes.clone())),
    };
    WavReader::new(reader).map_err(|e| decode_error(kind, e))
}

fn wav_format(reader: &WavReader<BoxedRead>, kind: AssetKind) -> Result<SampleFormat> {
    let spec = reader.spec();
    SampleFormat::from_channels(spec.channels).ok_or_else(|| {
        decode_error(
            kind,
            format!("unsupported channel count {}", spec.channels),
        )
    })
}

/// Read up to `limit` interleaved samples, converted to i16
fn read_samples(reader: &mut WavReader<BoxedRead>, limit: usize, kind: AssetKind) -> Result<Vec<i16>> {
    let spec = reader.spec();
    let samples: std::result::Result<Vec<i16>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(limit)
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample as i32 - 16;
            reader
                .samples::<i32>()
                .take(limit)
                .map(|s| {
                    s.map(|v| {
                        if shift >= 0 {
                            (v >> shift) as i16
                        } else {
                            (v << -shift) as i16
                        }
                    })
                })
                .collect()
        }
    };
    samples.map_err(|e| decode_error(kind, e))
}

/// WAV loader backed by `hound`; decodes the whole stream up front
pub struct AudioLoader;

impl AssetLoader for AudioLoader {
    type Output = AudioData;
    type Settings = ();

    fn load(&self, context: LoadContext<'_>, _settings: &()) -> Result<AudioData> {
        let mut reader = open_wav(context.source, AssetKind::Audio)?;
        let format = wav_format(&reader, AssetKind::Audio)?;
        let sample_rate = reader.spec().sample_rate;
        let samples = read_samples(&mut reader, usize::MAX, AssetKind::Audio)?;
        Ok(AudioData {
            samples,
            sample_rate,
            format,
        })
    }
}

/// Reads a WAV header for streaming playback; samples stay on disk
pub struct SoundLoader;

impl AssetLoader for SoundLoader {
    type Output = SoundInfo;
    type Settings = ();

    fn load(&self, context: LoadContext<'_>, _settings: &()) -> Result<SoundInfo> {
        let reader = open_wav(context.source, AssetKind::Sound)?;
        let format = wav_format(&reader, AssetKind::Sound)?;
        Ok(SoundInfo {
            sample_rate: reader.spec().sample_rate,
            format,
            frames: reader.duration() as u64,
        })
    }
}

/// Chunked decoder cursor used by streaming playback
pub(crate) struct StreamDecoder {
    reader: WavReader<BoxedRead>,
    channels: usize,
}

impl StreamDecoder {
    pub(crate) fn open(source: &AssetSource) -> Result<Self> {
        let reader = open_wav(source, AssetKind::Sound)?;
        let channels = wav_format(&reader, AssetKind::Sound)?.channels() as usize;
        Ok(Self { reader, channels })
    }

    /// Decode up to `frames` frames; an empty chunk means end of stream
    pub(crate) fn next_chunk(&mut self, frames: usize) -> Result<Vec<i16>> {
        let mut samples = read_samples(&mut self.reader, frames * self.channels, AssetKind::Sound)?;
        samples.truncate(samples.len() - samples.len() % self.channels);
        Ok(samples)
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn wav_bytes(channels: u16, frames: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        let spec = WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for i in 0..frames * channels as usize {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
        bytes
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_texture_auto_keeps_channels() {
        let source = AssetSource::from(png_bytes(3, 2));
        let data = TextureLoader
            .load(LoadContext::new(&source), &TextureFormat::Auto)
            .unwrap();
        assert_eq!(data.size, UVec2::new(3, 2));
        assert_eq!(data.channels, 3);
        assert_eq!(data.pixels.len(), 18);
    }

    #[test]
    fn test_texture_forced_rgba() {
        let source = AssetSource::from(png_bytes(2, 2));
        let data = TextureLoader
            .load(LoadContext::new(&source), &TextureFormat::Rgba)
            .unwrap();
        assert_eq!(data.channels, 4);
        assert_eq!(&data.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_texture_garbage_is_decode_failure() {
        let source = AssetSource::from(vec![0u8, 1, 2, 3]);
        let result = TextureLoader.load(LoadContext::new(&source), &TextureFormat::Auto);
        assert!(matches!(
            result,
            Err(CacheError::DecodeFailed {
                kind: AssetKind::Texture,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = AssetSource::from("does/not/exist.png");
        let result = TextureLoader.load(LoadContext::new(&source), &TextureFormat::Auto);
        assert!(matches!(result, Err(CacheError::IoError(_))));
    }

    #[test]
    fn test_font_garbage_rejected() {
        let source = AssetSource::from(vec![7u8; 64]);
        let result = FontLoader.load(LoadContext::new(&source), &FontSettings::default());
        assert!(matches!(
            result,
            Err(CacheError::DecodeFailed {
                kind: AssetKind::Font,
                ..
            })
        ));
    }

    const DEJAVU_SANS: &[u8] = include_bytes!("../../tests/fixtures/DejaVuSans.ttf");

    fn bake(size: f32) -> Result<FontData> {
        let source = AssetSource::from(DEJAVU_SANS.to_vec());
        FontLoader.load(LoadContext::new(&source), &FontSettings { size })
    }

    #[test]
    fn test_font_bakes_printable_ascii() {
        for size in [8.0, 16.0, 64.0] {
            let data = bake(size).unwrap();
            assert_eq!(data.glyphs.len(), GLYPH_COUNT);
            assert_eq!(data.atlas_size, ATLAS_SIZE);
            assert_eq!(data.atlas.len(), (ATLAS_SIZE.x * ATLAS_SIZE.y) as usize);
            assert!(data.line_height >= size);
            for glyph in &data.glyphs {
                assert!(glyph.min.cmple(glyph.max).all(), "{:?}", glyph.ch);
                assert!(glyph.max.cmple(ATLAS_SIZE).all(), "{:?}", glyph.ch);
            }
        }
    }

    #[test]
    fn test_font_glyph_metrics() {
        let data = bake(16.0).unwrap();
        let glyph = |ch: char| data.glyphs[(ch as u32 - FIRST_GLYPH as u32) as usize];

        let space = glyph(' ');
        assert_eq!(space.ch, ' ');
        assert_eq!(space.min, space.max);
        assert!(space.advance > 0.0);

        let a = glyph('A');
        assert_eq!(a.ch, 'A');
        assert!(a.advance > 0.0);
        assert!(a.max.x > a.min.x && a.max.y > a.min.y);
        // Capitals sit above the baseline
        assert!(a.offset.y < 0.0);
        assert!(glyph('W').advance > glyph('i').advance);

        let covered = (a.min.y..a.max.y).any(|y| {
            let start = y as usize * ATLAS_SIZE.x as usize + a.min.x as usize;
            let end = start + (a.max.x - a.min.x) as usize;
            data.atlas[start..end].iter().any(|&px| px > 0)
        });
        assert!(covered);
    }

    #[test]
    fn test_font_too_large_for_atlas() {
        for size in [96.0, 128.0] {
            assert!(matches!(
                bake(size),
                Err(CacheError::DecodeFailed {
                    kind: AssetKind::Font,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_audio_decode_stereo() {
        let source = AssetSource::from(wav_bytes(2, 400));
        let data = AudioLoader.load(LoadContext::new(&source), &()).unwrap();
        assert_eq!(data.format, SampleFormat::Stereo16);
        assert_eq!(data.sample_rate, 8000);
        assert_eq!(data.frames(), 400);
    }

    #[test]
    fn test_sound_reads_header_only() {
        let source = AssetSource::from(wav_bytes(1, 1234));
        let info = SoundLoader.load(LoadContext::new(&source), &()).unwrap();
        assert_eq!(info.frames, 1234);
        assert_eq!(info.format, SampleFormat::Mono16);
    }

    #[test]
    fn test_stream_decoder_chunks_until_eof() {
        let source = AssetSource::from(wav_bytes(2, 250));
        let mut decoder = StreamDecoder::open(&source).unwrap();
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.next_chunk(100).unwrap().len(), 200);
        assert_eq!(decoder.next_chunk(100).unwrap().len(), 200);
        assert_eq!(decoder.next_chunk(100).unwrap().len(), 100);
        assert!(decoder.next_chunk(100).unwrap().is_empty());
    }
}
