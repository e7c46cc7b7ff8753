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

//! Native device collaborators.
//!
//! The cache never talks to a graphics or audio API directly. It consumes
//! these two traits, which the windowing/renderer layer implements on top of
//! its real backend. Device handles are plain `u32` names where `0` means
//! "not created".
//!
//! Both traits are `Send + Sync` because the sweep engine and the playback
//! monitor call into them from their own threads. A backend whose API is
//! bound to one thread must marshal those calls itself.

pub mod headless;

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use headless::{HeadlessGraphics, SoftwareAudioDevice};

/// Device-level error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No device could be opened
    Unavailable,
    /// Device opened but a context could not be created
    ContextFailed(String),
    /// Every playback source is in use
    SourcesExhausted,
    /// Handle does not name a live device object
    InvalidHandle(u32),
    /// Anything else reported by the backend
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable => write!(f, "device unavailable"),
            DeviceError::ContextFailed(msg) => write!(f, "context creation failed: {msg}"),
            DeviceError::SourcesExhausted => write!(f, "playback sources exhausted"),
            DeviceError::InvalidHandle(id) => write!(f, "invalid device handle {id}"),
            DeviceError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Pixel upload for [`GraphicsDevice::create_texture`]
#[derive(Clone, Copy, Debug)]
pub struct TextureUpload<'a> {
    pub width: u32,
    pub height: u32,
    /// 1..=4
    pub channels: u8,
    pub pixels: &'a [u8],
}

/// Graphics context collaborator
pub trait GraphicsDevice: Send + Sync {
    /// Whether the context is up and accepts resource creation
    fn is_initialized(&self) -> bool;

    /// Create a device texture from tightly packed pixels
    fn create_texture(&self, upload: TextureUpload<'_>) -> DeviceResult<u32>;

    /// Destroy a device texture
    fn delete_texture(&self, id: u32) -> DeviceResult<()>;
}

/// Sample layout of a device buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Mono16,
    Stereo16,
}

impl SampleFormat {
    pub fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(SampleFormat::Mono16),
            2 => Some(SampleFormat::Stereo16),
            _ => None,
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            SampleFormat::Mono16 => 1,
            SampleFormat::Stereo16 => 2,
        }
    }
}

/// Playback state of a device source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Audio device collaborator
pub trait AudioDevice: Send + Sync {
    /// Open the device. Calling it on an open device is a no-op.
    fn open(&self) -> DeviceResult<()>;

    /// Create and make current the playback context
    fn create_context(&self) -> DeviceResult<()>;

    /// Detach and destroy the current context
    fn destroy_context(&self);

    /// Close the device
    fn close(&self);

    fn create_buffer(&self, samples: &[i16], format: SampleFormat, sample_rate: u32)
        -> DeviceResult<u32>;

    fn delete_buffer(&self, buffer: u32) -> DeviceResult<()>;

    /// Fails with [`DeviceError::SourcesExhausted`] when no source is free
    fn create_source(&self) -> DeviceResult<u32>;

    fn delete_source(&self, source: u32) -> DeviceResult<()>;

    /// `gain` in 0.0..=1.0
    fn set_gain(&self, source: u32, gain: f32) -> DeviceResult<()>;

    fn set_looping(&self, source: u32, looping: bool) -> DeviceResult<()>;

    /// Replace the source's queue with a single static buffer
    fn attach_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()>;

    /// Append a buffer to the source's streaming queue
    fn queue_buffer(&self, source: u32, buffer: u32) -> DeviceResult<()>;

    /// Remove and return buffers the source has finished playing
    fn unqueue_processed(&self, source: u32) -> DeviceResult<Vec<u32>>;

    fn play(&self, source: u32) -> DeviceResult<()>;

    fn stop(&self, source: u32) -> DeviceResult<()>;

    fn state(&self, source: u32) -> DeviceResult<SourceState>;

    /// Current play position within the queued data
    fn offset(&self, source: u32) -> DeviceResult<Duration>;

    fn seek(&self, source: u32, position: Duration) -> DeviceResult<()>;

    /// Block until `source` reports [`SourceState::Playing`] or `timeout` passes.
    ///
    /// The default is a bounded poll; backends with change notification
    /// should override it.
    fn wait_until_playing(&self, source: u32, timeout: Duration) -> DeviceResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state(source)? == SourceState::Playing {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(2)));
        }
    }
}

static DEFAULT_AUDIO: OnceLock<Arc<SoftwareAudioDevice>> = OnceLock::new();

/// Engines currently holding the default device's context
static DEFAULT_AUDIO_USERS: Mutex<usize> = parking_lot::const_mutex(0);

/// The process-wide default audio device.
///
/// Managers built without an explicit audio device share it. Use
/// [`acquire_default_audio`]/[`release_default_audio`] rather than opening
/// or closing it directly, so one manager's shutdown cannot tear down the
/// context under another.
pub fn default_audio_device() -> Arc<dyn AudioDevice> {
    DEFAULT_AUDIO
        .get_or_init(|| Arc::new(SoftwareAudioDevice::new()))
        .clone()
}

/// Join the default device. The first user opens it and creates the context.
pub(crate) fn acquire_default_audio() -> DeviceResult<Arc<dyn AudioDevice>> {
    let mut users = DEFAULT_AUDIO_USERS.lock();
    let device = default_audio_device();
    if *users == 0 {
        device.open()?;
        if let Err(err) = device.create_context() {
            device.close();
            return Err(err);
        }
    }
    *users += 1;
    tracing::debug!(users = *users, "default audio device acquired");
    Ok(device)
}

/// Leave the default device. The last user destroys the context and closes it.
pub(crate) fn release_default_audio() {
    let mut users = DEFAULT_AUDIO_USERS.lock();
    if *users == 0 {
        return;
    }
    *users -= 1;
    tracing::debug!(users = *users, "default audio device released");
    if *users == 0 {
        let device = default_audio_device();
        device.destroy_context();
        device.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_channels() {
        assert_eq!(SampleFormat::from_channels(1), Some(SampleFormat::Mono16));
        assert_eq!(SampleFormat::from_channels(2), Some(SampleFormat::Stereo16));
        assert_eq!(SampleFormat::from_channels(6), None);
        assert_eq!(SampleFormat::Stereo16.channels(), 2);
    }

    #[test]
    fn test_default_device_is_shared() {
        let a = default_audio_device();
        let b = default_audio_device();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_default_device_context_follows_last_user() {
        let first = acquire_default_audio().unwrap();
        let second = acquire_default_audio().unwrap();

        // One user leaves; the context stays up for the other
        release_default_audio();
        let source = second.create_source().unwrap();
        second.delete_source(source).unwrap();

        release_default_audio();
        assert_eq!(first.create_source(), Err(DeviceError::Unavailable));

        // A later user reopens it
        let third = acquire_default_audio().unwrap();
        let source = third.create_source().unwrap();
        third.delete_source(source).unwrap();
        release_default_audio();
    }
}
