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

//! Error types

use std::fmt;

use crate::assets::{AssetId, AssetKind};
use crate::device::DeviceError;

/// Cache error type
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Asset payload could not be decoded
    DecodeFailed { kind: AssetKind, reason: String },

    /// IO error (file operations, etc.)
    IoError(String),

    /// A device context required by the operation is not available
    ContextUnavailable(&'static str),

    /// Device-level failure
    Device(DeviceError),

    /// `play()` on a handle that already has an active session
    AlreadyPlaying(AssetId),

    /// The handle was reclaimed by the sweep engine or by `close()`
    Released(AssetId),

    /// No live asset with this id
    NotFound(AssetId),

    /// The device never reported the source as playing
    StartTimeout(AssetId),

    /// The manager has been closed
    Closed,

    /// Configuration rejected at construction
    InvalidConfig(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::DecodeFailed { kind, reason } => {
                write!(f, "Failed to decode {kind}: {reason}")
            }
            CacheError::IoError(msg) => write!(f, "IO error: {msg}"),
            CacheError::ContextUnavailable(what) => write!(f, "{what} context is not available"),
            CacheError::Device(err) => write!(f, "Device error: {err}"),
            CacheError::AlreadyPlaying(id) => write!(f, "Asset {id} is already playing"),
            CacheError::Released(id) => write!(f, "Asset {id} has been released"),
            CacheError::NotFound(id) => write!(f, "Asset not found: {id}"),
            CacheError::StartTimeout(id) => write!(f, "Playback of asset {id} never started"),
            CacheError::Closed => write!(f, "Cache manager is closed"),
            CacheError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

impl From<DeviceError> for CacheError {
    fn from(err: DeviceError) -> Self {
        CacheError::Device(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::InvalidConfig(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;
