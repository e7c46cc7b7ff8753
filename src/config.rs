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

//! Cache configuration.
//!
//! The only knob that changes runtime policy is [`CacheConfig::idle_expiry`];
//! the remaining fields tune timing and default to the values the engine
//! has always shipped with.
//!
//! ```
//! use asset_cache::config::CacheConfig;
//!
//! let config = CacheConfig::from_json(r#"{ "idle_expiry_secs": 30 }"#).unwrap();
//! assert_eq!(config.idle_expiry.as_secs(), 30);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Construction-time settings for a [`CacheManager`](crate::CacheManager)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Untouched assets older than this are reclaimed. Zero disables expiry.
    #[serde(rename = "idle_expiry_secs", with = "secs")]
    pub idle_expiry: Duration,
    /// Delay before the first sweep tick
    #[serde(rename = "grace_period_ms", with = "millis")]
    pub grace_period: Duration,
    /// Interval between sweep ticks
    #[serde(rename = "sweep_tick_ms", with = "millis")]
    pub sweep_tick: Duration,
    /// Interval at which the playback monitor polls device state
    #[serde(rename = "monitor_poll_ms", with = "millis")]
    pub monitor_poll: Duration,
    /// Upper bound on how long `play()` waits for the device to start
    #[serde(rename = "start_timeout_ms", with = "millis")]
    pub start_timeout: Duration,
    /// Frames decoded per streaming chunk
    pub stream_chunk_frames: usize,
    /// Logging setup consumed by `profiling::init_logging`
    pub logging: LogConfig,
}

impl CacheConfig {
    /// Config with the given idle expiry in whole seconds
    pub fn new(idle_expiry_secs: u64) -> Self {
        Self {
            idle_expiry: Duration::from_secs(idle_expiry_secs),
            ..Self::default()
        }
    }

    /// Config that never expires anything and never starts a sweep thread
    pub fn never_expire() -> Self {
        Self::new(0)
    }

    pub fn with_idle_expiry(mut self, idle: Duration) -> Self {
        self.idle_expiry = idle;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_sweep_tick(mut self, tick: Duration) -> Self {
        self.sweep_tick = tick;
        self
    }

    pub fn with_monitor_poll(mut self, poll: Duration) -> Self {
        self.monitor_poll = poll;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_stream_chunk_frames(mut self, frames: usize) -> Self {
        self.stream_chunk_frames = frames;
        self
    }

    /// Whether a sweep engine should be spawned at all
    pub fn expiry_enabled(&self) -> bool {
        !self.idle_expiry.is_zero()
    }

    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject values that would make background loops spin
    pub fn validate(&self) -> Result<()> {
        if self.expiry_enabled() && self.sweep_tick.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_tick must be non-zero when expiry is enabled".to_string(),
            ));
        }
        if self.monitor_poll.is_zero() {
            return Err(CacheError::InvalidConfig(
                "monitor_poll must be non-zero".to_string(),
            ));
        }
        if self.stream_chunk_frames == 0 {
            return Err(CacheError::InvalidConfig(
                "stream_chunk_frames must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::ZERO,
            grace_period: Duration::from_secs(3),
            sweep_tick: Duration::from_secs(1),
            monitor_poll: Duration::from_millis(16),
            start_timeout: Duration::from_secs(1),
            stream_chunk_frames: 1024,
            logging: LogConfig::default(),
        }
    }
}

/// Logging setup
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also write daily-rotated log files into this directory
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
