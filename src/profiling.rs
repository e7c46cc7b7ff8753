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

//! # Logging setup
//!
//! The cache logs through `tracing` unconditionally. Enable the `profiling`
//! feature to get a subscriber installer:
//!
//! ```toml
//! [dependencies]
//! asset_cache = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! use asset_cache::config::LogConfig;
//!
//! let _guard = asset_cache::profiling::init_logging(&LogConfig::default())?;
//! ```
//!
//! `RUST_LOG` overrides the configured filter. With a log directory set,
//! output goes to a daily rolling file through a non-blocking writer; keep
//! the returned guard alive until exit so buffered lines are flushed.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{CacheError, Result};

/// File name prefix for rolling log files
pub const LOG_FILE_PREFIX: &str = "asset_cache.log";

/// Install the global subscriber described by `config`
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| CacheError::InvalidConfig(format!("log filter: {e}")))?;

    let (writer, guard, ansi) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_names(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CacheError::InvalidConfig(format!("log subscriber: {e}")))?;
    Ok(guard)
}
