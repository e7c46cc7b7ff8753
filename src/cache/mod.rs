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

// Cache Module
//
// - CacheManager: id allocation, the four typed tables, loads and lookups
// - Sweep: background idle-expiry reclamation
// - close(): ordered shutdown of sweep, monitor, assets and audio context

pub mod manager;
pub mod sweep;

pub use manager::{CacheManager, CacheManagerBuilder, CacheStats};
pub use sweep::SweepState;
