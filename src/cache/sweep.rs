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

//! Idle-expiry sweep.
//!
//! Each tick works table by table in three phases: select expired entries
//! under the cache mutex, release their device resources with the mutex
//! dropped, then erase them under the mutex again. Selected entries are
//! marked retiring, so lookups between the phases already miss them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::assets::{Asset, AssetId, Audio, Font, Reclaim, ReclaimContext, StreamingSound, Texture};
use crate::cache::manager::{CacheTables, HasTable, Inner};
use crate::error::Result;

/// Lifecycle of the sweep thread
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Stopped,
    Running,
    StopRequested,
}

/// Shared run flag with a condvar so that stop requests cut sleeps short
pub(crate) struct SweepControl {
    state: Mutex<SweepState>,
    changed: Condvar,
}

impl SweepControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SweepState::Stopped),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> SweepState {
        *self.state.lock()
    }

    fn start(&self) {
        *self.state.lock() = SweepState::Running;
    }

    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock();
        if *state == SweepState::Running {
            *state = SweepState::StopRequested;
            self.changed.notify_all();
        }
    }

    /// Sleep for `duration`; returns `false` as soon as a stop is requested
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while *state == SweepState::Running {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == SweepState::Running
    }

    fn finish(&self) {
        *self.state.lock() = SweepState::Stopped;
        self.changed.notify_all();
    }
}

/// Marks the control stopped even if the loop unwinds
struct FinishGuard<'a>(&'a SweepControl);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Handle to a running sweep thread
pub(crate) struct SweepEngine {
    control: Arc<SweepControl>,
    thread: Option<JoinHandle<()>>,
}

impl SweepEngine {
    pub(crate) fn spawn(inner: Arc<Inner>) -> Result<Self> {
        let control = Arc::new(SweepControl::new());
        control.start();
        let worker_control = control.clone();
        let thread = thread::Builder::new()
            .name("asset-sweep".to_string())
            .spawn(move || run(&inner, &worker_control))?;
        Ok(Self {
            control,
            thread: Some(thread),
        })
    }

    pub(crate) fn state(&self) -> SweepState {
        self.control.state()
    }

    /// Request a stop and block until the thread has exited.
    ///
    /// A tick in progress completes its teardown first.
    pub(crate) fn stop(mut self) {
        self.control.request_stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("sweep thread panicked");
            }
        }
    }
}

fn run(inner: &Inner, control: &SweepControl) {
    let _finish = FinishGuard(control);
    let config = inner.config();
    tracing::info!(
        idle = ?config.idle_expiry,
        grace = ?config.grace_period,
        tick = ?config.sweep_tick,
        "sweep started"
    );

    if control.sleep(config.grace_period) {
        while control.sleep(config.sweep_tick) {
            tick(inner, Instant::now());
        }
    }
    tracing::info!("sweep stopped");
}

/// One pass over every table
pub(crate) fn tick(inner: &Inner, now: Instant) -> usize {
    sweep_table::<Texture>(inner, now)
        + sweep_table::<Font>(inner, now)
        + sweep_table::<Audio>(inner, now)
        + sweep_table::<StreamingSound>(inner, now)
}

fn sweep_table<T: Asset>(inner: &Inner, now: Instant) -> usize
where
    CacheTables: HasTable<T>,
{
    let idle = inner.config().idle_expiry;
    let expired = inner.with_table::<T, _, _>(|table| table.collect_expired(now, idle));
    if expired.is_empty() {
        return 0;
    }

    let audio = inner.audio().current();
    let ctx = ReclaimContext {
        graphics: inner.graphics(),
        audio: audio.as_deref(),
        force: false,
    };

    let mut released: SmallVec<[AssetId; 8]> = SmallVec::new();
    let mut busy: SmallVec<[AssetId; 8]> = SmallVec::new();
    for asset in &expired {
        match asset.reclaim(&ctx) {
            Reclaim::Released => {
                tracing::debug!(id = %asset.id(), kind = %T::KIND, "reclaimed idle asset");
                released.push(asset.id());
            }
            Reclaim::Busy => {
                tracing::debug!(id = %asset.id(), kind = %T::KIND, "asset became busy, kept");
                busy.push(asset.id());
            }
        }
    }

    inner.with_table::<T, _, _>(|table| {
        table.erase(&released);
        table.restore(&busy, Instant::now());
    });
    released.len()
}
