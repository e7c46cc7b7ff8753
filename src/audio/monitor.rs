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

//! Playback completion monitor.
//!
//! One worker thread watches every active session. Sessions arrive over a
//! channel, are polled at a fixed interval, and leave the set once their
//! session ends. Completion callbacks run on the worker, never on the thread
//! that called `play`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::assets::{Asset, Audio, StreamingSound};
use crate::device::{AudioDevice, SourceState};
use crate::error::{CacheError, Result};

/// Invoked once when a non-looping audio session reaches its natural end
pub type AudioCallback = Box<dyn FnOnce(&Arc<Audio>) + Send + 'static>;

/// Invoked once when a non-looping stream reaches its natural end
pub type SoundCallback = Box<dyn FnOnce(&Arc<StreamingSound>) + Send + 'static>;

/// One watched playback session
pub(crate) enum Watch {
    Audio {
        handle: Arc<Audio>,
        session: u64,
        device: Arc<dyn AudioDevice>,
        callback: Option<AudioCallback>,
    },
    Sound {
        handle: Arc<StreamingSound>,
        session: u64,
        device: Arc<dyn AudioDevice>,
        callback: Option<SoundCallback>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Poll {
    Pending,
    Done,
}

impl Watch {
    fn poll(&mut self) -> Poll {
        match self {
            Watch::Audio {
                handle,
                session,
                device,
                callback,
            } => {
                let mut playback = handle.playback();
                if playback.session != *session {
                    return Poll::Done;
                }
                let state = match device.state(playback.source) {
                    Ok(state) => state,
                    Err(err) => {
                        tracing::warn!(id = %handle.id(), %err, "lost playback source");
                        playback.end_session();
                        return Poll::Done;
                    }
                };
                if state == SourceState::Playing {
                    return Poll::Pending;
                }
                let looping = playback.looping;
                playback.end_session();
                drop(playback);

                if !looping {
                    if let Some(callback) = callback.take() {
                        run_callback(handle, callback);
                    }
                }
                Poll::Done
            }
            Watch::Sound {
                handle,
                session,
                device,
                callback,
            } => {
                let mut stream = handle.stream();
                if stream.session != *session {
                    return Poll::Done;
                }
                let state = match device.state(stream.source) {
                    Ok(state) => state,
                    Err(err) => {
                        tracing::warn!(id = %handle.id(), %err, "lost stream source");
                        stream.end_session();
                        return Poll::Done;
                    }
                };
                // An underrun with the decoder still open is resumed by
                // `update_music_streams`.
                if state == SourceState::Playing || stream.decoder.is_some() {
                    return Poll::Pending;
                }
                let looping = stream.looping;
                stream.end_session();
                drop(stream);

                if !looping {
                    if let Some(callback) = callback.take() {
                        run_callback(handle, callback);
                    }
                }
                Poll::Done
            }
        }
    }
}

fn run_callback<T: Asset>(handle: &Arc<T>, callback: Box<dyn FnOnce(&Arc<T>) + Send>) {
    tracing::debug!(id = %handle.id(), kind = %T::KIND, "playback finished");
    if catch_unwind(AssertUnwindSafe(|| callback(handle))).is_err() {
        tracing::error!(id = %handle.id(), "completion callback panicked");
    }
}

struct Worker {
    sender: Sender<Watch>,
    thread: JoinHandle<()>,
}

/// Owns the watcher thread. Started on the first watched session.
pub(crate) struct PlaybackMonitor {
    poll: Duration,
    worker: Mutex<Option<Worker>>,
    closed: Mutex<bool>,
}

impl PlaybackMonitor {
    pub(crate) fn new(poll: Duration) -> Self {
        Self {
            poll,
            worker: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    pub(crate) fn watch(&self, watch: Watch) -> Result<()> {
        let closed = self.closed.lock();
        if *closed {
            return Err(CacheError::Closed);
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            let (sender, receiver) = unbounded();
            let poll = self.poll;
            let thread = thread::Builder::new()
                .name("playback-monitor".to_string())
                .spawn(move || run(receiver, poll))?;
            tracing::debug!("playback monitor started");
            *worker = Some(Worker { sender, thread });
        }
        let Some(worker) = worker.as_ref() else {
            return Err(CacheError::Closed);
        };
        worker
            .sender
            .send(watch)
            .map_err(|_| CacheError::Closed)
    }

    /// Disconnect the channel and join the worker.
    ///
    /// Sessions still in flight are abandoned without callbacks. When called
    /// from a completion callback the worker is detached instead of joined.
    pub(crate) fn shutdown(&self) {
        *self.closed.lock() = true;
        let Some(Worker { sender, thread }) = self.worker.lock().take() else {
            return;
        };
        drop(sender);
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("playback monitor panicked");
        } else {
            tracing::debug!("playback monitor stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

fn run(receiver: Receiver<Watch>, poll: Duration) {
    let mut active: Vec<Watch> = Vec::new();
    loop {
        let next = if active.is_empty() {
            receiver.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            receiver.recv_timeout(poll)
        };
        match next {
            Ok(watch) => active.push(watch),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        active.retain_mut(|watch| watch.poll() == Poll::Pending);
    }
    if !active.is_empty() {
        tracing::debug!(abandoned = active.len(), "monitor exiting with live sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetId, AudioData};
    use crate::device::{SampleFormat, SoftwareAudioDevice};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn short_clip(device: &SoftwareAudioDevice) -> (Arc<Audio>, u32) {
        let audio = Arc::new(Audio::new(
            AssetId::new(1),
            "[memory]".to_string(),
            AudioData {
                samples: vec![0; 400],
                sample_rate: 8000,
                format: SampleFormat::Mono16,
            },
        ));
        let buffer = device
            .create_buffer(&audio.playback().samples, SampleFormat::Mono16, 8000)
            .unwrap();
        let source = device.create_source().unwrap();
        device.attach_buffer(source, buffer).unwrap();
        {
            let mut playback = audio.playback();
            playback.buffer = buffer;
            playback.source = source;
            playback.begin_session(false);
        }
        (audio, source)
    }

    #[test]
    fn test_monitor_fires_callback_once() {
        let device = Arc::new(SoftwareAudioDevice::new());
        device.open().unwrap();
        device.create_context().unwrap();
        let (audio, source) = short_clip(&device);
        device.play(source).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let monitor = PlaybackMonitor::new(Duration::from_millis(5));
        monitor
            .watch(Watch::Audio {
                handle: audio.clone(),
                session: 0,
                device: device.clone(),
                callback: Some(Box::new(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!audio.is_playing());
        monitor.shutdown();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_watch_after_shutdown_is_rejected() {
        let device = Arc::new(SoftwareAudioDevice::new());
        device.open().unwrap();
        device.create_context().unwrap();
        let (audio, _) = short_clip(&device);

        let monitor = PlaybackMonitor::new(Duration::from_millis(5));
        monitor.shutdown();
        let result = monitor.watch(Watch::Audio {
            handle: audio,
            session: 0,
            device,
            callback: None,
        });
        assert!(matches!(result, Err(CacheError::Closed)));
    }
}
