//! Playback with completion callbacks and a streamed track
//!
//! Runs against the software audio device, so nothing is audible; the
//! point is the timing of callbacks and stream refills.

use asset_cache::prelude::*;
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const RATE: u32 = 22050;

fn tone(seconds: f32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).expect("wav header");
    let frames = (seconds * RATE as f32) as usize;
    for i in 0..frames {
        let phase = i as f32 * 440.0 * std::f32::consts::TAU / RATE as f32;
        let sample = (phase.sin() * i16::MAX as f32 * 0.5) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).expect("wav sample");
        }
    }
    writer.finalize().expect("wav finalize");
    bytes
}

fn main() -> asset_cache::Result<()> {
    println!("=== Playback Example ===");

    let cache = CacheManager::builder()
        .config(CacheConfig::never_expire())
        .audio_device(Arc::new(SoftwareAudioDevice::new()))
        .build()?;

    let clip = cache
        .get_audio(cache.load_audio(tone(0.5, 1)))
        .ok_or(CacheError::Closed)?;
    println!("Clip: {:?} at {} Hz", clip.duration(), clip.sample_rate());

    let (done_tx, done_rx) = mpsc::channel();
    let started = Instant::now();
    cache.play(
        &clip,
        80.0,
        false,
        Some(Box::new(move |audio: &Arc<Audio>| {
            let _ = done_tx.send((audio.id(), started.elapsed()));
        })),
    )?;

    if let Err(err) = cache.play(&clip, 80.0, false, None) {
        println!("Second play rejected: {err}");
    }
    thread::sleep(Duration::from_millis(100));
    println!("Position after 100ms: {:?}", cache.get_time(&clip));

    if let Ok((id, elapsed)) = done_rx.recv_timeout(Duration::from_secs(2)) {
        println!("Callback for {id} after {elapsed:?}");
    }

    let track = cache
        .get_sound(cache.load_sound(tone(1.0, 2)))
        .ok_or(CacheError::Closed)?;
    cache.play_sound(
        &track,
        60.0,
        false,
        Some(Box::new(|sound: &Arc<StreamingSound>| {
            println!("Stream finished after {} chunks", sound.chunks_loaded());
        })),
    )?;

    // Frame loop
    let deadline = Instant::now() + Duration::from_secs(3);
    while track.is_playing() && Instant::now() < deadline {
        cache.update_music_streams();
        thread::sleep(Duration::from_millis(16));
    }

    cache.close();
    println!("Closed");
    Ok(())
}
