//! Lock-free audio recording to WAV files
//!
//! The audio thread pushes processed frames into an SPSC ring; a writer
//! thread drains the ring into a PCM-16 stereo WAV file. The push side
//! never blocks and never allocates: when the ring is full, frames are
//! dropped and counted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{error, info, warn};
use thiserror::Error;

use crate::audio::buffer::{AudioConsumer, AudioRingBuffer};

/// Ring capacity: 10 seconds of stereo at 48 kHz
const RING_CAPACITY: usize = 960_000;

/// Samples per disk write; large batches keep SD cards happy
const BATCH_SAMPLES: usize = 32_768;

/// Writer thread sleep while the ring is empty
const IDLE_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("failed to create recordings directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open WAV file: {0}")]
    OpenFile(String),
}

pub struct Recorder {
    recordings_dir: PathBuf,
    sample_rate: u32,

    recording: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,

    /// RT producer end; contended only around start/stop
    producer: Mutex<Option<crate::audio::buffer::AudioProducer>>,

    writer_thread: Mutex<Option<thread::JoinHandle<()>>>,
    current_path: Mutex<String>,
    start_time: Mutex<Option<Instant>>,
}

impl Recorder {
    pub fn new(recordings_dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            sample_rate,
            recording: Arc::new(AtomicBool::new(false)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            producer: Mutex::new(None),
            writer_thread: Mutex::new(None),
            current_path: Mutex::new(String::new()),
            start_time: Mutex::new(None),
        }
    }

    /// Start recording. Returns the full path of the WAV file.
    pub fn start(&self, filename: &str) -> Result<String, RecorderError> {
        if self.recording.load(Ordering::Acquire) {
            return Err(RecorderError::AlreadyRecording);
        }

        std::fs::create_dir_all(&self.recordings_dir).map_err(RecorderError::CreateDir)?;

        let mut name = if filename.is_empty() {
            chrono::Local::now()
                .format("recording-%Y-%m-%d-%H%M%S.wav")
                .to_string()
        } else {
            filename.to_string()
        };
        if !name.ends_with(".wav") {
            name.push_str(".wav");
        }
        let path = self.recordings_dir.join(&name);

        // Open the file up front so failures surface to the caller
        let spec = WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer =
            WavWriter::create(&path, spec).map_err(|e| RecorderError::OpenFile(e.to_string()))?;

        let ring = AudioRingBuffer::new(RING_CAPACITY);
        let (producer, consumer) = ring.split();

        self.dropped_frames.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.producer.lock() {
            *guard = Some(producer);
        }
        if let Ok(mut current) = self.current_path.lock() {
            *current = path.display().to_string();
        }
        if let Ok(mut start) = self.start_time.lock() {
            *start = Some(Instant::now());
        }

        // Producer is installed before the flag flips, so the audio thread
        // never sees a recording state without a ring to push into
        self.recording.store(true, Ordering::Release);

        let recording = Arc::clone(&self.recording);
        let dropped = Arc::clone(&self.dropped_frames);
        let path_for_log = path.display().to_string();
        let handle = thread::Builder::new()
            .name("recording-writer".into())
            .spawn(move || writer_loop(writer, consumer, recording, dropped, path_for_log))
            .map_err(|e| RecorderError::OpenFile(e.to_string()))?;

        if let Ok(mut guard) = self.writer_thread.lock() {
            *guard = Some(handle);
        }

        Ok(path.display().to_string())
    }

    /// Stop recording and finalize the WAV header.
    pub fn stop(&self) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }

        self.recording.store(false, Ordering::Release);

        let handle = self.writer_thread.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        if let Ok(mut guard) = self.producer.lock() {
            *guard = None;
        }
        if let Ok(mut current) = self.current_path.lock() {
            current.clear();
        }
        if let Ok(mut start) = self.start_time.lock() {
            *start = None;
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn current_path(&self) -> String {
        self.current_path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Recording duration in seconds, 0.0 when idle.
    pub fn duration(&self) -> f64 {
        if !self.recording.load(Ordering::Acquire) {
            return 0.0;
        }
        self.start_time
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// RT tap: push one block of processed frames. Never blocks.
    pub fn push_frames(&self, left: &[f32], right: &[f32]) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }

        let frames = left.len().min(right.len());
        match self.producer.try_lock() {
            Ok(mut guard) => {
                if let Some(producer) = guard.as_mut() {
                    let written = producer.push_frames(left, right);
                    let dropped = frames - written;
                    if dropped > 0 {
                        self.dropped_frames
                            .fetch_add(dropped as u64, Ordering::Relaxed);
                    }
                }
            }
            Err(_) => {
                // start/stop holds the lock; count the block as dropped
                self.dropped_frames
                    .fetch_add(frames as u64, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(
    mut writer: WavWriter<std::io::BufWriter<std::fs::File>>,
    mut consumer: AudioConsumer,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    path: String,
) {
    info!("recording started: {}", path);

    let mut batch = vec![0.0f32; BATCH_SAMPLES];

    while recording.load(Ordering::Acquire) {
        let n = consumer.read(&mut batch);
        if n == 0 {
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        if write_batch(&mut writer, &batch[..n]).is_err() {
            error!("recording write failed, stopping: {}", path);
            recording.store(false, Ordering::Release);
            break;
        }
    }

    // Flush whatever is still in the ring
    loop {
        let n = consumer.read(&mut batch);
        if n == 0 {
            break;
        }
        if write_batch(&mut writer, &batch[..n]).is_err() {
            break;
        }
    }

    let duration = writer.duration() as f64 / writer.spec().sample_rate as f64;
    match writer.finalize() {
        Ok(()) => info!("recording stopped: {} ({:.2} s)", path, duration),
        Err(e) => error!("failed to finalize {}: {}", path, e),
    }

    let dropped_total = dropped.load(Ordering::Relaxed);
    if dropped_total > 0 {
        warn!("dropped {} frames during recording", dropped_total);
    }
}

fn write_batch(
    writer: &mut WavWriter<std::io::BufWriter<std::fs::File>>,
    samples: &[f32],
) -> Result<(), hound::Error> {
    for &sample in samples {
        let pcm = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(pcm)?;
    }
    Ok(())
}

/// Default recordings directory beside the executable's working directory.
pub fn default_recordings_dir() -> &'static Path {
    Path::new("./recordings")
}
