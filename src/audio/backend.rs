//! Audio driver glue
//!
//! Owns the capture and playback streams plus the real-time processing
//! thread between them. Streams are not sendable, so a dedicated driver
//! thread builds them, runs the block loop, and keeps them alive until the
//! backend is stopped. The supervisor polls `status()` and calls
//! `reconnect()` when a stream dies.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use thread_priority::{set_current_thread_priority, ThreadPriority};

use super::buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
use super::input::{AudioError, AudioInput};
use super::output::AudioOutput;
use crate::engine::Engine;
use crate::track::BackingTrack;
use crate::util::AtomicF32;

/// Ring capacity between the streams and the processing thread:
/// two seconds of interleaved stereo
fn stream_ring_capacity(sample_rate: u32) -> usize {
    sample_rate as usize * 2 * 2
}

/// Driver connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Connected => "connected",
            BackendStatus::Connecting => "connecting",
            BackendStatus::Disconnected => "disconnected",
            BackendStatus::Error => "error",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => BackendStatus::Connected,
            1 => BackendStatus::Connecting,
            2 => BackendStatus::Disconnected,
            _ => BackendStatus::Error,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BackendStatus::Connected => 0,
            BackendStatus::Connecting => 1,
            BackendStatus::Disconnected => 2,
            BackendStatus::Error => 3,
        }
    }
}

/// Device selection; `None` means the default device (auto-connect)
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

struct Connection {
    driver_thread: thread::JoinHandle<()>,
    running: Arc<AtomicBool>,
}

pub struct AudioBackend {
    engine: Arc<Engine>,
    track: Arc<BackingTrack>,
    config: Mutex<BackendConfig>,

    status: AtomicU8,
    error: Mutex<String>,

    /// Raised by stream error callbacks; the supervisor reacts by reconnecting
    stream_failed: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    dsp_load: Arc<AtomicF32>,

    input_device_name: Mutex<String>,
    output_device_name: Mutex<String>,

    connection: Mutex<Option<Connection>>,
}

impl AudioBackend {
    pub fn new(engine: Arc<Engine>, track: Arc<BackingTrack>, config: BackendConfig) -> Self {
        Self {
            engine,
            track,
            config: Mutex::new(config),
            status: AtomicU8::new(BackendStatus::Disconnected.as_u8()),
            error: Mutex::new(String::new()),
            stream_failed: Arc::new(AtomicBool::new(false)),
            underruns: Arc::new(AtomicU64::new(0)),
            dsp_load: Arc::new(AtomicF32::new(0.0)),
            input_device_name: Mutex::new(String::new()),
            output_device_name: Mutex::new(String::new()),
            connection: Mutex::new(None),
        }
    }

    /// Open both streams and start processing. Returns once the streams are
    /// up or the driver thread reported a failure.
    pub fn start(&self) -> Result<(), AudioError> {
        self.stop();
        self.set_status(BackendStatus::Connecting, "");
        self.stream_failed.store(false, Ordering::Release);

        let config = self
            .config
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        let engine = Arc::clone(&self.engine);
        let track = Arc::clone(&self.track);
        let stream_failed = Arc::clone(&self.stream_failed);
        let underruns = Arc::clone(&self.underruns);
        let dsp_load = Arc::clone(&self.dsp_load);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(String, String), AudioError>>();

        let driver_thread = thread::Builder::new()
            .name("audio-driver".into())
            .spawn(move || {
                driver_main(
                    engine,
                    track,
                    config,
                    running_for_thread,
                    stream_failed,
                    underruns,
                    dsp_load,
                    ready_tx,
                )
            })
            .map_err(|e| AudioError::BuildStream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok((input_name, output_name))) => {
                if let Ok(mut name) = self.input_device_name.lock() {
                    *name = input_name;
                }
                if let Ok(mut name) = self.output_device_name.lock() {
                    *name = output_name;
                }
                if let Ok(mut connection) = self.connection.lock() {
                    *connection = Some(Connection {
                        driver_thread,
                        running,
                    });
                }
                self.set_status(BackendStatus::Connected, "");
                Ok(())
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::Release);
                let _ = driver_thread.join();
                self.set_status(BackendStatus::Error, &e.to_string());
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::Release);
                let _ = driver_thread.join();
                let e = AudioError::BuildStream("driver thread died during startup".into());
                self.set_status(BackendStatus::Error, &e.to_string());
                Err(e)
            }
        }
    }

    /// Stop processing and tear down both streams.
    pub fn stop(&self) {
        let connection = self.connection.lock().ok().and_then(|mut c| c.take());
        if let Some(connection) = connection {
            connection.running.store(false, Ordering::Release);
            let _ = connection.driver_thread.join();
            self.set_status(BackendStatus::Disconnected, "");
        }
    }

    /// Tear down and rebuild both streams. A failure on either side
    /// re-prepares capture and playback together.
    pub fn reconnect(&self) -> Result<(), AudioError> {
        info!("reconnecting audio streams");
        self.stop();
        self.start()
    }

    /// True when a stream error callback fired since the last check.
    pub fn take_stream_failure(&self) -> bool {
        let failed = self.stream_failed.swap(false, Ordering::AcqRel);
        if failed {
            self.set_status(BackendStatus::Disconnected, "audio stream failed");
        }
        failed
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn error_message(&self) -> String {
        self.error.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn set_status(&self, status: BackendStatus, error: &str) {
        self.status.store(status.as_u8(), Ordering::Release);
        if let Ok(mut message) = self.error.lock() {
            *message = error.to_string();
        }
    }

    // ===== Metrics =====

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn block_size(&self) -> usize {
        self.engine.max_block_size()
    }

    pub fn latency_ms(&self) -> f32 {
        let sr = self.engine.sample_rate();
        if sr == 0 {
            return 0.0;
        }
        self.engine.max_block_size() as f32 / sr as f32 * 1000.0
    }

    /// Smoothed fraction of the block deadline spent in DSP.
    pub fn dsp_load(&self) -> f32 {
        self.dsp_load.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn input_device_name(&self) -> String {
        self.input_device_name
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn output_device_name(&self) -> String {
        self.output_device_name
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

impl Drop for AudioBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Driver thread body: builds streams, then runs the block loop until told
/// to stop. The streams live on this thread's stack for its whole life.
#[allow(clippy::too_many_arguments)]
fn driver_main(
    engine: Arc<Engine>,
    track: Arc<BackingTrack>,
    config: BackendConfig,
    running: Arc<AtomicBool>,
    stream_failed: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    dsp_load: Arc<AtomicF32>,
    ready_tx: mpsc::Sender<Result<(String, String), AudioError>>,
) {
    let sample_rate = engine.sample_rate();
    let block = engine.max_block_size();

    let capture_ring = AudioRingBuffer::new(stream_ring_capacity(sample_rate));
    let (capture_producer, capture_consumer) = capture_ring.split();

    let playback_ring = AudioRingBuffer::new(stream_ring_capacity(sample_rate));
    let (mut playback_producer, playback_consumer) = playback_ring.split();

    // Prime playback with one block of silence so the first callback
    // doesn't underrun
    let silence = vec![0.0f32; block * 2];
    playback_producer.write(&silence);

    let input = match build_input(
        &config,
        sample_rate,
        capture_producer,
        Arc::clone(&stream_failed),
    ) {
        Ok(input) => input,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let output = match build_output(
        &config,
        sample_rate,
        playback_consumer,
        Arc::clone(&underruns),
        Arc::clone(&stream_failed),
    ) {
        Ok(output) => output,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = input.start() {
        let _ = ready_tx.send(Err(e));
        return;
    }
    if let Err(e) = output.start() {
        let _ = input.pause();
        let _ = ready_tx.send(Err(e));
        return;
    }

    info!(
        "audio running: {} -> {} at {} Hz, {} frame blocks",
        input.device_info().name,
        output.device_info().name,
        sample_rate,
        block
    );
    let _ = ready_tx.send(Ok((
        input.device_info().name.clone(),
        output.device_info().name.clone(),
    )));

    process_loop(
        engine,
        track,
        capture_consumer,
        playback_producer,
        block,
        sample_rate,
        running,
        dsp_load,
    );

    let _ = input.pause();
    let _ = output.pause();
    info!("audio stopped");
}

fn build_input(
    config: &BackendConfig,
    sample_rate: u32,
    producer: AudioProducer,
    failed: Arc<AtomicBool>,
) -> Result<AudioInput, AudioError> {
    match &config.input_device {
        Some(name) => AudioInput::from_device_name(name, sample_rate, producer, failed),
        None => AudioInput::from_default_device(sample_rate, producer, failed),
    }
}

fn build_output(
    config: &BackendConfig,
    sample_rate: u32,
    consumer: AudioConsumer,
    underruns: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
) -> Result<AudioOutput, AudioError> {
    match &config.output_device {
        Some(name) => {
            AudioOutput::from_device_name(name, sample_rate, consumer, underruns, failed)
        }
        None => AudioOutput::from_default_device(sample_rate, consumer, underruns, failed),
    }
}

/// Block loop: pop one block of capture, run the engine graph, mix the
/// backing track into the audible output, push to playback.
#[allow(clippy::too_many_arguments)]
fn process_loop(
    engine: Arc<Engine>,
    track: Arc<BackingTrack>,
    mut capture: AudioConsumer,
    mut playback: AudioProducer,
    block: usize,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    dsp_load: Arc<AtomicF32>,
) {
    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        warn!("could not raise audio thread priority: {:?}", e);
    }

    let mut interleaved = vec![0.0f32; block * 2];
    let mut in_l = vec![0.0f32; block];
    let mut in_r = vec![0.0f32; block];
    let mut out_l = vec![0.0f32; block];
    let mut out_r = vec![0.0f32; block];
    let mut track_l = vec![0.0f32; block];
    let mut track_r = vec![0.0f32; block];

    let block_duration = block as f32 / sample_rate as f32;
    const LOAD_SMOOTH: f32 = 0.9;

    // Flush denormals so reverb and filter tails can't stall the CPU
    // SAFETY: only this thread's floating point flags are changed
    unsafe {
        no_denormals::no_denormals(|| {
            while running.load(Ordering::Acquire) {
                if capture.len() < block * 2 {
                    thread::sleep(Duration::from_micros(200));
                    continue;
                }

                capture.read(&mut interleaved);
                for i in 0..block {
                    in_l[i] = interleaved[i * 2];
                    in_r[i] = interleaved[i * 2 + 1];
                }

                let dsp_start = Instant::now();

                let track_playing = track.is_playing();
                if track_playing {
                    track.fill_buffer(&mut track_l, &mut track_r);
                }
                let track_block = if track_playing {
                    Some((&track_l[..], &track_r[..]))
                } else {
                    None
                };

                engine.process_stereo(&in_l, &in_r, &mut out_l, &mut out_r, track_block);

                // Audible mix, independent of the recording settings
                if track_playing {
                    for i in 0..block {
                        out_l[i] += track_l[i];
                        out_r[i] += track_r[i];
                    }
                }

                let elapsed = dsp_start.elapsed().as_secs_f32();
                let load = elapsed / block_duration;
                let smoothed =
                    LOAD_SMOOTH * dsp_load.load(Ordering::Relaxed) + (1.0 - LOAD_SMOOTH) * load;
                dsp_load.store(smoothed, Ordering::Relaxed);

                for i in 0..block {
                    interleaved[i * 2] = out_l[i];
                    interleaved[i * 2 + 1] = out_r[i];
                }
                playback.write(&interleaved);
            }
        });
    }
}

// ===== Host metrics (Raspberry Pi friendly, absent elsewhere) =====

/// CPU temperature in Celsius, -1.0 when unavailable.
pub fn cpu_temperature() -> f32 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok())
        .map(|milli| milli / 1000.0)
        .unwrap_or(-1.0)
}

/// Resident set size in MB, -1.0 when unavailable.
pub fn memory_usage_mb() -> f32 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return -1.0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f32 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(-1.0);
            if kb >= 0.0 {
                return kb / 1024.0;
            }
            return -1.0;
        }
    }
    -1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BackendStatus::Connected,
            BackendStatus::Connecting,
            BackendStatus::Disconnected,
            BackendStatus::Error,
        ] {
            assert_eq!(BackendStatus::from_u8(status.as_u8()), status);
        }
    }

    #[test]
    fn test_metrics_without_connection() {
        let engine = Arc::new(Engine::new(48000, 128));
        let track = Arc::new(BackingTrack::new());
        let backend = AudioBackend::new(engine, track, BackendConfig::default());

        assert_eq!(backend.status(), BackendStatus::Disconnected);
        assert_eq!(backend.sample_rate(), 48000);
        assert_eq!(backend.block_size(), 128);
        assert!((backend.latency_ms() - 128.0 / 48.0).abs() < 1e-3);
        assert_eq!(backend.underrun_count(), 0);
    }

    #[test]
    fn test_host_metrics_do_not_panic() {
        let _ = cpu_temperature();
        let _ = memory_usage_mb();
    }
}
