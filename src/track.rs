//! Backing track player
//!
//! Decodes an audio file (WAV/FLAC/OGG/MP3) fully into memory, resamples
//! it to the engine rate with linear interpolation and plays it back under
//! atomic transport control. `fill_buffer` runs on the audio thread and
//! never allocates; loading happens on a control thread and is guarded
//! against overlapping playback by stopping the transport first.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use log::info;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;

use crate::util::AtomicF32;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to open file: {0}")]
    Open(#[from] std::io::Error),

    #[error("failed to decode file: {0}")]
    Decode(String),

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(usize),

    #[error("file contains no audio")]
    Empty,
}

#[derive(Default)]
struct TrackData {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
    source_channels: u16,
    filename: String,
}

/// Pre-decoded stereo track with atomic transport cells
pub struct BackingTrack {
    data: RwLock<TrackData>,

    playing: AtomicBool,
    position: AtomicUsize,
    loop_enabled: AtomicBool,
    volume: AtomicF32,
    start_frame: AtomicUsize,
    stop_frame: AtomicUsize,
}

impl Default for BackingTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingTrack {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(TrackData::default()),
            playing: AtomicBool::new(false),
            position: AtomicUsize::new(0),
            loop_enabled: AtomicBool::new(true),
            volume: AtomicF32::new(0.7),
            start_frame: AtomicUsize::new(0),
            stop_frame: AtomicUsize::new(0),
        }
    }

    /// Load and pre-resample a file. Playback is halted first so the audio
    /// thread cannot observe the swap.
    pub fn load(&self, path: &Path, engine_rate: u32) -> Result<(), TrackError> {
        self.stop();

        let (interleaved, channels, source_rate) = decode_file(path)?;
        if channels == 0 || channels > 2 {
            return Err(TrackError::UnsupportedChannels(channels));
        }

        let frames = interleaved.len() / channels;
        if frames == 0 {
            return Err(TrackError::Empty);
        }

        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        if channels == 1 {
            for &sample in &interleaved {
                left.push(sample);
                right.push(sample);
            }
        } else {
            for frame in interleaved.chunks_exact(2) {
                left.push(frame[0]);
                right.push(frame[1]);
            }
        }

        if source_rate != engine_rate {
            info!(
                "resampling backing track from {} Hz to {} Hz",
                source_rate, engine_rate
            );
            left = resample_linear(&left, source_rate, engine_rate);
            right = resample_linear(&right, source_rate, engine_rate);
        }

        info!(
            "backing track loaded: {} ({} frames at {} Hz)",
            path.display(),
            left.len(),
            engine_rate
        );

        if let Ok(mut data) = self.data.write() {
            *data = TrackData {
                left,
                right,
                sample_rate: engine_rate,
                source_channels: channels as u16,
                filename: path.display().to_string(),
            };
        }

        self.position.store(0, Ordering::Relaxed);
        self.start_frame.store(0, Ordering::Relaxed);
        self.stop_frame.store(0, Ordering::Relaxed);

        Ok(())
    }

    /// Halt playback and free the decoded audio.
    pub fn unload(&self) {
        self.stop();
        if let Ok(mut data) = self.data.write() {
            *data = TrackData::default();
        }
        self.position.store(0, Ordering::Relaxed);
        self.start_frame.store(0, Ordering::Relaxed);
        self.stop_frame.store(0, Ordering::Relaxed);
    }

    // ===== Transport =====

    pub fn play(&self) {
        if !self.is_loaded() {
            return;
        }
        self.position
            .store(self.start_frame.load(Ordering::Relaxed), Ordering::Relaxed);
        self.playing.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        self.position
            .store(self.start_frame.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_loop(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_looping(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Start position in seconds, clamped into the track.
    pub fn set_start_position(&self, seconds: f32) {
        let Some((rate, frames)) = self.rate_and_frames() else {
            return;
        };
        let mut frame = (seconds.max(0.0) * rate as f32) as usize;
        if frame >= frames {
            frame = frames.saturating_sub(1);
        }
        self.start_frame.store(frame, Ordering::Relaxed);
    }

    /// Stop position in seconds; zero means end of file.
    pub fn set_stop_position(&self, seconds: f32) {
        let Some((rate, frames)) = self.rate_and_frames() else {
            return;
        };
        let frame = if seconds > 0.0 {
            ((seconds * rate as f32) as usize).min(frames)
        } else {
            0
        };
        self.stop_frame.store(frame, Ordering::Relaxed);
    }

    pub fn start_position(&self) -> f32 {
        self.rate_and_frames()
            .map(|(rate, _)| self.start_frame.load(Ordering::Relaxed) as f32 / rate as f32)
            .unwrap_or(0.0)
    }

    pub fn stop_position(&self) -> f32 {
        let Some((rate, _)) = self.rate_and_frames() else {
            return 0.0;
        };
        let stop = self.stop_frame.load(Ordering::Relaxed);
        if stop == 0 {
            self.duration_seconds()
        } else {
            stop as f32 / rate as f32
        }
    }

    // ===== Status =====

    pub fn is_loaded(&self) -> bool {
        self.data.read().map(|d| !d.left.is_empty()).unwrap_or(false)
    }

    pub fn filename(&self) -> String {
        self.data
            .read()
            .map(|d| d.filename.clone())
            .unwrap_or_default()
    }

    pub fn total_frames(&self) -> usize {
        self.data.read().map(|d| d.left.len()).unwrap_or(0)
    }

    pub fn current_frame(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    pub fn duration_seconds(&self) -> f32 {
        self.rate_and_frames()
            .map(|(rate, frames)| frames as f32 / rate as f32)
            .unwrap_or(0.0)
    }

    pub fn channels(&self) -> u16 {
        self.data.read().map(|d| d.source_channels).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.data.read().map(|d| d.sample_rate).unwrap_or(0)
    }

    fn rate_and_frames(&self) -> Option<(u32, usize)> {
        self.data
            .read()
            .ok()
            .filter(|d| d.sample_rate > 0 && !d.left.is_empty())
            .map(|d| (d.sample_rate, d.left.len()))
    }

    // ===== Audio thread =====

    /// Produce `out_l.len()` frames of track audio, advancing the
    /// transport. RT-safe: no allocation, no blocking (a load in progress
    /// yields silence for the block).
    pub fn fill_buffer(&self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());

        if !self.playing.load(Ordering::Acquire) {
            out_l[..frames].fill(0.0);
            out_r[..frames].fill(0.0);
            return;
        }

        let Ok(data) = self.data.try_read() else {
            out_l[..frames].fill(0.0);
            out_r[..frames].fill(0.0);
            return;
        };

        let total = data.left.len();
        if total == 0 {
            out_l[..frames].fill(0.0);
            out_r[..frames].fill(0.0);
            return;
        }

        let volume = self.volume.load(Ordering::Relaxed);
        let looping = self.loop_enabled.load(Ordering::Relaxed);
        let start = self.start_frame.load(Ordering::Relaxed).min(total - 1);
        let stop = self.stop_frame.load(Ordering::Relaxed);
        let end = if stop > 0 && stop < total { stop } else { total };
        let mut pos = self.position.load(Ordering::Relaxed);

        for i in 0..frames {
            if pos >= end {
                if looping {
                    pos = start;
                } else {
                    self.playing.store(false, Ordering::Release);
                    out_l[i..frames].fill(0.0);
                    out_r[i..frames].fill(0.0);
                    self.position.store(start, Ordering::Relaxed);
                    return;
                }
            }

            out_l[i] = data.left[pos] * volume;
            out_r[i] = data.right[pos] * volume;
            pos += 1;
        }

        self.position.store(pos, Ordering::Relaxed);
    }
}

/// Decode a whole file to interleaved f32. Returns (samples, channels, rate).
fn decode_file(path: &Path) -> Result<(Vec<f32>, usize, u32), TrackError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TrackError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| TrackError::Decode("no default track".into()))?;
    let track_id = track.id;
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TrackError::Decode(e.to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| TrackError::Decode("unknown sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| TrackError::Decode("unknown channel count".into()))?
        .count();

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(TrackError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(TrackError::Decode(e.to_string())),
        };

        if sample_buf.is_none() {
            sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                *decoded.spec(),
            ));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    Ok((samples, channels, sample_rate))
}

/// Linear-interpolation resampling, any integer rate pair.
fn resample_linear(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input.is_empty() || input_rate == 0 || output_rate == 0 || input_rate == output_rate {
        return input.to_vec();
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let output_frames = (input.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(output_frames);

    for i in 0..output_frames {
        let input_pos = i as f64 / ratio;
        let input_index = input_pos as usize;
        let frac = (input_pos - input_index as f64) as f32;

        let value = if input_index + 1 < input.len() {
            input[input_index] * (1.0 - frac) + input[input_index + 1] * frac
        } else if input_index < input.len() {
            input[input_index]
        } else {
            0.0
        };
        output.push(value);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Load a track directly, bypassing the decoder.
    fn install(track: &BackingTrack, left: Vec<f32>, right: Vec<f32>, rate: u32) {
        {
            let mut data = track.data.write().unwrap();
            *data = TrackData {
                left,
                right,
                sample_rate: rate,
                source_channels: 2,
                filename: "test".into(),
            };
        }
        track.position.store(0, Ordering::Relaxed);
        track.start_frame.store(0, Ordering::Relaxed);
        track.stop_frame.store(0, Ordering::Relaxed);
    }

    #[test]
    fn test_fill_silence_when_stopped() {
        let track = BackingTrack::new();
        install(&track, vec![1.0; 480], vec![1.0; 480], 48000);

        let mut l = vec![0.5f32; 128];
        let mut r = vec![0.5f32; 128];
        track.fill_buffer(&mut l, &mut r);

        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_playback_applies_volume() {
        let track = BackingTrack::new();
        install(&track, vec![1.0; 480], vec![-1.0; 480], 48000);
        track.set_volume(0.5);
        track.play();

        let mut l = vec![0.0f32; 128];
        let mut r = vec![0.0f32; 128];
        track.fill_buffer(&mut l, &mut r);

        assert!(l.iter().all(|&s| s == 0.5));
        assert!(r.iter().all(|&s| s == -0.5));
        assert_eq!(track.current_frame(), 128);
    }

    #[test]
    fn test_loop_wraps_between_start_and_stop() {
        let track = BackingTrack::new();
        // 2 seconds at 1 kHz for easy frame math; value = frame index
        let data: Vec<f32> = (0..2000).map(|i| i as f32).collect();
        install(&track, data.clone(), data, 1000);

        track.set_start_position(0.5);
        track.set_stop_position(1.5);
        track.set_loop(true);
        track.set_volume(1.0);
        track.play();

        let mut l = vec![0.0f32; 2500];
        let mut r = vec![0.0f32; 2500];
        track.fill_buffer(&mut l, &mut r);

        // Period is stop - start = 1000 frames
        for i in 0..1500 {
            assert_eq!(l[i], l[i + 1000], "frame {} not periodic", i);
        }
        assert_eq!(l[0], 500.0);
        assert_eq!(l[999], 1499.0);
        assert_eq!(l[1000], 500.0);
    }

    #[test]
    fn test_no_loop_stops_and_zero_fills() {
        let track = BackingTrack::new();
        install(&track, vec![1.0; 100], vec![1.0; 100], 1000);
        track.set_loop(false);
        track.play();

        let mut l = vec![0.5f32; 256];
        let mut r = vec![0.5f32; 256];
        track.fill_buffer(&mut l, &mut r);

        assert!(l[..100].iter().all(|&s| s != 0.0));
        assert!(l[100..].iter().all(|&s| s == 0.0));
        assert!(!track.is_playing());
    }

    #[test]
    fn test_unload_halts_playback() {
        let track = BackingTrack::new();
        install(&track, vec![1.0; 100], vec![1.0; 100], 1000);
        track.play();
        assert!(track.is_playing());

        track.unload();
        assert!(!track.is_playing());
        assert!(!track.is_loaded());
        assert_eq!(track.filename(), "");
    }

    #[test]
    fn test_resample_linear_doubles_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let output = resample_linear(&input, 1000, 2000);
        assert_eq!(output.len(), 200);
        // Midpoints interpolate halfway
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_identity() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 48000, 48000), input);
    }

    #[test]
    fn test_stop_zero_means_end_of_file() {
        let track = BackingTrack::new();
        install(&track, vec![1.0; 1000], vec![1.0; 1000], 1000);
        assert_eq!(track.stop_position(), 1.0);
        track.set_stop_position(0.25);
        assert_eq!(track.stop_position(), 0.25);
        track.set_stop_position(0.0);
        assert_eq!(track.stop_position(), 1.0);
    }
}
