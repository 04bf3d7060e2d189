//! Audio playback using cpal
//!
//! Drains the processed interleaved stereo ring into the playback device.
//! Shortfalls ramp the last frame down to silence instead of clicking, and
//! are counted as underruns for the xrun report.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::buffer::AudioConsumer;
use super::input::{find_rate_config, AudioDeviceInfo, AudioError};

/// Playback stream
pub struct AudioOutput {
    stream: Stream,
    device_info: AudioDeviceInfo,
}

impl AudioOutput {
    /// Create from the default output device (the auto-connect policy).
    pub fn from_default_device(
        sample_rate: u32,
        consumer: AudioConsumer,
        underruns: Arc<AtomicU64>,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        Self::from_device(device, sample_rate, consumer, underruns, failed)
    }

    /// Create from a device selected by name.
    pub fn from_device_name(
        name: &str,
        sample_rate: u32,
        consumer: AudioConsumer,
        underruns: Arc<AtomicU64>,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| AudioError::DeviceName(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?;
        Self::from_device(device, sample_rate, consumer, underruns, failed)
    }

    pub fn from_device(
        device: Device,
        sample_rate: u32,
        consumer: AudioConsumer,
        underruns: Arc<AtomicU64>,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let name = device
            .name()
            .map_err(|e| AudioError::DeviceName(e.to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;
        let config = find_rate_config(supported, sample_rate)
            .ok_or(AudioError::UnsupportedSampleRate(sample_rate))?;

        let channels = config.channels();
        let device_info = AudioDeviceInfo {
            name,
            sample_rate,
            channels,
        };

        let stream_config: StreamConfig = config.into();
        let consumer = Arc::new(Mutex::new(consumer));
        let num_channels = channels as usize;

        let consumer_clone = Arc::clone(&consumer);
        // Allocated up front; the callback must never touch the heap
        let mut stereo_scratch = vec![0.0f32; super::input::MAX_CALLBACK_FRAMES * 2];

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut cons) = consumer_clone.try_lock() else {
                        // Contention: silence beats blocking the device
                        data.fill(0.0);
                        return;
                    };

                    let chunk_len = num_channels.max(1) * super::input::MAX_CALLBACK_FRAMES;
                    for block in data.chunks_mut(chunk_len) {
                        let frames = block.len() / num_channels.max(1);
                        let wanted = frames * 2;

                        if cons.len() >= wanted {
                            cons.read(&mut stereo_scratch[..wanted]);
                        } else {
                            // Underrun: ramp the last frame to silence
                            underruns.fetch_add(1, Ordering::Relaxed);
                            let (last_l, last_r) = cons.last_frame();
                            for i in 0..frames {
                                let t = (i + 1) as f32 / frames.max(1) as f32;
                                stereo_scratch[i * 2] = last_l * (1.0 - t);
                                stereo_scratch[i * 2 + 1] = last_r * (1.0 - t);
                            }
                        }

                        // Map engine stereo onto the device channel layout
                        if num_channels == 1 {
                            for (i, sample) in block.iter_mut().enumerate() {
                                *sample =
                                    0.5 * (stereo_scratch[i * 2] + stereo_scratch[i * 2 + 1]);
                            }
                        } else {
                            for (i, frame) in block.chunks_exact_mut(num_channels).enumerate() {
                                frame[0] = stereo_scratch[i * 2];
                                frame[1] = stereo_scratch[i * 2 + 1];
                                for extra in frame.iter_mut().skip(2) {
                                    *extra = 0.0;
                                }
                            }
                        }
                    }
                },
                {
                    let failed = Arc::clone(&failed);
                    move |err| {
                        log::error!("audio output error: {}", err);
                        failed.store(true, Ordering::Release);
                    }
                },
                None,
            )
            .map_err(|e| AudioError::BuildStream(e.to_string()))?;

        Ok(Self {
            stream,
            device_info,
        })
    }

    pub fn start(&self) -> Result<(), AudioError> {
        self.stream
            .play()
            .map_err(|e| AudioError::PlayStream(e.to_string()))
    }

    pub fn pause(&self) -> Result<(), AudioError> {
        self.stream
            .pause()
            .map_err(|e| AudioError::PlayStream(e.to_string()))
    }

    pub fn device_info(&self) -> &AudioDeviceInfo {
        &self.device_info
    }
}
