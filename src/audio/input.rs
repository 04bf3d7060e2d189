//! Audio capture using cpal
//!
//! Captures from a USB interface (or any input device) at the engine
//! sample rate and feeds an interleaved stereo ring. Mono devices feed
//! both channels, so a single physical input behaves like a connected
//! stereo pair.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::buffer::AudioProducer;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio device found")]
    NoDevice,

    #[error("Failed to get device name: {0}")]
    DeviceName(String),

    #[error("Failed to get device config: {0}")]
    DeviceConfig(String),

    #[error("Device does not support {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Failed to build stream: {0}")]
    BuildStream(String),

    #[error("Failed to start stream: {0}")]
    PlayStream(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Largest device callback handled in one pass; bigger callbacks are
/// processed in chunks of this many frames. Bounds the scratch buffers so
/// the callbacks never allocate.
pub(crate) const MAX_CALLBACK_FRAMES: usize = 8192;

/// Find a supported config covering the requested rate.
pub(crate) fn find_rate_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    for config in configs {
        let min_rate = config.min_sample_rate().0;
        let max_rate = config.max_sample_rate().0;
        if min_rate <= sample_rate && sample_rate <= max_rate {
            return Some(config.with_sample_rate(cpal::SampleRate(sample_rate)));
        }
    }
    None
}

/// Capture stream feeding an interleaved stereo ring
pub struct AudioInput {
    stream: Stream,
    device_info: AudioDeviceInfo,
}

impl AudioInput {
    /// Create from the default input device (the auto-connect policy).
    pub fn from_default_device(
        sample_rate: u32,
        producer: AudioProducer,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
        Self::from_device(device, sample_rate, producer, failed)
    }

    /// Create from a device selected by name.
    pub fn from_device_name(
        name: &str,
        sample_rate: u32,
        producer: AudioProducer,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .input_devices()
            .map_err(|e| AudioError::DeviceName(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?;
        Self::from_device(device, sample_rate, producer, failed)
    }

    pub fn from_device(
        device: Device,
        sample_rate: u32,
        producer: AudioProducer,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, AudioError> {
        let name = device
            .name()
            .map_err(|e| AudioError::DeviceName(e.to_string()))?;

        let supported = device
            .supported_input_configs()
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
        let producer = Arc::new(Mutex::new(producer));
        let num_channels = channels as usize;

        let producer_clone = Arc::clone(&producer);
        // Allocated up front; the callback must never touch the heap
        let mut stereo_scratch = vec![0.0f32; MAX_CALLBACK_FRAMES * 2];

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut prod) = producer_clone.try_lock() {
                        for block in data.chunks(num_channels.max(1) * MAX_CALLBACK_FRAMES) {
                            let frames = block.len() / num_channels.max(1);

                            if num_channels == 1 {
                                // One physical port: feed both engine inputs
                                for (i, &sample) in block.iter().enumerate() {
                                    stereo_scratch[i * 2] = sample;
                                    stereo_scratch[i * 2 + 1] = sample;
                                }
                            } else {
                                for (i, frame) in block.chunks_exact(num_channels).enumerate() {
                                    stereo_scratch[i * 2] = frame[0];
                                    stereo_scratch[i * 2 + 1] = frame[1];
                                }
                            }

                            prod.write(&stereo_scratch[..frames * 2]);
                        }
                    }
                },
                {
                    let failed = Arc::clone(&failed);
                    move |err| {
                        log::error!("audio input error: {}", err);
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
