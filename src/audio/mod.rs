//! Audio input/output and driver glue

pub mod backend;
pub mod buffer;
pub mod device;
pub mod input;
pub mod output;

pub use backend::{AudioBackend, BackendConfig, BackendStatus};
pub use buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
pub use device::{list_input_devices, list_output_devices};
pub use input::{AudioDeviceInfo, AudioError, AudioInput};
pub use output::AudioOutput;
