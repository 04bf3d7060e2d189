//! HoopiPi - headless low-latency neural guitar amp
//!
//! Captures audio from a USB interface, runs each block through a
//! configurable graph (gain, gate, neural amp model, tone stack, DC
//! blocker, reverb, backing-track mix) and plays it back within a few
//! milliseconds. A JSON protocol over a local socket drives everything; a
//! separate web front-end translates HTTP to that protocol.

#![recursion_limit = "256"]

pub mod audio;
pub mod cli;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod model;
pub mod recorder;
pub mod track;
pub mod util;

pub use audio::{AudioBackend, BackendConfig, BackendStatus};
pub use config::{default_config_path, ConfigStore, RuntimeConfig};
pub use control::ControlServer;
pub use engine::{Engine, StereoMode, NUM_SLOTS};
pub use recorder::Recorder;
pub use track::BackingTrack;
