//! Neural model loading and slot management

pub mod neural;
pub mod slot;

pub use neural::{ModelError, NeuralModel};
pub use slot::{ModelSlot, FADE_SAMPLES};
