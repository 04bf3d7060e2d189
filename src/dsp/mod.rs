//! Digital Signal Processing components

pub mod biquad;
pub mod dc_blocker;
pub mod eq;
pub mod gate;
pub mod reverb;

pub use biquad::{Biquad, BiquadType};
pub use dc_blocker::DCBlocker;
pub use eq::{EqParams, ThreeBandEQ};
pub use gate::{GateParams, NoiseGate};
pub use reverb::{Reverb, ReverbParams};
