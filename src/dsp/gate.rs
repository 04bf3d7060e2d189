//! Noise gate with one-pole envelope detection
//!
//! Hard gate for guitar input noise: gain snaps between 0 and 1 based on
//! whether a smoothed peak envelope of |x| exceeds the linear threshold.
//! Two state variables instead of a sliding window.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::util::{db_to_linear, AtomicF32};

/// Envelope attack time in milliseconds
const ATTACK_MS: f32 = 1.0;

/// Envelope release time in milliseconds
const RELEASE_MS: f32 = 100.0;

/// Shared parameter cells, written by control threads
#[derive(Debug)]
pub struct GateParams {
    threshold_db: AtomicF32,
    threshold_linear: AtomicF32,
}

impl GateParams {
    fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db: AtomicF32::new(threshold_db),
            threshold_linear: AtomicF32::new(db_to_linear(threshold_db)),
        }
    }

    pub fn set_threshold(&self, threshold_db: f32) {
        self.threshold_db.store(threshold_db, Ordering::Relaxed);
        self.threshold_linear
            .store(db_to_linear(threshold_db), Ordering::Relaxed);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold_db.load(Ordering::Relaxed)
    }
}

/// Hard noise gate with peak envelope follower (audio-thread state)
pub struct NoiseGate {
    params: Arc<GateParams>,

    attack_coeff: f32,
    release_coeff: f32,

    /// Current envelope level (linear amplitude)
    envelope: f32,

    /// Current gate gain (0.0 or 1.0)
    gain: f32,
}

impl NoiseGate {
    /// Create a gate at the given sample rate with a -40 dB threshold.
    pub fn new(sample_rate: u32) -> Self {
        let attack_coeff = Self::time_constant_to_coeff(ATTACK_MS, sample_rate);
        let release_coeff = Self::time_constant_to_coeff(RELEASE_MS, sample_rate);

        Self {
            params: Arc::new(GateParams::new(-40.0)),
            attack_coeff,
            release_coeff,
            envelope: 0.0,
            gain: 1.0,
        }
    }

    /// coeff = exp(-1 / (time_ms * sample_rate / 1000))
    fn time_constant_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
        (-1.0 / (time_ms * sample_rate as f32 / 1000.0)).exp()
    }

    /// Handle to the shared parameter cells.
    pub fn params(&self) -> Arc<GateParams> {
        Arc::clone(&self.params)
    }

    /// Process a block in place (audio thread only).
    pub fn process(&mut self, buffer: &mut [f32]) {
        let threshold = self.params.threshold_linear.load(Ordering::Relaxed);

        for sample in buffer.iter_mut() {
            let input = *sample;
            let input_abs = input.abs();

            if input_abs > self.envelope {
                self.envelope =
                    self.envelope * self.attack_coeff + input_abs * (1.0 - self.attack_coeff);
            } else {
                self.envelope =
                    self.envelope * self.release_coeff + input_abs * (1.0 - self.release_coeff);
            }

            self.gain = if self.envelope > threshold { 1.0 } else { 0.0 };

            *sample = input * self.gain;
        }
    }

    /// Reset envelope state.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
    }

    /// Current envelope level, for metering.
    pub fn current_envelope(&self) -> f32 {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_passes_loud_signal() {
        let mut gate = NoiseGate::new(48000);
        gate.params().set_threshold(-40.0);

        // 0.1 is about -20 dB, well above threshold
        let mut buffer = vec![0.1f32; 4800];
        gate.process(&mut buffer);

        // After the envelope settles the signal passes unchanged
        assert_eq!(buffer[4799], 0.1);
    }

    #[test]
    fn test_gate_closes_on_quiet_signal() {
        let mut gate = NoiseGate::new(48000);
        gate.params().set_threshold(-20.0);

        // 0.01 is about -40 dB, well below the -20 dB threshold
        let mut buffer = vec![0.01f32; 4800];
        gate.process(&mut buffer);

        assert_eq!(buffer[4799], 0.0);
    }

    #[test]
    fn test_gate_reopens_after_attack() {
        let mut gate = NoiseGate::new(48000);
        gate.params().set_threshold(-40.0);

        // Close it first
        let mut quiet = vec![0.0001f32; 9600];
        gate.process(&mut quiet);
        assert_eq!(quiet[9599], 0.0);

        // Loud signal reopens within a few ms (attack is ~1 ms)
        let mut loud = vec![0.5f32; 960];
        gate.process(&mut loud);
        assert_eq!(loud[959], 0.5);
    }

    #[test]
    fn test_gate_reset() {
        let mut gate = NoiseGate::new(48000);
        let mut buffer = vec![0.5f32; 256];
        gate.process(&mut buffer);
        assert!(gate.current_envelope() > 0.0);

        gate.reset();
        assert_eq!(gate.current_envelope(), 0.0);
    }
}
