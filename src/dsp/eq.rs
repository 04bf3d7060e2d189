//! Three-band tone stack (bass / mid / treble)
//!
//! Cascaded biquads shaped like a guitar amp tone control: low shelf at
//! 120 Hz, peaking at 750 Hz, high shelf at 3 kHz. Control threads write
//! atomic gain cells and raise a dirty flag; the audio thread recomputes
//! coefficients lazily, easing the gains toward their targets to avoid
//! zipper noise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::biquad::{Biquad, BiquadType};
use crate::util::AtomicF32;

const BASS_FREQ: f64 = 120.0;
const MID_FREQ: f64 = 750.0;
const TREBLE_FREQ: f64 = 3000.0;

const SHELF_Q: f64 = 0.707;
const MID_Q: f64 = 1.0;

/// Per-sample one-pole coefficient for gain smoothing
const GAIN_SMOOTH_COEFF: f32 = 0.999;

/// Smoothed gain is considered settled within this many dB of the target
const SETTLE_DB: f32 = 0.01;

/// Shared parameter cells, written by control threads
#[derive(Debug)]
pub struct EqParams {
    enabled: AtomicBool,
    bass_db: AtomicF32,
    mid_db: AtomicF32,
    treble_db: AtomicF32,
    coeffs_dirty: AtomicBool,
}

impl EqParams {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            bass_db: AtomicF32::new(0.0),
            mid_db: AtomicF32::new(0.0),
            treble_db: AtomicF32::new(0.0),
            coeffs_dirty: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_bass(&self, db: f32) {
        self.bass_db.store(db.clamp(-20.0, 20.0), Ordering::Relaxed);
        self.coeffs_dirty.store(true, Ordering::Release);
    }

    pub fn set_mid(&self, db: f32) {
        self.mid_db.store(db.clamp(-20.0, 20.0), Ordering::Relaxed);
        self.coeffs_dirty.store(true, Ordering::Release);
    }

    pub fn set_treble(&self, db: f32) {
        self.treble_db
            .store(db.clamp(-20.0, 20.0), Ordering::Relaxed);
        self.coeffs_dirty.store(true, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn bass(&self) -> f32 {
        self.bass_db.load(Ordering::Relaxed)
    }

    pub fn mid(&self) -> f32 {
        self.mid_db.load(Ordering::Relaxed)
    }

    pub fn treble(&self) -> f32 {
        self.treble_db.load(Ordering::Relaxed)
    }
}

/// Tone stack state, owned by the audio thread
pub struct ThreeBandEQ {
    params: Arc<EqParams>,

    bass: Biquad,
    mid: Biquad,
    treble: Biquad,

    // Smoothed gains, audio-thread private
    bass_smooth_db: f32,
    mid_smooth_db: f32,
    treble_smooth_db: f32,
}

impl ThreeBandEQ {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f64;
        Self {
            params: Arc::new(EqParams::new()),
            bass: Biquad::new(BiquadType::LowShelf, BASS_FREQ, 0.0, SHELF_Q, sr),
            mid: Biquad::new(BiquadType::Peaking, MID_FREQ, 0.0, MID_Q, sr),
            treble: Biquad::new(BiquadType::HighShelf, TREBLE_FREQ, 0.0, SHELF_Q, sr),
            bass_smooth_db: 0.0,
            mid_smooth_db: 0.0,
            treble_smooth_db: 0.0,
        }
    }

    /// Handle to the shared parameter cells.
    pub fn params(&self) -> Arc<EqParams> {
        Arc::clone(&self.params)
    }

    /// Process a block in place. Coefficients refresh only while the dirty
    /// flag is raised, once per block rather than per sample.
    pub fn process(&mut self, buffer: &mut [f32]) {
        if !self.params.enabled.load(Ordering::Relaxed) {
            return;
        }

        if self.params.coeffs_dirty.load(Ordering::Acquire) {
            self.refresh_coefficients(buffer.len());
        }

        for sample in buffer.iter_mut() {
            let mut output = self.bass.process_sample(*sample);
            output = self.mid.process_sample(output);
            output = self.treble.process_sample(output);
            *sample = output;
        }
    }

    pub fn reset(&mut self) {
        self.bass.reset();
        self.mid.reset();
        self.treble.reset();
    }

    /// Ease smoothed gains toward the written cells and retune the biquads.
    /// The dirty flag stays up until every band has settled.
    fn refresh_coefficients(&mut self, block_len: usize) {
        let decay = GAIN_SMOOTH_COEFF.powi(block_len.max(1) as i32);

        let bass_target = self.params.bass_db.load(Ordering::Relaxed);
        let mid_target = self.params.mid_db.load(Ordering::Relaxed);
        let treble_target = self.params.treble_db.load(Ordering::Relaxed);

        self.bass_smooth_db = bass_target + decay * (self.bass_smooth_db - bass_target);
        self.mid_smooth_db = mid_target + decay * (self.mid_smooth_db - mid_target);
        self.treble_smooth_db = treble_target + decay * (self.treble_smooth_db - treble_target);

        let settled = (self.bass_smooth_db - bass_target).abs() < SETTLE_DB
            && (self.mid_smooth_db - mid_target).abs() < SETTLE_DB
            && (self.treble_smooth_db - treble_target).abs() < SETTLE_DB;

        if settled {
            self.bass_smooth_db = bass_target;
            self.mid_smooth_db = mid_target;
            self.treble_smooth_db = treble_target;
            self.params.coeffs_dirty.store(false, Ordering::Release);
        }

        self.bass.set_gain_db(self.bass_smooth_db as f64);
        self.mid.set_gain_db(self.mid_smooth_db as f64);
        self.treble.set_gain_db(self.treble_smooth_db as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_identity() {
        let mut eq = ThreeBandEQ::new(48000);
        eq.params().set_bass(12.0);

        let mut buffer = vec![0.5f32; 128];
        eq.process(&mut buffer);

        assert!(buffer.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_flat_eq_is_near_identity() {
        let mut eq = ThreeBandEQ::new(48000);
        eq.params().set_enabled(true);

        let mut buffer: Vec<f32> = (0..4800)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 48000.0).sin() as f32 * 0.3)
            .collect();
        let original = buffer.clone();
        eq.process(&mut buffer);

        for (a, b) in buffer.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_bass_boost_raises_low_frequency() {
        let mut eq = ThreeBandEQ::new(48000);
        eq.params().set_enabled(true);
        eq.params().set_bass(20.0);

        // 60 Hz sine, chunked like the audio thread would deliver it, long
        // enough for the smoothed gain to settle
        let mut buffer: Vec<f32> = (0..96000)
            .map(|i| (2.0 * std::f64::consts::PI * 60.0 * i as f64 / 48000.0).sin() as f32 * 0.1)
            .collect();
        for chunk in buffer.chunks_mut(128) {
            eq.process(chunk);
        }

        let tail_peak = buffer[48000..]
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(s.abs()));
        assert!(tail_peak > 0.2, "expected low boost, got {}", tail_peak);
    }

    #[test]
    fn test_gain_clamped_to_range() {
        let eq = ThreeBandEQ::new(48000);
        eq.params().set_bass(35.0);
        eq.params().set_treble(-35.0);
        assert_eq!(eq.params().bass(), 20.0);
        assert_eq!(eq.params().treble(), -20.0);
    }

    #[test]
    fn test_extreme_gains_stay_finite() {
        let mut eq = ThreeBandEQ::new(48000);
        eq.params().set_enabled(true);
        eq.params().set_bass(20.0);
        eq.params().set_mid(-20.0);
        eq.params().set_treble(20.0);

        let mut buffer: Vec<f32> = (0..9600).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
        for chunk in buffer.chunks_mut(128) {
            eq.process(chunk);
        }
        assert!(buffer.iter().all(|s| s.is_finite()));
    }
}
