//! Small shared helpers: atomic f32 parameter cells and dB conversion.

use std::sync::atomic::{AtomicU32, Ordering};

/// Single-word f32 cell, stored as raw bits in an `AtomicU32`.
///
/// Written by control threads, read by the audio thread. Individual writes
/// are atomic; no ordering between distinct cells is assumed.
#[derive(Debug)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.bits.load(order))
    }

    #[inline]
    pub fn store(&self, value: f32, order: Ordering) {
        self.bits.store(value.to_bits(), order);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// dB → linear amplitude.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Linear amplitude → dB. Zero or negative amplitudes clamp to -100 dB.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return -100.0;
    }
    20.0 * linear.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let cell = AtomicF32::new(0.25);
        assert_eq!(cell.load(Ordering::Relaxed), 0.25);

        cell.store(-3.75, Ordering::Relaxed);
        assert_eq!(cell.load(Ordering::Relaxed), -3.75);
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501187).abs() < 1e-4);
        assert!((linear_to_db(1.0)).abs() < 1e-6);
        assert_eq!(linear_to_db(0.0), -100.0);
    }
}
