//! Algorithmic reverb built from a diffuser and a feedback delay network
//!
//! Four cascaded diffusion stages (8 parallel delay lines each, Hadamard
//! mixed, pseudo-random lengths and polarities) feed an 8-line feedback
//! network mixed by a Householder reflection. Delay tunings are drawn from
//! fixed seeds so a given configuration always sounds the same.
//!
//! All delay storage is allocated once for the largest room size; parameter
//! changes only re-derive read offsets and the feedback gain, so retuning is
//! safe on the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::util::AtomicF32;

/// Parallel channels in the diffuser and feedback network
const NUM_CHANNELS: usize = 8;

/// Cascaded diffusion stages
const DIFFUSION_STEPS: usize = 4;

/// Room size 0..1 maps linearly onto this base-delay range in milliseconds
const MIN_ROOM_MS: f32 = 20.0;
const MAX_ROOM_MS: f32 = 200.0;

/// Seed base for the per-stage delay tunings
const SEED_BASE: u64 = 12345;
const SEED_STRIDE: u64 = 6789;

/// Shared parameter cells, written by control threads
#[derive(Debug)]
pub struct ReverbParams {
    enabled: AtomicBool,
    room_size: AtomicF32,
    decay_time: AtomicF32,
    dry: AtomicF32,
    wet: AtomicF32,
    dirty: AtomicBool,
    clear_requested: AtomicBool,
}

impl ReverbParams {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            room_size: AtomicF32::new(0.3),
            decay_time: AtomicF32::new(2.0),
            dry: AtomicF32::new(1.0),
            wet: AtomicF32::new(0.3),
            dirty: AtomicBool::new(false),
            clear_requested: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_room_size(&self, size: f32) {
        self.room_size.store(size.clamp(0.0, 1.0), Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_decay_time(&self, seconds: f32) {
        self.decay_time
            .store(seconds.clamp(0.1, 10.0), Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn set_mix(&self, dry: f32, wet: f32) {
        self.dry.store(dry.clamp(0.0, 1.0), Ordering::Relaxed);
        self.wet.store(wet.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    /// Ask the audio thread to zero all delay state (kills the tail).
    pub fn request_clear(&self) {
        self.clear_requested.store(true, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn room_size(&self) -> f32 {
        self.room_size.load(Ordering::Relaxed)
    }

    pub fn decay_time(&self) -> f32 {
        self.decay_time.load(Ordering::Relaxed)
    }

    pub fn dry(&self) -> f32 {
        self.dry.load(Ordering::Relaxed)
    }

    pub fn wet(&self) -> f32 {
        self.wet.load(Ordering::Relaxed)
    }
}

/// Fixed-capacity integer-delay line
struct DelayLine {
    buf: Vec<f32>,
    pos: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn write(&mut self, value: f32) {
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        self.buf[self.pos] = value;
    }

    #[inline]
    fn read(&self, delay: usize) -> f32 {
        let n = self.buf.len();
        self.buf[(self.pos + n - delay) % n]
    }

    fn clear(&mut self) {
        self.buf.fill(0.0);
    }

    fn max_delay(&self) -> usize {
        self.buf.len() - 1
    }
}

/// 8x8 Hadamard mix, energy preserving (scaled by 1/sqrt(8))
#[inline]
fn hadamard_in_place(data: &mut [f32; NUM_CHANNELS]) {
    let mut h = 1;
    while h < NUM_CHANNELS {
        let mut i = 0;
        while i < NUM_CHANNELS {
            for j in i..i + h {
                let x = data[j];
                let y = data[j + h];
                data[j] = x + y;
                data[j + h] = x - y;
            }
            i += h * 2;
        }
        h *= 2;
    }
    let scale = 1.0 / (NUM_CHANNELS as f32).sqrt();
    for value in data.iter_mut() {
        *value *= scale;
    }
}

/// 8x8 Householder reflection about the all-ones vector
#[inline]
fn householder_in_place(data: &mut [f32; NUM_CHANNELS]) {
    let factor = -2.0 / NUM_CHANNELS as f32;
    let sum: f32 = data.iter().sum();
    for value in data.iter_mut() {
        *value += factor * sum;
    }
}

/// One diffusion stage: parallel delays, Hadamard mix, polarity flips
struct DiffusionStep {
    delay_samples: [usize; NUM_CHANNELS],
    delays: Vec<DelayLine>,
    flip_polarity: [bool; NUM_CHANNELS],
}

impl DiffusionStep {
    /// Capacity covers the largest range this stage can ever be tuned to.
    fn new(max_range_samples: usize) -> Self {
        let delays = (0..NUM_CHANNELS)
            .map(|c| DelayLine::new(max_range_samples * (c + 1) / NUM_CHANNELS + 2))
            .collect();
        Self {
            delay_samples: [0; NUM_CHANNELS],
            delays,
            flip_polarity: [false; NUM_CHANNELS],
        }
    }

    /// Draw line lengths from disjoint sub-ranges of [0, range) and pick
    /// polarities, all from the stage seed. No allocation.
    fn configure(&mut self, range_samples: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for c in 0..NUM_CHANNELS {
            let range_low = range_samples * c as f32 / NUM_CHANNELS as f32;
            let range_high = range_samples * (c + 1) as f32 / NUM_CHANNELS as f32;
            let delay = range_low + rng.gen::<f32>() * (range_high - range_low);
            self.delay_samples[c] = (delay as usize).min(self.delays[c].max_delay());
            self.flip_polarity[c] = rng.gen::<f32>() > 0.5;
        }
    }

    fn reset(&mut self) {
        for delay in &mut self.delays {
            delay.clear();
        }
    }

    fn process(&mut self, input: &[f32; NUM_CHANNELS]) -> [f32; NUM_CHANNELS] {
        let mut mixed = [0.0f32; NUM_CHANNELS];
        for c in 0..NUM_CHANNELS {
            self.delays[c].write(input[c]);
            mixed[c] = self.delays[c].read(self.delay_samples[c]);
        }

        hadamard_in_place(&mut mixed);

        for c in 0..NUM_CHANNELS {
            if self.flip_polarity[c] {
                mixed[c] = -mixed[c];
            }
        }

        mixed
    }
}

/// Late reverberation: parallel delays with Householder-mixed feedback
struct FeedbackNetwork {
    delay_samples: [usize; NUM_CHANNELS],
    delays: Vec<DelayLine>,
    decay_gain: f32,
}

impl FeedbackNetwork {
    fn new(max_base_samples: usize) -> Self {
        // Longest line is 2^(7/8) times the base delay
        let delays = (0..NUM_CHANNELS)
            .map(|c| {
                let scale = 2.0f32.powf(c as f32 / NUM_CHANNELS as f32);
                DelayLine::new((max_base_samples as f32 * scale) as usize + 2)
            })
            .collect();
        Self {
            delay_samples: [0; NUM_CHANNELS],
            delays,
            decay_gain: 0.85,
        }
    }

    /// Distribute lengths exponentially between base and 2x base.
    fn configure(&mut self, base_samples: f32) {
        for c in 0..NUM_CHANNELS {
            let scale = 2.0f32.powf(c as f32 / NUM_CHANNELS as f32);
            self.delay_samples[c] =
                ((base_samples * scale) as usize).min(self.delays[c].max_delay());
        }
    }

    fn reset(&mut self) {
        for delay in &mut self.delays {
            delay.clear();
        }
    }

    fn process(&mut self, input: &[f32; NUM_CHANNELS]) -> [f32; NUM_CHANNELS] {
        let mut delayed = [0.0f32; NUM_CHANNELS];
        for c in 0..NUM_CHANNELS {
            delayed[c] = self.delays[c].read(self.delay_samples[c]);
        }

        let mut mixed = delayed;
        householder_in_place(&mut mixed);

        for c in 0..NUM_CHANNELS {
            self.delays[c].write(input[c] + mixed[c] * self.decay_gain);
        }

        delayed
    }
}

/// Complete reverb (audio-thread state)
pub struct Reverb {
    params: Arc<ReverbParams>,
    sample_rate: u32,

    diffuser: [DiffusionStep; DIFFUSION_STEPS],
    feedback: FeedbackNetwork,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let max_room_samples = (MAX_ROOM_MS * 0.001 * sample_rate as f32) as usize;

        // Stage ranges halve from the full room size
        let diffuser = std::array::from_fn(|i| DiffusionStep::new(max_room_samples >> i));
        let feedback = FeedbackNetwork::new(max_room_samples);

        let mut reverb = Self {
            params: Arc::new(ReverbParams::new()),
            sample_rate,
            diffuser,
            feedback,
        };
        reverb.reconfigure();
        reverb
    }

    /// Handle to the shared parameter cells.
    pub fn params(&self) -> Arc<ReverbParams> {
        Arc::clone(&self.params)
    }

    /// Re-derive delay tunings and feedback gain from the parameter cells.
    fn reconfigure(&mut self) {
        let size = self.params.room_size.load(Ordering::Relaxed);
        let room_ms = MIN_ROOM_MS + size * (MAX_ROOM_MS - MIN_ROOM_MS);
        let room_samples = room_ms * 0.001 * self.sample_rate as f32;

        let mut range = room_samples;
        for (i, step) in self.diffuser.iter_mut().enumerate() {
            step.configure(range, SEED_BASE + i as u64 * SEED_STRIDE);
            range *= 0.5;
        }

        self.feedback.configure(room_samples);

        // Feedback gain so a typical loop has decayed by 60 dB after RT60
        let rt60 = self.params.decay_time.load(Ordering::Relaxed);
        let typical_loop_ms = room_ms * 1.5;
        let loops_per_rt60 = rt60 / (typical_loop_ms * 0.001);
        let db_per_cycle = -60.0 / loops_per_rt60;
        self.feedback.decay_gain = 10.0f32.powf(db_per_cycle * 0.05);
    }

    /// Zero all delay state.
    pub fn clear_buffers(&mut self) {
        for step in &mut self.diffuser {
            step.reset();
        }
        self.feedback.reset();
    }

    /// Process a stereo pair in place. The caller checks the enabled cell;
    /// a disabled reverb leaves the buffers untouched.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.params.clear_requested.swap(false, Ordering::AcqRel) {
            self.clear_buffers();
        }
        if self.params.dirty.swap(false, Ordering::AcqRel) {
            self.reconfigure();
        }

        let dry = self.params.dry.load(Ordering::Relaxed);
        let wet = self.params.wet.load(Ordering::Relaxed);
        let half = (NUM_CHANNELS / 2) as f32;

        for i in 0..left.len().min(right.len()) {
            let input_l = left[i];
            let input_r = right[i];

            let mut multichannel = [0.0f32; NUM_CHANNELS];
            for (c, value) in multichannel.iter_mut().enumerate() {
                *value = if c % 2 == 0 { input_l } else { input_r };
            }

            let mut diffuse = multichannel;
            for step in &mut self.diffuser {
                diffuse = step.process(&diffuse);
            }

            let long_lasting = self.feedback.process(&diffuse);

            let mut left_sum = 0.0f32;
            let mut right_sum = 0.0f32;
            for (c, &value) in long_lasting.iter().enumerate() {
                if c % 2 == 0 {
                    left_sum += value;
                } else {
                    right_sum += value;
                }
            }

            left[i] = dry * input_l + wet * left_sum / half;
            right[i] = dry * input_r + wet * right_sum / half;
        }
    }
}
