//! Main audio processing engine
//!
//! Composes the per-channel chains (input gain, noise gate, neural model,
//! tone stack, DC blocker, output gain), the shared reverb and the
//! recording tap into one block-processing call. All parameters cross
//! threads as single-word atomic cells; the stateful filters live behind a
//! mutex that only the audio thread takes (try-lock, passthrough on the
//! rare contention).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dsp::{
    DCBlocker, EqParams, GateParams, NoiseGate, Reverb, ReverbParams, ThreeBandEQ,
};
use crate::model::ModelSlot;
use crate::recorder::{Recorder, RecorderError};
use crate::util::{db_to_linear, linear_to_db, AtomicF32};

/// Model slots available for A/B switching
pub const NUM_SLOTS: usize = 2;

/// One-pole coefficient for input/output gain smoothing
const GAIN_SMOOTH_COEFF: f32 = 0.999;

/// IIR coefficient for RMS metering, ~100 ms at 48 kHz
const METER_COEFF: f32 = 0.99;

/// Meter floor in dB
const METER_FLOOR_DB: f32 = -120.0;

/// Stereo processing modes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoMode {
    /// Process left input only, output to both L/R
    LeftMono2Stereo,
    /// Process left and right inputs independently
    Stereo2Stereo,
    /// Process right input only, output to both L/R
    RightMono2Stereo,
    /// Mix both inputs, process as mono, output to both L/R
    Stereo2Mono,
}

impl StereoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StereoMode::LeftMono2Stereo => "LeftMono2Stereo",
            StereoMode::Stereo2Stereo => "Stereo2Stereo",
            StereoMode::RightMono2Stereo => "RightMono2Stereo",
            StereoMode::Stereo2Mono => "Stereo2Mono",
        }
    }

    /// Unknown strings fall back to LeftMono2Stereo.
    pub fn parse(s: &str) -> Self {
        match s {
            "Stereo2Stereo" => StereoMode::Stereo2Stereo,
            "RightMono2Stereo" => StereoMode::RightMono2Stereo,
            "Stereo2Mono" => StereoMode::Stereo2Mono,
            _ => StereoMode::LeftMono2Stereo,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => StereoMode::Stereo2Stereo,
            2 => StereoMode::RightMono2Stereo,
            3 => StereoMode::Stereo2Mono,
            _ => StereoMode::LeftMono2Stereo,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StereoMode::LeftMono2Stereo => 0,
            StereoMode::Stereo2Stereo => 1,
            StereoMode::RightMono2Stereo => 2,
            StereoMode::Stereo2Mono => 3,
        }
    }
}

/// Stateful audio-thread side of the graph
struct DspState {
    gate_l: NoiseGate,
    gate_r: NoiseGate,
    dc_l: DCBlocker,
    dc_r: DCBlocker,
    eq_l: ThreeBandEQ,
    eq_r: ThreeBandEQ,
    reverb: Reverb,

    // Smoothed gain shadows, never read by controls
    cur_input_gain_l: f32,
    cur_input_gain_r: f32,
    cur_output_gain_l: f32,
    cur_output_gain_r: f32,

    // IIR accumulators for RMS metering
    input_rms_acc: f32,
    output_rms_acc: f32,

    // Pre-allocated block scratch
    buf_l: Vec<f32>,
    buf_r: Vec<f32>,
    rec_l: Vec<f32>,
    rec_r: Vec<f32>,
}

pub struct Engine {
    sample_rate: u32,
    max_block: usize,

    // Stereo routing
    stereo_mode: AtomicU8,
    stereo2mono_mix_l: AtomicF32,
    stereo2mono_mix_r: AtomicF32,

    // Model slots; the legacy single active-slot view is derived from the
    // per-channel cells
    slots: [ModelSlot; NUM_SLOTS],
    active_slot_l: AtomicUsize,
    active_slot_r: AtomicUsize,

    // Per-channel gain cells (linear)
    input_gain_l: AtomicF32,
    input_gain_r: AtomicF32,
    output_gain_l: AtomicF32,
    output_gain_r: AtomicF32,

    // Flags
    bypass: AtomicBool,
    bypass_model_l: AtomicBool,
    /// Right channel defaults to bypassed: in Stereo2Stereo it carries a
    /// microphone, not a guitar
    bypass_model_r: AtomicBool,
    normalize: AtomicBool,
    gate_enabled_l: AtomicBool,
    gate_enabled_r: AtomicBool,
    dc_blocker_enabled: AtomicBool,
    include_backing_track_in_recording: AtomicBool,

    // Parameter handles into the stateful blocks
    gate_params_l: Arc<GateParams>,
    gate_params_r: Arc<GateParams>,
    eq_params_l: Arc<EqParams>,
    eq_params_r: Arc<EqParams>,
    reverb_params: Arc<ReverbParams>,

    recorder: Recorder,

    // Monitoring
    xrun_count: AtomicU32,
    lock_contention: AtomicU64,

    // Level meters in dB, written by the audio thread
    input_peak: AtomicF32,
    input_rms: AtomicF32,
    output_peak: AtomicF32,
    output_rms: AtomicF32,

    dsp: Mutex<DspState>,
}

/// Peak and IIR-smoothed RMS over a stereo pair, stored as dB cells.
fn measure_levels(
    left: &[f32],
    right: &[f32],
    rms_acc: &mut f32,
    peak_cell: &AtomicF32,
    rms_cell: &AtomicF32,
) {
    let mut peak: f32 = 0.0;
    for &sample in left.iter().chain(right.iter()) {
        let abs = sample.abs();
        if abs > peak {
            peak = abs;
        }
        *rms_acc = METER_COEFF * *rms_acc + (1.0 - METER_COEFF) * (sample * sample);
    }

    let peak_db = if peak > 0.0 {
        20.0 * peak.log10()
    } else {
        METER_FLOOR_DB
    };
    // RMS is the square root of the mean square, so 10*log10
    let rms_db = if *rms_acc > 0.0 {
        10.0 * rms_acc.log10()
    } else {
        METER_FLOOR_DB
    };
    peak_cell.store(peak_db.max(METER_FLOOR_DB), Ordering::Relaxed);
    rms_cell.store(rms_db.max(METER_FLOOR_DB), Ordering::Relaxed);
}

impl Engine {
    /// Build the engine for a fixed sample rate and maximum block size.
    /// Every allocation the audio path needs happens here.
    pub fn new(sample_rate: u32, max_block: usize) -> Self {
        let gate_l = NoiseGate::new(sample_rate);
        let gate_r = NoiseGate::new(sample_rate);
        let eq_l = ThreeBandEQ::new(sample_rate);
        let eq_r = ThreeBandEQ::new(sample_rate);
        let reverb = Reverb::new(sample_rate);

        let gate_params_l = gate_l.params();
        let gate_params_r = gate_r.params();
        let eq_params_l = eq_l.params();
        let eq_params_r = eq_r.params();
        let reverb_params = reverb.params();

        let dsp = DspState {
            gate_l,
            gate_r,
            dc_l: DCBlocker::new(sample_rate),
            dc_r: DCBlocker::new(sample_rate),
            eq_l,
            eq_r,
            reverb,
            cur_input_gain_l: 1.0,
            cur_input_gain_r: 1.0,
            cur_output_gain_l: 1.0,
            cur_output_gain_r: 1.0,
            input_rms_acc: 0.0,
            output_rms_acc: 0.0,
            buf_l: vec![0.0; max_block],
            buf_r: vec![0.0; max_block],
            rec_l: vec![0.0; max_block],
            rec_r: vec![0.0; max_block],
        };

        Self {
            sample_rate,
            max_block,
            stereo_mode: AtomicU8::new(StereoMode::LeftMono2Stereo.as_u8()),
            stereo2mono_mix_l: AtomicF32::new(0.5),
            stereo2mono_mix_r: AtomicF32::new(0.5),
            slots: [ModelSlot::new(max_block), ModelSlot::new(max_block)],
            active_slot_l: AtomicUsize::new(0),
            active_slot_r: AtomicUsize::new(0),
            input_gain_l: AtomicF32::new(1.0),
            input_gain_r: AtomicF32::new(1.0),
            output_gain_l: AtomicF32::new(1.0),
            output_gain_r: AtomicF32::new(1.0),
            bypass: AtomicBool::new(false),
            bypass_model_l: AtomicBool::new(false),
            bypass_model_r: AtomicBool::new(true),
            normalize: AtomicBool::new(true),
            gate_enabled_l: AtomicBool::new(false),
            gate_enabled_r: AtomicBool::new(false),
            dc_blocker_enabled: AtomicBool::new(false),
            include_backing_track_in_recording: AtomicBool::new(false),
            gate_params_l,
            gate_params_r,
            eq_params_l,
            eq_params_r,
            reverb_params,
            recorder: Recorder::new(crate::recorder::default_recordings_dir(), sample_rate),
            xrun_count: AtomicU32::new(0),
            lock_contention: AtomicU64::new(0),
            input_peak: AtomicF32::new(METER_FLOOR_DB),
            input_rms: AtomicF32::new(METER_FLOOR_DB),
            output_peak: AtomicF32::new(METER_FLOOR_DB),
            output_rms: AtomicF32::new(METER_FLOOR_DB),
            dsp: Mutex::new(dsp),
        }
    }

    // ===== Audio processing =====

    /// Process one stereo block. `track` carries the current backing-track
    /// block when it is playing, for the optional recording mix.
    ///
    /// Real-time safe: no allocation, no blocking, bounded work.
    pub fn process_stereo(
        &self,
        input_l: &[f32],
        input_r: &[f32],
        output_l: &mut [f32],
        output_r: &mut [f32],
        track: Option<(&[f32], &[f32])>,
    ) {
        let n = input_l
            .len()
            .min(input_r.len())
            .min(output_l.len())
            .min(output_r.len());
        if n == 0 {
            return;
        }

        if n > self.max_block {
            self.xrun_count.fetch_add(1, Ordering::Relaxed);
            output_l[..n].copy_from_slice(&input_l[..n]);
            output_r[..n].copy_from_slice(&input_r[..n]);
            return;
        }

        if self.bypass.load(Ordering::Relaxed) {
            output_l[..n].copy_from_slice(&input_l[..n]);
            output_r[..n].copy_from_slice(&input_r[..n]);
            return;
        }

        let Ok(mut dsp) = self.dsp.try_lock() else {
            self.lock_contention.fetch_add(1, Ordering::Relaxed);
            output_l[..n].copy_from_slice(&input_l[..n]);
            output_r[..n].copy_from_slice(&input_r[..n]);
            return;
        };
        let dsp = &mut *dsp;

        let mode = StereoMode::from_u8(self.stereo_mode.load(Ordering::Relaxed));
        let normalize = self.normalize.load(Ordering::Relaxed);

        // ----- Left chain -----

        match mode {
            StereoMode::Stereo2Mono => {
                let mix_l = self.stereo2mono_mix_l.load(Ordering::Relaxed);
                let mix_r = self.stereo2mono_mix_r.load(Ordering::Relaxed);
                for i in 0..n {
                    dsp.buf_l[i] = input_l[i] * mix_l + input_r[i] * mix_r;
                }
            }
            StereoMode::RightMono2Stereo => {
                dsp.buf_l[..n].copy_from_slice(&input_r[..n]);
            }
            _ => {
                dsp.buf_l[..n].copy_from_slice(&input_l[..n]);
            }
        }

        // Input level, measured on the selected source before the chain
        measure_levels(
            &dsp.buf_l[..n],
            &[],
            &mut dsp.input_rms_acc,
            &self.input_peak,
            &self.input_rms,
        );

        let target_in_l = self.input_gain_l.load(Ordering::Relaxed);
        for sample in dsp.buf_l[..n].iter_mut() {
            dsp.cur_input_gain_l =
                dsp.cur_input_gain_l * GAIN_SMOOTH_COEFF + target_in_l * (1.0 - GAIN_SMOOTH_COEFF);
            *sample *= dsp.cur_input_gain_l;
        }

        if self.gate_enabled_l.load(Ordering::Relaxed) {
            dsp.gate_l.process(&mut dsp.buf_l[..n]);
        }

        if !self.bypass_model_l.load(Ordering::Relaxed) {
            let slot = self.active_slot_l.load(Ordering::Acquire);
            if slot < NUM_SLOTS && self.slots[slot].is_ready() {
                self.slots[slot].process(&mut dsp.buf_l[..n], normalize);
            }
        }

        dsp.eq_l.process(&mut dsp.buf_l[..n]);

        if self.dc_blocker_enabled.load(Ordering::Relaxed) {
            dsp.dc_l.process(&mut dsp.buf_l[..n]);
        }

        let target_out_l = self.output_gain_l.load(Ordering::Relaxed);
        for sample in dsp.buf_l[..n].iter_mut() {
            dsp.cur_output_gain_l = dsp.cur_output_gain_l * GAIN_SMOOTH_COEFF
                + target_out_l * (1.0 - GAIN_SMOOTH_COEFF);
            *sample *= dsp.cur_output_gain_l;
        }

        // ----- Right chain -----

        if mode == StereoMode::Stereo2Stereo {
            dsp.buf_r[..n].copy_from_slice(&input_r[..n]);

            let target_in_r = self.input_gain_r.load(Ordering::Relaxed);
            for sample in dsp.buf_r[..n].iter_mut() {
                dsp.cur_input_gain_r = dsp.cur_input_gain_r * GAIN_SMOOTH_COEFF
                    + target_in_r * (1.0 - GAIN_SMOOTH_COEFF);
                *sample *= dsp.cur_input_gain_r;
            }

            if self.gate_enabled_r.load(Ordering::Relaxed) {
                dsp.gate_r.process(&mut dsp.buf_r[..n]);
            }

            // The right channel runs its model only when its own bypass
            // cell says so (it defaults to bypassed for mic input)
            if !self.bypass_model_r.load(Ordering::Relaxed) {
                let slot = self.active_slot_r.load(Ordering::Acquire);
                if slot < NUM_SLOTS && self.slots[slot].is_ready() {
                    self.slots[slot].process(&mut dsp.buf_r[..n], normalize);
                }
            }

            dsp.eq_r.process(&mut dsp.buf_r[..n]);

            if self.dc_blocker_enabled.load(Ordering::Relaxed) {
                dsp.dc_r.process(&mut dsp.buf_r[..n]);
            }

            let target_out_r = self.output_gain_r.load(Ordering::Relaxed);
            for sample in dsp.buf_r[..n].iter_mut() {
                dsp.cur_output_gain_r = dsp.cur_output_gain_r * GAIN_SMOOTH_COEFF
                    + target_out_r * (1.0 - GAIN_SMOOTH_COEFF);
                *sample *= dsp.cur_output_gain_r;
            }
        } else {
            // Mono modes mirror the fully processed left chain
            let DspState { buf_l, buf_r, .. } = dsp;
            buf_r[..n].copy_from_slice(&buf_l[..n]);
        }

        // ----- Shared reverb -----

        if self.reverb_params.enabled() {
            let DspState {
                reverb,
                buf_l,
                buf_r,
                ..
            } = dsp;
            reverb.process(&mut buf_l[..n], &mut buf_r[..n]);
        }

        measure_levels(
            &dsp.buf_l[..n],
            &dsp.buf_r[..n],
            &mut dsp.output_rms_acc,
            &self.output_peak,
            &self.output_rms,
        );

        // ----- Recording tap -----

        if self.recorder.is_recording() {
            let include_track = self.include_backing_track_in_recording.load(Ordering::Relaxed);
            match track {
                Some((track_l, track_r)) if include_track => {
                    let frames = n.min(track_l.len()).min(track_r.len());
                    for i in 0..frames {
                        dsp.rec_l[i] = dsp.buf_l[i] + track_l[i];
                        dsp.rec_r[i] = dsp.buf_r[i] + track_r[i];
                    }
                    self.recorder
                        .push_frames(&dsp.rec_l[..frames], &dsp.rec_r[..frames]);
                }
                _ => {
                    self.recorder.push_frames(&dsp.buf_l[..n], &dsp.buf_r[..n]);
                }
            }
        }

        output_l[..n].copy_from_slice(&dsp.buf_l[..n]);
        output_r[..n].copy_from_slice(&dsp.buf_r[..n]);
    }

    // ===== Model management =====

    pub fn load_model_async(&self, slot: usize, model_path: &str) {
        if slot >= NUM_SLOTS {
            return;
        }
        self.slots[slot].load_async(PathBuf::from(model_path));
    }

    pub fn is_model_ready(&self, slot: usize) -> bool {
        slot < NUM_SLOTS && self.slots[slot].is_ready()
    }

    pub fn model_path(&self, slot: usize) -> String {
        if slot >= NUM_SLOTS {
            return String::new();
        }
        self.slots[slot].model_path()
    }

    pub fn model_load_error(&self, slot: usize) -> String {
        if slot >= NUM_SLOTS {
            return String::new();
        }
        self.slots[slot].last_error()
    }

    pub fn unload_model(&self, slot: usize) {
        if slot >= NUM_SLOTS {
            return;
        }
        self.slots[slot].unload();
    }

    /// Select the slot for both channels.
    pub fn set_active_model(&self, slot: usize) {
        if slot < NUM_SLOTS {
            self.active_slot_l.store(slot, Ordering::Release);
            self.active_slot_r.store(slot, Ordering::Release);
        }
    }

    /// Legacy single-slot view, derived from the left channel.
    pub fn active_model(&self) -> usize {
        self.active_slot_l.load(Ordering::Acquire)
    }

    pub fn set_active_model_l(&self, slot: usize) {
        if slot < NUM_SLOTS {
            self.active_slot_l.store(slot, Ordering::Release);
        }
    }

    pub fn set_active_model_r(&self, slot: usize) {
        if slot < NUM_SLOTS {
            self.active_slot_r.store(slot, Ordering::Release);
        }
    }

    pub fn active_model_l(&self) -> usize {
        self.active_slot_l.load(Ordering::Acquire)
    }

    pub fn active_model_r(&self) -> usize {
        self.active_slot_r.load(Ordering::Acquire)
    }

    // ===== Stereo routing =====

    pub fn set_stereo_mode(&self, mode: StereoMode) {
        self.stereo_mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn stereo_mode(&self) -> StereoMode {
        StereoMode::from_u8(self.stereo_mode.load(Ordering::Relaxed))
    }

    pub fn set_stereo2mono_mix_l(&self, level: f32) {
        self.stereo2mono_mix_l
            .store(level.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    pub fn set_stereo2mono_mix_r(&self, level: f32) {
        self.stereo2mono_mix_r
            .store(level.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    pub fn stereo2mono_mix_l(&self) -> f32 {
        self.stereo2mono_mix_l.load(Ordering::Relaxed)
    }

    pub fn stereo2mono_mix_r(&self) -> f32 {
        self.stereo2mono_mix_r.load(Ordering::Relaxed)
    }

    // ===== Gains (dB in, stored linear) =====

    pub fn set_input_gain(&self, gain_db: f32) {
        let linear = db_to_linear(gain_db);
        self.input_gain_l.store(linear, Ordering::Relaxed);
        self.input_gain_r.store(linear, Ordering::Relaxed);
    }

    pub fn set_input_gain_l(&self, gain_db: f32) {
        self.input_gain_l
            .store(db_to_linear(gain_db), Ordering::Relaxed);
    }

    pub fn set_input_gain_r(&self, gain_db: f32) {
        self.input_gain_r
            .store(db_to_linear(gain_db), Ordering::Relaxed);
    }

    pub fn set_output_gain(&self, gain_db: f32) {
        let linear = db_to_linear(gain_db);
        self.output_gain_l.store(linear, Ordering::Relaxed);
        self.output_gain_r.store(linear, Ordering::Relaxed);
    }

    pub fn set_output_gain_l(&self, gain_db: f32) {
        self.output_gain_l
            .store(db_to_linear(gain_db), Ordering::Relaxed);
    }

    pub fn set_output_gain_r(&self, gain_db: f32) {
        self.output_gain_r
            .store(db_to_linear(gain_db), Ordering::Relaxed);
    }

    pub fn input_gain(&self) -> f32 {
        self.input_gain_l()
    }

    pub fn input_gain_l(&self) -> f32 {
        linear_to_db(self.input_gain_l.load(Ordering::Relaxed))
    }

    pub fn input_gain_r(&self) -> f32 {
        linear_to_db(self.input_gain_r.load(Ordering::Relaxed))
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain_l()
    }

    pub fn output_gain_l(&self) -> f32 {
        linear_to_db(self.output_gain_l.load(Ordering::Relaxed))
    }

    pub fn output_gain_r(&self) -> f32 {
        linear_to_db(self.output_gain_r.load(Ordering::Relaxed))
    }

    // ===== Flags =====

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
    }

    pub fn bypass(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }

    /// Legacy both-channel model bypass.
    pub fn set_bypass_model(&self, bypass: bool) {
        self.bypass_model_l.store(bypass, Ordering::Relaxed);
        self.bypass_model_r.store(bypass, Ordering::Relaxed);
    }

    pub fn bypass_model(&self) -> bool {
        self.bypass_model_l.load(Ordering::Relaxed)
    }

    pub fn set_bypass_model_l(&self, bypass: bool) {
        self.bypass_model_l.store(bypass, Ordering::Relaxed);
    }

    pub fn set_bypass_model_r(&self, bypass: bool) {
        self.bypass_model_r.store(bypass, Ordering::Relaxed);
    }

    pub fn bypass_model_l(&self) -> bool {
        self.bypass_model_l.load(Ordering::Relaxed)
    }

    pub fn bypass_model_r(&self) -> bool {
        self.bypass_model_r.load(Ordering::Relaxed)
    }

    pub fn set_normalize(&self, normalize: bool) {
        self.normalize.store(normalize, Ordering::Relaxed);
    }

    pub fn normalize(&self) -> bool {
        self.normalize.load(Ordering::Relaxed)
    }

    pub fn set_dc_blocker(&self, enabled: bool) {
        self.dc_blocker_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn dc_blocker_enabled(&self) -> bool {
        self.dc_blocker_enabled.load(Ordering::Relaxed)
    }

    // ===== Noise gate =====

    pub fn set_noise_gate(&self, enabled: bool, threshold_db: f32) {
        self.set_noise_gate_l(enabled, threshold_db);
        self.set_noise_gate_r(enabled, threshold_db);
    }

    pub fn set_noise_gate_l(&self, enabled: bool, threshold_db: f32) {
        self.gate_enabled_l.store(enabled, Ordering::Relaxed);
        self.gate_params_l.set_threshold(threshold_db);
    }

    pub fn set_noise_gate_r(&self, enabled: bool, threshold_db: f32) {
        self.gate_enabled_r.store(enabled, Ordering::Relaxed);
        self.gate_params_r.set_threshold(threshold_db);
    }

    pub fn noise_gate_enabled(&self) -> bool {
        self.noise_gate_enabled_l()
    }

    pub fn noise_gate_enabled_l(&self) -> bool {
        self.gate_enabled_l.load(Ordering::Relaxed)
    }

    pub fn noise_gate_enabled_r(&self) -> bool {
        self.gate_enabled_r.load(Ordering::Relaxed)
    }

    pub fn noise_gate_threshold(&self) -> f32 {
        self.noise_gate_threshold_l()
    }

    pub fn noise_gate_threshold_l(&self) -> f32 {
        self.gate_params_l.threshold()
    }

    pub fn noise_gate_threshold_r(&self) -> f32 {
        self.gate_params_r.threshold()
    }

    // ===== EQ =====

    pub fn eq_l(&self) -> &EqParams {
        &self.eq_params_l
    }

    pub fn eq_r(&self) -> &EqParams {
        &self.eq_params_r
    }

    pub fn set_eq_enabled(&self, enabled: bool) {
        self.eq_params_l.set_enabled(enabled);
        self.eq_params_r.set_enabled(enabled);
    }

    pub fn set_eq_bass(&self, db: f32) {
        self.eq_params_l.set_bass(db);
        self.eq_params_r.set_bass(db);
    }

    pub fn set_eq_mid(&self, db: f32) {
        self.eq_params_l.set_mid(db);
        self.eq_params_r.set_mid(db);
    }

    pub fn set_eq_treble(&self, db: f32) {
        self.eq_params_l.set_treble(db);
        self.eq_params_r.set_treble(db);
    }

    // ===== Reverb =====

    pub fn reverb(&self) -> &ReverbParams {
        &self.reverb_params
    }

    // ===== Recording =====

    pub fn start_recording(&self, filename: &str) -> Result<String, RecorderError> {
        self.recorder.start(filename)
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recording_file_path(&self) -> String {
        self.recorder.current_path()
    }

    pub fn recording_dropped_frames(&self) -> u64 {
        self.recorder.dropped_frames()
    }

    pub fn recording_duration(&self) -> f64 {
        self.recorder.duration()
    }

    pub fn set_include_backing_track_in_recording(&self, enabled: bool) {
        self.include_backing_track_in_recording
            .store(enabled, Ordering::Relaxed);
    }

    pub fn include_backing_track_in_recording(&self) -> bool {
        self.include_backing_track_in_recording
            .load(Ordering::Relaxed)
    }

    // ===== Monitoring =====

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block
    }

    pub fn xrun_count(&self) -> u32 {
        self.xrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_xrun_count(&self) {
        self.xrun_count.store(0, Ordering::Relaxed);
    }

    pub fn lock_contention_count(&self) -> u64 {
        self.lock_contention.load(Ordering::Relaxed)
    }

    /// Processing latency in samples.
    pub fn latency(&self) -> f32 {
        self.max_block as f32
    }

    // ===== Level meters (dB) =====

    pub fn input_peak_db(&self) -> f32 {
        self.input_peak.load(Ordering::Relaxed)
    }

    pub fn input_rms_db(&self) -> f32 {
        self.input_rms.load(Ordering::Relaxed)
    }

    pub fn output_peak_db(&self) -> f32 {
        self.output_peak.load(Ordering::Relaxed)
    }

    pub fn output_rms_db(&self) -> f32 {
        self.output_rms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutral_engine() -> Engine {
        let engine = Engine::new(48000, 128);
        engine.set_bypass_model(true);
        engine
    }

    fn run_block(engine: &Engine, input_l: &[f32], input_r: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut out_l = vec![0.0f32; input_l.len()];
        let mut out_r = vec![0.0f32; input_r.len()];
        engine.process_stereo(input_l, input_r, &mut out_l, &mut out_r, None);
        (out_l, out_r)
    }

    #[test]
    fn test_silence_in_silence_out() {
        let engine = neutral_engine();
        let zeros = vec![0.0f32; 128];

        for _ in 0..4 {
            let (out_l, out_r) = run_block(&engine, &zeros, &zeros);
            assert!(out_l.iter().all(|&s| s == 0.0));
            assert!(out_r.iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_bypass_is_identity() {
        let engine = Engine::new(48000, 128);
        engine.set_bypass(true);

        let input_l: Vec<f32> = (0..128).map(|i| (i as f32 * 0.05).sin()).collect();
        let input_r: Vec<f32> = (0..128).map(|i| (i as f32 * 0.07).cos()).collect();
        let (out_l, out_r) = run_block(&engine, &input_l, &input_r);

        assert_eq!(out_l, input_l);
        assert_eq!(out_r, input_r);
    }

    #[test]
    fn test_neutral_chain_is_identity() {
        // Model bypassed, gains unity, gate off, DC blocker off, EQ off,
        // reverb off: output equals input sample for sample
        let engine = neutral_engine();
        engine.set_stereo_mode(StereoMode::Stereo2Stereo);

        let input_l: Vec<f32> = (0..128).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let input_r: Vec<f32> = (0..128).map(|i| (i as f32 * 0.07).cos() * 0.5).collect();
        let (out_l, out_r) = run_block(&engine, &input_l, &input_r);

        assert_eq!(out_l, input_l);
        assert_eq!(out_r, input_r);
    }

    #[test]
    fn test_oversized_block_counts_xrun_and_passes_through() {
        let engine = neutral_engine();
        let input = vec![0.25f32; 256];

        let (out_l, _) = run_block(&engine, &input, &input);

        assert_eq!(engine.xrun_count(), 1);
        assert_eq!(out_l, input);
    }

    #[test]
    fn test_zero_length_block_is_noop() {
        let engine = neutral_engine();
        let empty: Vec<f32> = Vec::new();
        let (out_l, out_r) = run_block(&engine, &empty, &empty);
        assert!(out_l.is_empty());
        assert!(out_r.is_empty());
        assert_eq!(engine.xrun_count(), 0);
    }

    #[test]
    fn test_mono_modes_mirror_left_chain() {
        let engine = neutral_engine();
        engine.set_stereo_mode(StereoMode::LeftMono2Stereo);

        let input_l: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let input_r = vec![0.0f32; 128];
        let (out_l, out_r) = run_block(&engine, &input_l, &input_r);

        assert_eq!(out_l, out_r);
        assert_eq!(out_l, input_l);
    }

    #[test]
    fn test_right_mono_uses_right_input() {
        let engine = neutral_engine();
        engine.set_stereo_mode(StereoMode::RightMono2Stereo);

        let input_l = vec![0.0f32; 128];
        let input_r: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let (out_l, out_r) = run_block(&engine, &input_l, &input_r);

        assert_eq!(out_l, input_r);
        assert_eq!(out_r, input_r);
    }

    #[test]
    fn test_stereo2mono_mixes_inputs() {
        let engine = neutral_engine();
        engine.set_stereo_mode(StereoMode::Stereo2Mono);
        engine.set_stereo2mono_mix_l(0.5);
        engine.set_stereo2mono_mix_r(0.5);

        let input_l = vec![0.4f32; 128];
        let input_r = vec![0.2f32; 128];
        let (out_l, out_r) = run_block(&engine, &input_l, &input_r);

        for &s in &out_l {
            assert!((s - 0.3).abs() < 1e-6);
        }
        assert_eq!(out_l, out_r);
    }

    #[test]
    fn test_dc_blocker_removes_offset() {
        let engine = neutral_engine();
        engine.set_dc_blocker(true);

        let input = vec![0.5f32; 128];
        let mut last = 1.0f32;
        for _ in 0..20 {
            let (out_l, _) = run_block(&engine, &input, &input);
            last = out_l[127];
        }
        assert!(last.abs() < 1e-3, "residual DC after 2560 samples: {}", last);
    }

    #[test]
    fn test_noise_gate_closes_quiet_signal() {
        let engine = neutral_engine();
        engine.set_noise_gate(true, -20.0);

        // -40 dB input, below the -20 dB threshold
        let input = vec![0.01f32; 128];
        let mut out = (vec![], vec![]);
        for _ in 0..10 {
            out = run_block(&engine, &input, &input);
        }
        assert!(out.0.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_gain_smoothing_converges() {
        let engine = neutral_engine();
        engine.set_input_gain(-6.0);

        let input = vec![1.0f32; 128];
        let mut last = 0.0;
        for _ in 0..100 {
            let (out_l, _) = run_block(&engine, &input, &input);
            last = out_l[127];
        }
        let expected = db_to_linear(-6.0);
        assert!(
            (last - expected).abs() < 1e-3,
            "smoothed gain {} should approach {}",
            last,
            expected
        );
    }

    #[test]
    fn test_active_slot_round_trip() {
        let engine = Engine::new(48000, 128);
        engine.set_active_model(1);
        assert_eq!(engine.active_model(), 1);
        assert_eq!(engine.active_model_l(), 1);
        assert_eq!(engine.active_model_r(), 1);

        engine.set_active_model_l(0);
        assert_eq!(engine.active_model(), 0);
        assert_eq!(engine.active_model_r(), 1);

        // Out-of-range slots are ignored
        engine.set_active_model(7);
        assert_eq!(engine.active_model(), 0);
    }

    #[test]
    fn test_unload_round_trip() {
        let engine = Engine::new(48000, 128);
        engine.unload_model(0);
        assert!(!engine.is_model_ready(0));
        assert_eq!(engine.model_path(0), "");
    }

    #[test]
    fn test_extreme_parameters_stay_finite() {
        let engine = Engine::new(48000, 128);
        engine.set_bypass_model(true);
        engine.set_eq_enabled(true);
        engine.set_eq_bass(20.0);
        engine.set_eq_mid(-20.0);
        engine.set_eq_treble(20.0);
        engine.set_input_gain(-120.0);
        engine.set_output_gain(20.0);
        engine.set_noise_gate(true, 0.0);
        engine.set_dc_blocker(true);
        engine.reverb().set_enabled(true);
        engine.reverb().set_mix(1.0, 1.0);

        let input: Vec<f32> = (0..128).map(|i| ((i * 37) % 128) as f32 / 64.0 - 1.0).collect();
        for _ in 0..50 {
            let (out_l, out_r) = run_block(&engine, &input, &input);
            assert!(out_l.iter().chain(out_r.iter()).all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_level_meters_track_signal() {
        let engine = neutral_engine();
        assert_eq!(engine.output_peak_db(), -120.0);

        // Full-scale square wave: peak 0 dBFS, RMS 0 dB once settled
        let input = vec![1.0f32; 128];
        for _ in 0..100 {
            run_block(&engine, &input, &input);
        }

        assert!(engine.input_peak_db().abs() < 0.1);
        assert!(engine.output_peak_db().abs() < 0.1);
        assert!(engine.output_rms_db() > -1.0);

        // Silence drags the RMS back down, peak reads the current block
        let silence = vec![0.0f32; 128];
        for _ in 0..200 {
            run_block(&engine, &silence, &silence);
        }
        assert_eq!(engine.output_peak_db(), -120.0);
        assert!(engine.output_rms_db() < -40.0);
    }

    #[test]
    fn test_stereo_mode_parse_round_trip() {
        for mode in [
            StereoMode::LeftMono2Stereo,
            StereoMode::Stereo2Stereo,
            StereoMode::RightMono2Stereo,
            StereoMode::Stereo2Mono,
        ] {
            assert_eq!(StereoMode::parse(mode.as_str()), mode);
        }
        assert_eq!(StereoMode::parse("garbage"), StereoMode::LeftMono2Stereo);
    }
}
