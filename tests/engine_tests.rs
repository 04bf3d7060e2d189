//! End-to-end engine scenarios
//!
//! Runs the whole graph the way the driver glue does: fixed 48 kHz clock,
//! 128 frame blocks, parameters poked between blocks.

use hoopi_pi::{Engine, StereoMode};

const SAMPLE_RATE: u32 = 48000;
const BLOCK: usize = 128;

/// Engine with every stage neutral: model bypassed, gains unity, gate off,
/// DC blocker off, EQ off, reverb off.
fn neutral_engine() -> Engine {
    let engine = Engine::new(SAMPLE_RATE, BLOCK);
    engine.set_bypass_model(true);
    engine
}

fn process_block(engine: &Engine, input_l: &[f32], input_r: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mut out_l = vec![0.0f32; input_l.len()];
    let mut out_r = vec![0.0f32; input_r.len()];
    engine.process_stereo(input_l, input_r, &mut out_l, &mut out_r, None);
    (out_l, out_r)
}

fn sine(freq: f64, n: usize, amplitude: f32) -> Vec<f32> {
    (0..n)
        .map(|i| {
            (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin() as f32
                * amplitude
        })
        .collect()
}

#[test]
fn silence_in_silence_out() {
    let engine = neutral_engine();
    let zeros = vec![0.0f32; BLOCK];

    for _ in 0..4 {
        let (out_l, out_r) = process_block(&engine, &zeros, &zeros);
        assert!(out_l.iter().all(|&s| s == 0.0));
        assert!(out_r.iter().all(|&s| s == 0.0));
    }
}

#[test]
fn dc_offset_decays_below_threshold() {
    let engine = neutral_engine();
    engine.set_dc_blocker(true);

    let dc = vec![0.5f32; BLOCK];
    let mut last_sample = 1.0f32;
    // 16 blocks = 2048 samples, comfortably past the 1000-sample bound
    for _ in 0..16 {
        let (out_l, _) = process_block(&engine, &dc, &dc);
        last_sample = out_l[BLOCK - 1];
    }

    assert!(
        last_sample.abs() < 1e-3,
        "DC residue after 2048 samples: {}",
        last_sample
    );
}

#[test]
fn noise_gate_silences_signal_below_threshold() {
    let engine = neutral_engine();
    engine.set_noise_gate(true, -20.0);

    // 0.01 is about -40 dB, well under the -20 dB threshold
    let quiet = vec![0.01f32; BLOCK];
    let mut out = Vec::new();
    for _ in 0..8 {
        out = process_block(&engine, &quiet, &quiet).0;
    }

    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn whole_engine_bypass_is_sample_exact() {
    let engine = Engine::new(SAMPLE_RATE, BLOCK);
    engine.set_bypass(true);
    // These must all be ignored under bypass
    engine.set_input_gain(12.0);
    engine.set_eq_enabled(true);
    engine.set_eq_bass(20.0);
    engine.reverb().set_enabled(true);

    let input_l = sine(440.0, BLOCK, 0.8);
    let input_r = sine(220.0, BLOCK, 0.8);
    let (out_l, out_r) = process_block(&engine, &input_l, &input_r);

    assert_eq!(out_l, input_l);
    assert_eq!(out_r, input_r);
}

#[test]
fn neutral_chain_is_sample_exact() {
    let engine = neutral_engine();
    engine.set_stereo_mode(StereoMode::Stereo2Stereo);

    let input_l = sine(440.0, BLOCK, 0.5);
    let input_r = sine(330.0, BLOCK, 0.5);
    let (out_l, out_r) = process_block(&engine, &input_l, &input_r);

    assert_eq!(out_l, input_l);
    assert_eq!(out_r, input_r);
}

#[test]
fn oversized_block_is_counted_and_passed_through() {
    let engine = neutral_engine();
    let input = sine(100.0, BLOCK * 2, 0.3);

    let (out_l, _) = process_block(&engine, &input, &input);

    assert_eq!(engine.xrun_count(), 1);
    assert_eq!(out_l, input);
}

#[test]
fn max_block_succeeds_without_xrun() {
    let engine = neutral_engine();
    let input = sine(100.0, BLOCK, 0.3);

    let (out_l, _) = process_block(&engine, &input, &input);

    assert_eq!(engine.xrun_count(), 0);
    assert_eq!(out_l, input);
}

#[test]
fn reverb_dry_only_matches_input() {
    let engine = neutral_engine();
    engine.reverb().set_enabled(true);
    engine.reverb().set_mix(1.0, 0.0);

    let input = sine(440.0, BLOCK, 0.5);
    let (out_l, _) = process_block(&engine, &input, &input);

    for (a, b) in out_l.iter().zip(input.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn recording_captures_processed_output() {
    let engine = neutral_engine();

    let name = format!("engine-test-{}", std::process::id());
    let path = engine.start_recording(&name).expect("start recording");
    assert!(engine.is_recording());

    // One second of a 440 Hz sine through the neutral chain
    let input = sine(440.0, SAMPLE_RATE as usize, 0.5);
    for chunk in input.chunks(BLOCK) {
        let mut out_l = vec![0.0f32; chunk.len()];
        let mut out_r = vec![0.0f32; chunk.len()];
        engine.process_stereo(chunk, chunk, &mut out_l, &mut out_r, None);
    }

    // Let the writer drain, then finalize
    std::thread::sleep(std::time::Duration::from_millis(300));
    engine.stop_recording();
    assert!(!engine.is_recording());

    let reader = hound::WavReader::open(&path).expect("open recording");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);

    let frames = reader.len() / 2;
    let dropped = engine.recording_dropped_frames() as u32;
    // Duration is 1.000 s give or take dropped frames
    assert_eq!(frames + dropped, SAMPLE_RATE);

    // Samples match the input within int16 quantization
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .map(|s| s.expect("sample"))
        .collect();
    for (i, frame) in samples.chunks(2).take(4096).enumerate() {
        let expected = (input[i].clamp(-1.0, 1.0) * 32767.0) as i16;
        assert!(
            (frame[0] - expected).abs() <= 1,
            "frame {}: got {} expected {}",
            i,
            frame[0],
            expected
        );
        assert_eq!(frame[0], frame[1]);
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn clamp_extremes_produce_finite_output() {
    let engine = Engine::new(SAMPLE_RATE, BLOCK);
    engine.set_bypass_model(true);
    engine.set_eq_enabled(true);
    engine.set_eq_bass(20.0);
    engine.set_eq_mid(20.0);
    engine.set_eq_treble(20.0);
    engine.set_input_gain(-300.0); // effectively -inf
    engine.set_output_gain(20.0);
    engine.set_noise_gate(true, 0.0);
    engine.set_dc_blocker(true);
    engine.reverb().set_enabled(true);
    engine.reverb().set_mix(1.0, 1.0);
    engine.reverb().set_room_size(1.0);
    engine.reverb().set_decay_time(10.0);

    let input = sine(881.0, BLOCK, 1.0);
    for _ in 0..100 {
        let (out_l, out_r) = process_block(&engine, &input, &input);
        assert!(out_l.iter().chain(out_r.iter()).all(|s| s.is_finite()));
    }
}
