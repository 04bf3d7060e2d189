//! Stress tests for parameter changes under load
//!
//! Validates that the engine survives rapid control traffic (slider spam,
//! preset switching) while the audio path keeps producing finite output,
//! and that device enumeration stays consistent under repeated calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hoopi_pi::audio::list_input_devices;
use hoopi_pi::{Engine, StereoMode};
use rand::Rng;

/// Random parameter changes racing a live processing loop.
///
/// A worker thread hammers every setter with random values while the main
/// thread processes blocks. The output must stay finite and nothing may
/// panic or poison a lock.
#[test]
fn test_rapid_parameter_changes_while_processing() {
    let engine = Arc::new(Engine::new(48000, 128));
    engine.set_bypass_model(true);

    let stop = Arc::new(AtomicBool::new(false));
    let control_engine = Arc::clone(&engine);
    let control_stop = Arc::clone(&stop);

    let control = std::thread::spawn(move || {
        let mut rng = rand::thread_rng();
        while !control_stop.load(Ordering::Acquire) {
            match rng.gen_range(0..8) {
                0 => {
                    control_engine.set_input_gain_l(rng.gen_range(-60.0..20.0));
                    control_engine.set_output_gain_r(rng.gen_range(-60.0..20.0));
                }
                1 => {
                    control_engine
                        .set_noise_gate(rng.gen_bool(0.5), rng.gen_range(-120.0..0.0));
                }
                2 => {
                    control_engine.set_eq_enabled(rng.gen_bool(0.5));
                    control_engine.set_eq_bass(rng.gen_range(-25.0..25.0));
                    control_engine.set_eq_mid(rng.gen_range(-25.0..25.0));
                    control_engine.set_eq_treble(rng.gen_range(-25.0..25.0));
                }
                3 => {
                    control_engine.reverb().set_enabled(rng.gen_bool(0.5));
                    control_engine.reverb().set_room_size(rng.gen_range(0.0..1.0));
                    control_engine.reverb().set_decay_time(rng.gen_range(0.1..10.0));
                    control_engine
                        .reverb()
                        .set_mix(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
                }
                4 => {
                    let mode = match rng.gen_range(0..4) {
                        0 => StereoMode::LeftMono2Stereo,
                        1 => StereoMode::Stereo2Stereo,
                        2 => StereoMode::RightMono2Stereo,
                        _ => StereoMode::Stereo2Mono,
                    };
                    control_engine.set_stereo_mode(mode);
                }
                5 => {
                    control_engine.set_stereo2mono_mix_l(rng.gen_range(0.0..1.0));
                    control_engine.set_stereo2mono_mix_r(rng.gen_range(0.0..1.0));
                }
                6 => {
                    control_engine.set_dc_blocker(rng.gen_bool(0.5));
                    control_engine.set_normalize(rng.gen_bool(0.5));
                }
                _ => {
                    control_engine.set_active_model(rng.gen_range(0..2));
                    control_engine.set_bypass_model_l(rng.gen_bool(0.5));
                    control_engine.set_bypass_model_r(rng.gen_bool(0.5));
                }
            }
        }
    });

    let input: Vec<f32> = (0..128)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin() * 0.5)
        .collect();
    let mut out_l = vec![0.0f32; 128];
    let mut out_r = vec![0.0f32; 128];

    for _ in 0..2000 {
        engine.process_stereo(&input, &input, &mut out_l, &mut out_r, None);
        assert!(
            out_l.iter().chain(out_r.iter()).all(|s| s.is_finite()),
            "non-finite sample under parameter stress"
        );
    }

    stop.store(true, Ordering::Release);
    control.join().expect("control thread panicked");

    // Setters and getters still work after the storm
    engine.set_input_gain(0.0);
    assert!(engine.input_gain().abs() < 1e-3);
    assert_eq!(engine.xrun_count(), 0);
}

/// Device enumeration under rapid successive calls.
///
/// True hotswap needs hardware; this validates that enumeration is
/// panic-free and consistent, including on CI hosts with no devices.
#[test]
fn test_device_enumeration_stress() {
    let mut device_counts = Vec::new();
    for _ in 0..50 {
        match list_input_devices() {
            Ok(devices) => device_counts.push(devices.len()),
            Err(e) => {
                // Enumeration can fail in CI environments
                println!("device enumeration failed (expected in CI): {:?}", e);
            }
        }
    }

    if !device_counts.is_empty() {
        let first = device_counts[0];
        assert!(
            device_counts.iter().all(|&c| c == first),
            "device count changed between calls: {:?}",
            device_counts
        );
    }
}
