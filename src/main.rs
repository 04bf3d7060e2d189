//! Supervisor entry point
//!
//! Restores the persisted parameter set, brings up the audio backend (or
//! degrades gracefully and retries), runs the control server, and
//! babysits the driver connection until shutdown.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use hoopi_pi::audio::{AudioBackend, BackendConfig, BackendStatus};
use hoopi_pi::cli::{self, Options};
use hoopi_pi::config::{default_config_path, ConfigStore};
use hoopi_pi::control::{ControlServer, DEFAULT_SOCKET_PATH};
use hoopi_pi::engine::{Engine, NUM_SLOTS};
use hoopi_pi::track::BackingTrack;

/// Engine clock: fixed rate and block length for the whole process life
const SAMPLE_RATE: u32 = 48000;
const BLOCK_SIZE: usize = 128;

/// Driver reconnect cadence while disconnected
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait for a model queued at startup
const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            cli::print_usage("hoopi-pi");
            return ExitCode::from(1);
        }
    };
    if options.help {
        cli::print_usage("hoopi-pi");
        return ExitCode::SUCCESS;
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        }) {
            error!("failed to install signal handler: {}", e);
            return ExitCode::from(1);
        }
    }

    info!("HoopiPi starting ({} Hz, {} frame blocks)", SAMPLE_RATE, BLOCK_SIZE);

    let engine = Arc::new(Engine::new(SAMPLE_RATE, BLOCK_SIZE));
    let track = Arc::new(BackingTrack::new());

    // CLI values first, then the persisted document on top
    engine.set_input_gain(options.input_gain);
    engine.set_output_gain(options.output_gain);
    engine.set_normalize(options.normalize);
    engine.set_noise_gate(options.enable_gate, options.gate_threshold);
    engine.set_dc_blocker(options.enable_dc_blocker);
    engine.set_bypass(options.bypass);

    let config_path = std::env::var("HOOPI_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = Arc::new(ConfigStore::open(config_path));
    let saved = config.snapshot();
    saved.apply(&engine);

    let any_model_loaded = restore_models(&engine, &saved, options.model.as_deref());
    if any_model_loaded {
        engine.set_bypass(options.bypass);
    } else if !options.bypass {
        info!("no models loaded - starting in bypass mode");
        engine.set_bypass(true);
    }

    let backend = Arc::new(AudioBackend::new(
        Arc::clone(&engine),
        Arc::clone(&track),
        BackendConfig {
            input_device: options.input_device.clone(),
            output_device: options.output_device.clone(),
        },
    ));

    let want_audio =
        options.auto_connect || options.input_device.is_some() || options.output_device.is_some();
    if want_audio {
        if let Err(e) = backend.start() {
            error!("failed to start audio: {}", e);
            error!("continuing in degraded mode - will retry every {:?}", RETRY_INTERVAL);
        }
    } else {
        info!("auto-connect disabled - audio not started");
    }

    let socket_path = options
        .socket_path
        .clone()
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string());
    let server = ControlServer::new(
        Arc::clone(&engine),
        Arc::clone(&backend),
        Arc::clone(&track),
        Arc::clone(&config),
        socket_path,
    );
    {
        let engine = Arc::clone(&engine);
        let backend = Arc::clone(&backend);
        server.set_status_change_callback(Box::new(move || {
            print_status(&engine, &backend);
        }));
    }
    if let Err(e) = server.start() {
        warn!("failed to start control server: {}", e);
    }

    if backend.status() == BackendStatus::Connected {
        print_status(&engine, &backend);
    }
    info!("press Ctrl+C to stop");

    supervise(&running, &engine, &backend, want_audio);

    info!("shutting down");
    server.stop();
    backend.stop();
    engine.stop_recording();

    info!("shutdown complete");
    ExitCode::SUCCESS
}

/// Queue saved (or CLI-given) models and wait for them to come up.
fn restore_models(
    engine: &Engine,
    saved: &hoopi_pi::RuntimeConfig,
    cli_model: Option<&str>,
) -> bool {
    let mut any_loaded = false;

    if let Some(model) = cli_model {
        info!("loading model from command line: {}", model);
        engine.load_model_async(0, model);
        if wait_for_model(engine, 0) {
            any_loaded = true;
        } else {
            warn!("model load timed out: {}", model);
        }
        return any_loaded;
    }

    for slot in 0..NUM_SLOTS {
        if let Some(path) = saved.slot_model(slot) {
            if !std::path::Path::new(path).exists() {
                warn!("saved model for slot {} is gone: {}", slot, path);
                continue;
            }
            info!("loading saved model into slot {}: {}", slot, path);
            engine.load_model_async(slot, path);
            if wait_for_model(engine, slot) {
                any_loaded = true;
            } else {
                warn!("failed to load saved model into slot {}", slot);
            }
        }
    }

    if any_loaded {
        let active = saved.active_slot.unwrap_or(0).min(NUM_SLOTS - 1);
        if engine.is_model_ready(active) {
            engine.set_active_model(active);
        } else {
            // Saved active slot didn't come up; fall back to the other one
            let other = 1 - active;
            if engine.is_model_ready(other) {
                engine.set_active_model(other);
                info!("active slot model not ready, using slot {}", other);
            }
        }
    }

    any_loaded
}

fn wait_for_model(engine: &Engine, slot: usize) -> bool {
    let deadline = Instant::now() + MODEL_LOAD_TIMEOUT;
    while Instant::now() < deadline {
        if engine.is_model_ready(slot) {
            return true;
        }
        if !engine.model_load_error(slot).is_empty() {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Monitor loop: reconnect while the driver is down, log xrun deltas.
fn supervise(
    running: &AtomicBool,
    engine: &Arc<Engine>,
    backend: &Arc<AudioBackend>,
    want_audio: bool,
) {
    let mut last_retry = Instant::now();
    let mut last_xruns: u64 = 0;

    while running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_secs(1));

        if backend.take_stream_failure() {
            warn!("audio stream failure detected");
        }

        let status = backend.status();
        if want_audio && status != BackendStatus::Connected {
            if last_retry.elapsed() >= RETRY_INTERVAL {
                match backend.reconnect() {
                    Ok(()) => {
                        info!("audio reconnected");
                        print_status(engine, backend);
                    }
                    Err(e) => {
                        warn!("reconnect failed: {} (retrying in {:?})", e, RETRY_INTERVAL);
                    }
                }
                last_retry = Instant::now();
            }
        } else if status == BackendStatus::Connected {
            let xruns = backend.underrun_count() + engine.xrun_count() as u64;
            if xruns != last_xruns {
                warn!("xrun detected (total: {})", xruns);
                last_xruns = xruns;
            }
        }
    }
}

/// Console status block, printed on every control mutation.
fn print_status(engine: &Engine, backend: &AudioBackend) {
    println!("\n=== HoopiPi Status ===");
    let status = backend.status();
    match status {
        BackendStatus::Error => println!("Audio:          error: {}", backend.error_message()),
        _ => println!("Audio:          {}", status.as_str()),
    }

    if status == BackendStatus::Connected {
        println!("Sample Rate:    {} Hz", backend.sample_rate());
        println!("Block Size:     {} frames", backend.block_size());
        println!("Latency:        {:.2} ms", backend.latency_ms());
        println!("DSP Load:       {:.1}%", backend.dsp_load() * 100.0);
    }

    let true_stereo = engine.stereo_mode() == hoopi_pi::StereoMode::Stereo2Stereo;
    println!("Stereo Mode:    {}", engine.stereo_mode().as_str());
    println!("Active Model:   Slot {}", engine.active_model());
    println!("Input Gain L:   {:.1} dB", engine.input_gain_l());
    if true_stereo {
        println!("Input Gain R:   {:.1} dB", engine.input_gain_r());
    }
    println!("Output Gain L:  {:.1} dB", engine.output_gain_l());
    if true_stereo {
        println!("Output Gain R:  {:.1} dB", engine.output_gain_r());
    }
    println!(
        "Model Bypass L: {}",
        if engine.bypass_model_l() { "ON" } else { "OFF" }
    );
    if true_stereo {
        println!(
            "Model Bypass R: {}",
            if engine.bypass_model_r() { "ON" } else { "OFF" }
        );
    }
    print!(
        "Noise Gate L:   {}",
        if engine.noise_gate_enabled_l() { "ON" } else { "OFF" }
    );
    if engine.noise_gate_enabled_l() {
        print!(" ({:.1} dB)", engine.noise_gate_threshold_l());
    }
    println!();
    println!(
        "Normalize:      {}",
        if engine.normalize() { "ON" } else { "OFF" }
    );
    println!(
        "DC Blocker:     {}",
        if engine.dc_blocker_enabled() { "ON" } else { "OFF" }
    );
    println!(
        "Xruns:          {}",
        backend.underrun_count() + engine.xrun_count() as u64
    );
    println!("======================");
}
