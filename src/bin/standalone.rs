//! Standalone entry point
//!
//! Runs the amp with command-line parameters only: no control server, no
//! persistence. Useful for quick rigs and for testing an interface without
//! the web front-end.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use hoopi_pi::audio::{AudioBackend, BackendConfig};
use hoopi_pi::cli::{self, Options};
use hoopi_pi::engine::Engine;
use hoopi_pi::track::BackingTrack;

const SAMPLE_RATE: u32 = 48000;
const BLOCK_SIZE: usize = 128;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            cli::print_usage("hoopi-pi-standalone");
            return ExitCode::from(1);
        }
    };
    if options.help {
        cli::print_usage("hoopi-pi-standalone");
        return ExitCode::SUCCESS;
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::Release)) {
            error!("failed to install signal handler: {}", e);
            return ExitCode::from(1);
        }
    }

    let engine = Arc::new(Engine::new(SAMPLE_RATE, BLOCK_SIZE));
    engine.set_input_gain(options.input_gain);
    engine.set_output_gain(options.output_gain);
    engine.set_normalize(options.normalize);
    engine.set_noise_gate(options.enable_gate, options.gate_threshold);
    engine.set_dc_blocker(options.enable_dc_blocker);
    engine.set_bypass(options.bypass);

    if let Some(model) = &options.model {
        info!("loading model: {}", model);
        engine.load_model_async(0, model);

        let mut waited = 0;
        while !engine.is_model_ready(0) && waited < 100 {
            if !engine.model_load_error(0).is_empty() {
                error!("model load failed: {}", engine.model_load_error(0));
                return ExitCode::from(1);
            }
            thread::sleep(Duration::from_millis(50));
            waited += 1;
        }
        if !engine.is_model_ready(0) {
            warn!("model load timed out; continuing without it");
        }
    } else if !options.bypass {
        info!("no model given - running in bypass");
        engine.set_bypass(true);
    }

    let track = Arc::new(BackingTrack::new());
    let backend = AudioBackend::new(
        Arc::clone(&engine),
        track,
        BackendConfig {
            input_device: options.input_device.clone(),
            output_device: options.output_device.clone(),
        },
    );

    if let Err(e) = backend.start() {
        error!("failed to start audio: {}", e);
        return ExitCode::from(1);
    }

    info!("running - press Ctrl+C to stop");
    while running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(200));
    }

    backend.stop();
    info!("shutdown complete");
    ExitCode::SUCCESS
}
