//! Control server
//!
//! Accepts JSON request/response commands over a local stream socket. Each
//! client sends one request (up to 4 KiB), receives one response and
//! closes. Mutations land in the engine through atomic parameter cells,
//! are persisted to the runtime config, and fire a status-change callback
//! for the supervisor.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use serde_json::{json, Value};

use crate::audio::backend::{cpu_temperature, memory_usage_mb};
use crate::audio::AudioBackend;
use crate::config::ConfigStore;
use crate::engine::{Engine, StereoMode, NUM_SLOTS};
use crate::track::BackingTrack;

/// Default control socket location
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/hoopi-pi.sock";

/// Maximum request size per direction
const MAX_MESSAGE: usize = 4096;

/// Read timeout per client connection
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

pub type StatusChangeCallback = Box<dyn Fn() + Send + Sync>;

struct ServerShared {
    engine: Arc<Engine>,
    backend: Arc<AudioBackend>,
    track: Arc<BackingTrack>,
    config: Arc<ConfigStore>,
    status_callback: Mutex<Option<StatusChangeCallback>>,
    running: AtomicBool,
}

impl ServerShared {
    fn notify_status_change(&self) {
        if let Ok(callback) = self.status_callback.lock() {
            if let Some(callback) = callback.as_ref() {
                callback();
            }
        }
    }
}

pub struct ControlServer {
    shared: Arc<ServerShared>,
    socket_path: PathBuf,
    accept_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ControlServer {
    pub fn new(
        engine: Arc<Engine>,
        backend: Arc<AudioBackend>,
        track: Arc<BackingTrack>,
        config: Arc<ConfigStore>,
        socket_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                engine,
                backend,
                track,
                config,
                status_callback: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
            socket_path: socket_path.into(),
            accept_thread: Mutex::new(None),
        }
    }

    /// Called after any mutation, so the supervisor can log or persist.
    pub fn set_status_change_callback(&self, callback: StatusChangeCallback) {
        if let Ok(mut slot) = self.shared.status_callback.lock() {
            *slot = Some(callback);
        }
    }

    /// Bind the socket and start accepting connections.
    pub fn start(&self) -> std::io::Result<()> {
        // A stale socket file from a previous run would block the bind
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        listener.set_nonblocking(true)?;

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name("control-server".into())
            .spawn(move || accept_loop(listener, shared))?;

        if let Ok(mut thread) = self.accept_thread.lock() {
            *thread = Some(handle);
        }

        info!("control server listening on {}", self.socket_path.display());
        Ok(())
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let handle = self.accept_thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("control server stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: UnixListener, shared: Arc<ServerShared>) {
    while shared.running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                let shared = Arc::clone(&shared);
                let _ = thread::Builder::new()
                    .name("control-client".into())
                    .spawn(move || handle_client(stream, &shared));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if shared.running.load(Ordering::Acquire) {
                    error!("control accept error: {}", e);
                }
                break;
            }
        }
    }
}

fn handle_client(mut stream: UnixStream, shared: &ServerShared) {
    let _ = stream.set_read_timeout(Some(CLIENT_TIMEOUT));

    let mut buffer = [0u8; MAX_MESSAGE];
    let n = match stream.read(&mut buffer) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };

    let response = handle_command(shared, &buffer[..n]);
    let _ = stream.write_all(response.to_string().as_bytes());
}

// ===== Request field helpers =====

fn get_str<'a>(cmd: &'a Value, key: &str, default: &'a str) -> &'a str {
    cmd.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn get_f32(cmd: &Value, key: &str, default: f32) -> f32 {
    cmd.get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
}

fn get_bool(cmd: &Value, key: &str, default: bool) -> bool {
    cmd.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn get_slot(cmd: &Value) -> Option<usize> {
    let slot = cmd.get("slot").and_then(Value::as_i64).unwrap_or(0);
    if (0..NUM_SLOTS as i64).contains(&slot) {
        Some(slot as usize)
    } else {
        None
    }
}

fn invalid_slot() -> Value {
    json!({"success": false, "error": "Invalid slot (must be 0 or 1)"})
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse one request and dispatch on its `action` field.
fn handle_command(shared: &ServerShared, request: &[u8]) -> Value {
    let cmd: Value = match serde_json::from_slice(request) {
        Ok(cmd) => cmd,
        Err(e) => {
            return json!({"success": false, "error": format!("JSON parse error: {}", e)});
        }
    };

    let action = get_str(&cmd, "action", "");
    dispatch(shared, action, &cmd)
}

fn dispatch(shared: &ServerShared, action: &str, cmd: &Value) -> Value {
    let engine = &shared.engine;
    let backend = &shared.backend;
    let track = &shared.track;
    let config = &shared.config;

    match action {
        "loadModel" => {
            let model_path = get_str(cmd, "modelPath", "").to_string();
            if model_path.is_empty() {
                return json!({"success": false, "error": "Missing modelPath"});
            }
            let Some(slot) = get_slot(cmd) else {
                return invalid_slot();
            };

            engine.load_model_async(slot, &model_path);
            config.update(|c| c.set_slot_model(slot, Some(model_path.clone())));

            // A freshly loaded model should be audible
            engine.set_bypass(false);

            json!({
                "success": true,
                "message": "Model loading started",
                "slot": slot,
                "modelPath": model_path,
            })
        }

        "setActiveModel" => {
            let Some(slot) = get_slot(cmd) else {
                return invalid_slot();
            };
            engine.set_active_model(slot);
            config.update(|c| c.active_slot = Some(slot));
            shared.notify_status_change();
            json!({"success": true, "message": "Active model set", "slot": slot})
        }

        "setActiveModelL" => {
            let Some(slot) = get_slot(cmd) else {
                return invalid_slot();
            };
            engine.set_active_model_l(slot);
            shared.notify_status_change();
            json!({"success": true, "message": "Left channel active model set", "slot": slot})
        }

        "setActiveModelR" => {
            let Some(slot) = get_slot(cmd) else {
                return invalid_slot();
            };
            engine.set_active_model_r(slot);
            shared.notify_status_change();
            json!({"success": true, "message": "Right channel active model set", "slot": slot})
        }

        "unloadModel" => {
            let Some(slot) = get_slot(cmd) else {
                return invalid_slot();
            };
            engine.unload_model(slot);
            config.update(|c| c.set_slot_model(slot, None));

            // Nothing left to process: fall back to pass-through
            engine.set_bypass(true);
            shared.notify_status_change();
            json!({"success": true, "message": "Model unloaded", "slot": slot})
        }

        "setBypass" => {
            let bypass = get_bool(cmd, "bypass", false);
            engine.set_bypass(bypass);
            shared.notify_status_change();
            json!({"success": true, "message": "Bypass set", "bypass": bypass})
        }

        "setBypassModel" => {
            let bypass = get_bool(cmd, "bypass", false);
            engine.set_bypass_model(bypass);
            shared.notify_status_change();
            json!({"success": true, "message": "Model bypass set", "bypassModel": bypass})
        }

        "setBypassModelL" => {
            let bypass = get_bool(cmd, "bypass", false);
            engine.set_bypass_model_l(bypass);
            config.update(|c| c.bypass_model_l = Some(bypass));
            shared.notify_status_change();
            json!({"success": true, "message": "Left channel model bypass set", "bypassModelL": bypass})
        }

        "setBypassModelR" => {
            let bypass = get_bool(cmd, "bypass", false);
            engine.set_bypass_model_r(bypass);
            config.update(|c| c.bypass_model_r = Some(bypass));
            shared.notify_status_change();
            json!({"success": true, "message": "Right channel model bypass set", "bypassModelR": bypass})
        }

        // Normalize is CLI-only; the socket reads it back through getStatus

        "getStatus" => status_response(shared),

        "getAudioDevices" => {
            let inputs = match crate::audio::list_input_devices() {
                Ok(devices) => devices,
                Err(e) => return json!({"success": false, "error": e.to_string()}),
            };
            let outputs = match crate::audio::list_output_devices() {
                Ok(devices) => devices,
                Err(e) => return json!({"success": false, "error": e.to_string()}),
            };
            let describe = |devices: Vec<crate::audio::AudioDeviceInfo>| -> Vec<Value> {
                devices
                    .into_iter()
                    .map(|d| {
                        json!({
                            "name": d.name,
                            "sampleRate": d.sample_rate,
                            "channels": d.channels,
                        })
                    })
                    .collect()
            };
            json!({
                "success": true,
                "inputs": describe(inputs),
                "outputs": describe(outputs),
            })
        }

        // ===== Gains =====

        "setInputGain" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_input_gain(gain);
            config.update(|c| {
                c.input_gain = Some(gain);
                c.input_gain_l = Some(gain);
                c.input_gain_r = Some(gain);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "Input gain set", "gain": gain})
        }

        "setOutputGain" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_output_gain(gain);
            config.update(|c| {
                c.output_gain = Some(gain);
                c.output_gain_l = Some(gain);
                c.output_gain_r = Some(gain);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "Output gain set", "gain": gain})
        }

        "setInputGainL" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_input_gain_l(gain);
            config.update(|c| c.input_gain_l = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Left input gain set", "gain": gain})
        }

        "setInputGainR" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_input_gain_r(gain);
            config.update(|c| c.input_gain_r = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Right input gain set", "gain": gain})
        }

        "setOutputGainL" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_output_gain_l(gain);
            config.update(|c| c.output_gain_l = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Left output gain set", "gain": gain})
        }

        "setOutputGainR" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_output_gain_r(gain);
            config.update(|c| c.output_gain_r = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Right output gain set", "gain": gain})
        }

        // ===== EQ =====

        "setEQEnabled" => {
            let enabled = get_bool(cmd, "enabled", false);
            engine.set_eq_enabled(enabled);
            config.update(|c| {
                c.eq_enabled = Some(enabled);
                c.eq_enabled_l = Some(enabled);
                c.eq_enabled_r = Some(enabled);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "EQ enabled set", "enabled": enabled})
        }

        "setEQBass" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_eq_bass(gain);
            config.update(|c| {
                c.eq_bass = Some(gain);
                c.eq_bass_l = Some(gain);
                c.eq_bass_r = Some(gain);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "EQ bass set", "gain": gain})
        }

        "setEQMid" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_eq_mid(gain);
            config.update(|c| {
                c.eq_mid = Some(gain);
                c.eq_mid_l = Some(gain);
                c.eq_mid_r = Some(gain);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "EQ mid set", "gain": gain})
        }

        "setEQTreble" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.set_eq_treble(gain);
            config.update(|c| {
                c.eq_treble = Some(gain);
                c.eq_treble_l = Some(gain);
                c.eq_treble_r = Some(gain);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "EQ treble set", "gain": gain})
        }

        "setEQEnabledL" => {
            let enabled = get_bool(cmd, "enabled", false);
            engine.eq_l().set_enabled(enabled);
            config.update(|c| c.eq_enabled_l = Some(enabled));
            shared.notify_status_change();
            json!({"success": true, "message": "Left EQ enabled set", "enabled": enabled})
        }

        "setEQBassL" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_l().set_bass(gain);
            config.update(|c| c.eq_bass_l = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Left EQ bass set", "gain": gain})
        }

        "setEQMidL" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_l().set_mid(gain);
            config.update(|c| c.eq_mid_l = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Left EQ mid set", "gain": gain})
        }

        "setEQTrebleL" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_l().set_treble(gain);
            config.update(|c| c.eq_treble_l = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Left EQ treble set", "gain": gain})
        }

        "setEQEnabledR" => {
            let enabled = get_bool(cmd, "enabled", false);
            engine.eq_r().set_enabled(enabled);
            config.update(|c| c.eq_enabled_r = Some(enabled));
            shared.notify_status_change();
            json!({"success": true, "message": "Right EQ enabled set", "enabled": enabled})
        }

        "setEQBassR" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_r().set_bass(gain);
            config.update(|c| c.eq_bass_r = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Right EQ bass set", "gain": gain})
        }

        "setEQMidR" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_r().set_mid(gain);
            config.update(|c| c.eq_mid_r = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Right EQ mid set", "gain": gain})
        }

        "setEQTrebleR" => {
            let gain = get_f32(cmd, "gain", 0.0);
            engine.eq_r().set_treble(gain);
            config.update(|c| c.eq_treble_r = Some(gain));
            shared.notify_status_change();
            json!({"success": true, "message": "Right EQ treble set", "gain": gain})
        }

        // ===== Noise gate =====

        "setNoiseGateEnabled" => {
            let enabled = get_bool(cmd, "enabled", false);
            let threshold = engine.noise_gate_threshold();
            engine.set_noise_gate(enabled, threshold);
            config.update(|c| {
                c.noise_gate_enabled = Some(enabled);
                c.noise_gate_enabled_l = Some(enabled);
                c.noise_gate_enabled_r = Some(enabled);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "Noise gate enabled set", "enabled": enabled})
        }

        "setNoiseGateThreshold" => {
            let threshold = get_f32(cmd, "threshold", -40.0);
            let enabled = engine.noise_gate_enabled();
            engine.set_noise_gate(enabled, threshold);
            config.update(|c| {
                c.noise_gate_threshold = Some(threshold);
                c.noise_gate_threshold_l = Some(threshold);
                c.noise_gate_threshold_r = Some(threshold);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "Noise gate threshold set", "threshold": threshold})
        }

        "setNoiseGateL" => {
            let enabled = get_bool(cmd, "enabled", false);
            let threshold = get_f32(cmd, "threshold", -40.0);
            engine.set_noise_gate_l(enabled, threshold);
            config.update(|c| {
                c.noise_gate_enabled_l = Some(enabled);
                c.noise_gate_threshold_l = Some(threshold);
            });
            shared.notify_status_change();
            json!({
                "success": true,
                "message": "Left noise gate set",
                "enabled": enabled,
                "threshold": threshold,
            })
        }

        "setNoiseGateR" => {
            let enabled = get_bool(cmd, "enabled", false);
            let threshold = get_f32(cmd, "threshold", -40.0);
            engine.set_noise_gate_r(enabled, threshold);
            config.update(|c| {
                c.noise_gate_enabled_r = Some(enabled);
                c.noise_gate_threshold_r = Some(threshold);
            });
            shared.notify_status_change();
            json!({
                "success": true,
                "message": "Right noise gate set",
                "enabled": enabled,
                "threshold": threshold,
            })
        }

        // ===== Stereo routing =====

        "setStereoMode" => {
            let mode_str = get_str(cmd, "mode", "LeftMono2Stereo").to_string();
            engine.set_stereo_mode(StereoMode::parse(&mode_str));
            config.update(|c| c.stereo_mode = Some(mode_str.clone()));
            shared.notify_status_change();
            json!({"success": true, "message": "Stereo mode set", "mode": mode_str})
        }

        "setStereo2MonoMixL" => {
            let level = get_f32(cmd, "level", 0.5);
            engine.set_stereo2mono_mix_l(level);
            config.update(|c| c.stereo2mono_mix_l = Some(level));
            shared.notify_status_change();
            json!({"success": true, "message": "Stereo2Mono mix L set", "level": level})
        }

        "setStereo2MonoMixR" => {
            let level = get_f32(cmd, "level", 0.5);
            engine.set_stereo2mono_mix_r(level);
            config.update(|c| c.stereo2mono_mix_r = Some(level));
            shared.notify_status_change();
            json!({"success": true, "message": "Stereo2Mono mix R set", "level": level})
        }

        // ===== Reverb =====

        "setReverbEnabled" => {
            let enabled = get_bool(cmd, "enabled", false);
            engine.reverb().set_enabled(enabled);
            config.update(|c| c.reverb_enabled = Some(enabled));
            shared.notify_status_change();
            json!({"success": true, "message": "Reverb enabled set", "enabled": enabled})
        }

        "setReverbRoomSize" => {
            let size = get_f32(cmd, "size", 0.3);
            engine.reverb().set_room_size(size);
            config.update(|c| c.reverb_room_size = Some(size));
            shared.notify_status_change();
            json!({"success": true, "message": "Reverb room size set", "size": size})
        }

        "setReverbDecayTime" => {
            let seconds = get_f32(cmd, "seconds", 2.0);
            engine.reverb().set_decay_time(seconds);
            config.update(|c| c.reverb_decay_time = Some(seconds));
            shared.notify_status_change();
            json!({"success": true, "message": "Reverb decay time set", "seconds": seconds})
        }

        "setReverbMix" => {
            let dry = get_f32(cmd, "dry", 1.0);
            let wet = get_f32(cmd, "wet", 0.3);
            engine.reverb().set_mix(dry, wet);
            config.update(|c| {
                c.reverb_dry = Some(dry);
                c.reverb_wet = Some(wet);
            });
            shared.notify_status_change();
            json!({"success": true, "message": "Reverb mix set", "dry": dry, "wet": wet})
        }

        // ===== Recording =====

        "startRecording" => {
            let filename = get_str(cmd, "filename", "");
            match engine.start_recording(filename) {
                Ok(filepath) => {
                    json!({"success": true, "message": "Recording started", "filepath": filepath})
                }
                Err(e) => {
                    warn!("startRecording failed: {}", e);
                    json!({"success": false, "error": format!("Failed to start recording: {}", e)})
                }
            }
        }

        "stopRecording" => {
            engine.stop_recording();
            json!({"success": true, "message": "Recording stopped"})
        }

        "setIncludeBackingTrackInRecording" => {
            let enabled = get_bool(cmd, "enabled", false);
            engine.set_include_backing_track_in_recording(enabled);
            json!({"success": true, "enabled": enabled})
        }

        "getIncludeBackingTrackInRecording" => {
            json!({"success": true, "enabled": engine.include_backing_track_in_recording()})
        }

        // ===== Backing track =====

        "loadBackingTrack" => {
            let filepath = get_str(cmd, "filepath", "");
            if filepath.is_empty() {
                return json!({"success": false, "error": "Missing filepath parameter"});
            }
            match track.load(Path::new(filepath), backend.sample_rate()) {
                Ok(()) => json!({
                    "success": true,
                    "filename": track.filename(),
                    "duration": track.duration_seconds(),
                    "channels": track.channels(),
                    "sampleRate": track.sample_rate(),
                }),
                Err(e) => {
                    warn!("loadBackingTrack failed: {}", e);
                    json!({"success": false, "error": format!("Failed to load backing track file: {}", e)})
                }
            }
        }

        "playBackingTrack" => {
            if !track.is_loaded() {
                return json!({"success": false, "error": "No backing track loaded"});
            }
            track.play();
            json!({"success": true})
        }

        "stopBackingTrack" => {
            track.stop();
            json!({"success": true})
        }

        "pauseBackingTrack" => {
            track.pause();
            json!({"success": true})
        }

        "setBackingTrackLoop" => {
            let enabled = get_bool(cmd, "enabled", true);
            track.set_loop(enabled);
            json!({"success": true, "loopEnabled": enabled})
        }

        "setBackingTrackVolume" => {
            let volume = get_f32(cmd, "volume", 0.7);
            track.set_volume(volume);
            json!({"success": true, "volume": volume})
        }

        "setBackingTrackStartPosition" => {
            let seconds = get_f32(cmd, "seconds", 0.0);
            track.set_start_position(seconds);
            json!({"success": true, "startPosition": track.start_position()})
        }

        "setBackingTrackStopPosition" => {
            let seconds = get_f32(cmd, "seconds", 0.0);
            track.set_stop_position(seconds);
            json!({"success": true, "stopPosition": track.stop_position()})
        }

        "getBackingTrackStatus" => {
            let mut response = json!({
                "success": true,
                "loaded": track.is_loaded(),
                "playing": track.is_playing(),
                "looping": track.is_looping(),
                "volume": track.volume(),
            });
            if track.is_loaded() {
                let rate = track.sample_rate().max(1);
                response["filename"] = json!(track.filename());
                response["duration"] = json!(track.duration_seconds());
                response["position"] = json!(track.current_frame() as f32 / rate as f32);
                response["channels"] = json!(track.channels());
                response["sampleRate"] = json!(track.sample_rate());
                response["startPosition"] = json!(track.start_position());
                response["stopPosition"] = json!(track.stop_position());
            }
            response
        }

        _ => json!({"success": false, "error": format!("Unknown action: {}", action)}),
    }
}

/// Snapshot of every parameter cell plus derived metrics.
fn status_response(shared: &ServerShared) -> Value {
    let engine = &shared.engine;
    let backend = &shared.backend;

    let model_names: Vec<String> = (0..NUM_SLOTS)
        .map(|slot| file_stem(&engine.model_path(slot)))
        .collect();
    let model_ready: Vec<bool> = (0..NUM_SLOTS).map(|slot| engine.is_model_ready(slot)).collect();
    let model_errors: Vec<String> = (0..NUM_SLOTS)
        .map(|slot| engine.model_load_error(slot))
        .collect();

    let mut response = json!({
        "success": true,

        "activeModel": engine.active_model(),
        "activeModelL": engine.active_model_l(),
        "activeModelR": engine.active_model_r(),
        "modelReady": model_ready,
        "modelNames": model_names,
        "modelErrors": model_errors,

        "stereoMode": engine.stereo_mode().as_str(),
        "stereo2MonoMixL": engine.stereo2mono_mix_l(),
        "stereo2MonoMixR": engine.stereo2mono_mix_r(),

        "inputGain": engine.input_gain(),
        "outputGain": engine.output_gain(),
        "bypass": engine.bypass(),
        "bypassModel": engine.bypass_model(),
        "bypassModelL": engine.bypass_model_l(),
        "bypassModelR": engine.bypass_model_r(),
        "normalize": engine.normalize(),
        "noiseGateEnabled": engine.noise_gate_enabled(),
        "noiseGateThreshold": engine.noise_gate_threshold(),
        "dcBlockerEnabled": engine.dc_blocker_enabled(),
        "eqEnabled": engine.eq_l().enabled(),
        "eqBass": engine.eq_l().bass(),
        "eqMid": engine.eq_l().mid(),
        "eqTreble": engine.eq_l().treble(),

        "inputGainL": engine.input_gain_l(),
        "inputGainR": engine.input_gain_r(),
        "outputGainL": engine.output_gain_l(),
        "outputGainR": engine.output_gain_r(),
        "noiseGateEnabledL": engine.noise_gate_enabled_l(),
        "noiseGateThresholdL": engine.noise_gate_threshold_l(),
        "noiseGateEnabledR": engine.noise_gate_enabled_r(),
        "noiseGateThresholdR": engine.noise_gate_threshold_r(),
        "eqEnabledL": engine.eq_l().enabled(),
        "eqBassL": engine.eq_l().bass(),
        "eqMidL": engine.eq_l().mid(),
        "eqTrebleL": engine.eq_l().treble(),
        "eqEnabledR": engine.eq_r().enabled(),
        "eqBassR": engine.eq_r().bass(),
        "eqMidR": engine.eq_r().mid(),
        "eqTrebleR": engine.eq_r().treble(),

        "reverbEnabled": engine.reverb().enabled(),
        "reverbRoomSize": engine.reverb().room_size(),
        "reverbDecayTime": engine.reverb().decay_time(),
        "reverbDry": engine.reverb().dry(),
        "reverbWet": engine.reverb().wet(),

        "recording": engine.is_recording(),

        "inputPeak": engine.input_peak_db(),
        "inputRms": engine.input_rms_db(),
        "outputPeak": engine.output_peak_db(),
        "outputRms": engine.output_rms_db(),
    });

    if engine.is_recording() {
        response["recordingFile"] = json!(engine.recording_file_path());
        response["recordingDroppedFrames"] = json!(engine.recording_dropped_frames());
        response["recordingDuration"] = json!(engine.recording_duration());
    }

    let status = backend.status();
    response["audioStatus"] = json!(status.as_str());
    response["audioError"] = json!(backend.error_message());
    if status == crate::audio::BackendStatus::Connected {
        response["dspLoad"] = json!(backend.dsp_load());
        response["cpuLoad"] = json!(backend.dsp_load() * 100.0);
        response["sampleRate"] = json!(backend.sample_rate());
        response["bufferSize"] = json!(backend.block_size());
        response["latencyMs"] = json!(backend.latency_ms());
    } else {
        response["dspLoad"] = json!(0.0);
        response["cpuLoad"] = json!(0.0);
        response["sampleRate"] = json!(0);
        response["bufferSize"] = json!(0);
        response["latencyMs"] = json!(0.0);
    }
    response["inputDevice"] = json!(backend.input_device_name());
    response["outputDevice"] = json!(backend.output_device_name());
    response["cpuTemp"] = json!(cpu_temperature());
    response["memoryUsage"] = json!(memory_usage_mb());
    response["xruns"] = json!(backend.underrun_count() + engine.xrun_count() as u64);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BackendConfig;
    use crate::config::ConfigStore;

    fn test_shared(dir: &Path) -> Arc<ServerShared> {
        let engine = Arc::new(Engine::new(48000, 128));
        let track = Arc::new(BackingTrack::new());
        let backend = Arc::new(AudioBackend::new(
            Arc::clone(&engine),
            Arc::clone(&track),
            BackendConfig::default(),
        ));
        let config = Arc::new(ConfigStore::open(dir.join("runtime.json")));
        Arc::new(ServerShared {
            engine,
            backend,
            track,
            config,
            status_callback: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_unknown_action() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response = handle_command(&shared, br#"{"action": "fooBar"}"#);
        assert_eq!(response["success"], false);
        assert!(response["error"]
            .as_str()
            .expect("error string")
            .contains("Unknown action: fooBar"));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response = handle_command(&shared, b"{nope");
        assert_eq!(response["success"], false);
        assert!(response["error"]
            .as_str()
            .expect("error string")
            .contains("JSON parse error"));
    }

    #[test]
    fn test_set_input_gain_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response =
            handle_command(&shared, br#"{"action": "setInputGainL", "gain": -4.5}"#);
        assert_eq!(response["success"], true);
        assert!((shared.engine.input_gain_l() - (-4.5)).abs() < 1e-3);

        let saved = crate::config::RuntimeConfig::load(&dir.path().join("runtime.json"));
        assert_eq!(saved.input_gain_l, Some(-4.5));
    }

    #[test]
    fn test_set_active_model_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response = handle_command(&shared, br#"{"action": "setActiveModel", "slot": 1}"#);
        assert_eq!(response["success"], true);

        let status = handle_command(&shared, br#"{"action": "getStatus"}"#);
        assert_eq!(status["activeModel"], 1);
        assert_eq!(status["activeModelL"], 1);
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response = handle_command(&shared, br#"{"action": "setActiveModel", "slot": 5}"#);
        assert_eq!(response["success"], false);
    }

    #[test]
    fn test_status_contains_parameter_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        handle_command(
            &shared,
            br#"{"action": "setNoiseGateL", "enabled": true, "threshold": -35.0}"#,
        );
        handle_command(&shared, br#"{"action": "setReverbRoomSize", "size": 0.8}"#);

        let status = handle_command(&shared, br#"{"action": "getStatus"}"#);
        assert_eq!(status["success"], true);
        assert_eq!(status["noiseGateEnabledL"], true);
        assert!((status["noiseGateThresholdL"].as_f64().expect("f64") + 35.0).abs() < 1e-3);
        assert!((status["reverbRoomSize"].as_f64().expect("f64") - 0.8).abs() < 1e-3);
        assert_eq!(status["audioStatus"], "disconnected");
        assert_eq!(status["recording"], false);
    }

    #[test]
    fn test_backing_track_actions_without_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let response = handle_command(&shared, br#"{"action": "playBackingTrack"}"#);
        assert_eq!(response["success"], false);

        let response = handle_command(&shared, br#"{"action": "loadBackingTrack"}"#);
        assert_eq!(response["success"], false);

        let status = handle_command(&shared, br#"{"action": "getBackingTrackStatus"}"#);
        assert_eq!(status["success"], true);
        assert_eq!(status["loaded"], false);
    }

    #[test]
    fn test_get_audio_devices_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        // Hosts without audio hardware may answer either way, but the
        // response always carries a success flag and never panics
        let response = handle_command(&shared, br#"{"action": "getAudioDevices"}"#);
        assert!(response["success"].is_boolean());
        if response["success"] == true {
            assert!(response["inputs"].is_array());
            assert!(response["outputs"].is_array());
        }
    }

    #[test]
    fn test_status_callback_fires_on_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = test_shared(dir.path());

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        *shared.status_callback.lock().expect("lock") =
            Some(Box::new(move || fired_clone.store(true, Ordering::Release)));

        handle_command(&shared, br#"{"action": "setBypass", "bypass": true}"#);
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn test_server_over_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("control.sock");

        let engine = Arc::new(Engine::new(48000, 128));
        let track = Arc::new(BackingTrack::new());
        let backend = Arc::new(AudioBackend::new(
            Arc::clone(&engine),
            Arc::clone(&track),
            BackendConfig::default(),
        ));
        let config = Arc::new(ConfigStore::open(dir.path().join("runtime.json")));

        let server = ControlServer::new(engine, backend, track, config, &socket_path);
        server.start().expect("start server");

        let mut stream = UnixStream::connect(&socket_path).expect("connect");
        stream
            .write_all(br#"{"action": "getStatus"}"#)
            .expect("send");
        stream
            .shutdown(std::net::Shutdown::Write)
            .expect("shutdown write");

        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read");
        let value: Value = serde_json::from_str(&response).expect("json");
        assert_eq!(value["success"], true);

        server.stop();
        assert!(!socket_path.exists());
    }
}
