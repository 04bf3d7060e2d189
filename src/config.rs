//! Runtime configuration persistence
//!
//! The last-used parameter set lives in a single JSON document at
//! `$HOME/.config/hoopi-pi/runtime.json`. Missing keys fall back to the
//! engine defaults; unreadable files count as "no saved state". Writes go
//! through a temp file and an atomic rename so a crash can't leave a
//! half-written document. Write failures are logged and never affect
//! audio.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, StereoMode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "slot0Model", skip_serializing_if = "Option::is_none")]
    pub slot0_model: Option<String>,
    #[serde(rename = "slot1Model", skip_serializing_if = "Option::is_none")]
    pub slot1_model: Option<String>,
    #[serde(rename = "activeSlot", skip_serializing_if = "Option::is_none")]
    pub active_slot: Option<usize>,

    // Legacy single-value gains (dB)
    #[serde(rename = "inputGain", skip_serializing_if = "Option::is_none")]
    pub input_gain: Option<f32>,
    #[serde(rename = "outputGain", skip_serializing_if = "Option::is_none")]
    pub output_gain: Option<f32>,

    // Per-channel gains (dB)
    #[serde(rename = "inputGainL", skip_serializing_if = "Option::is_none")]
    pub input_gain_l: Option<f32>,
    #[serde(rename = "inputGainR", skip_serializing_if = "Option::is_none")]
    pub input_gain_r: Option<f32>,
    #[serde(rename = "outputGainL", skip_serializing_if = "Option::is_none")]
    pub output_gain_l: Option<f32>,
    #[serde(rename = "outputGainR", skip_serializing_if = "Option::is_none")]
    pub output_gain_r: Option<f32>,

    #[serde(rename = "bypassModelL", skip_serializing_if = "Option::is_none")]
    pub bypass_model_l: Option<bool>,
    #[serde(rename = "bypassModelR", skip_serializing_if = "Option::is_none")]
    pub bypass_model_r: Option<bool>,

    // EQ, legacy and per-channel
    #[serde(rename = "eqEnabled", skip_serializing_if = "Option::is_none")]
    pub eq_enabled: Option<bool>,
    #[serde(rename = "eqBass", skip_serializing_if = "Option::is_none")]
    pub eq_bass: Option<f32>,
    #[serde(rename = "eqMid", skip_serializing_if = "Option::is_none")]
    pub eq_mid: Option<f32>,
    #[serde(rename = "eqTreble", skip_serializing_if = "Option::is_none")]
    pub eq_treble: Option<f32>,
    #[serde(rename = "eqEnabledL", skip_serializing_if = "Option::is_none")]
    pub eq_enabled_l: Option<bool>,
    #[serde(rename = "eqBassL", skip_serializing_if = "Option::is_none")]
    pub eq_bass_l: Option<f32>,
    #[serde(rename = "eqMidL", skip_serializing_if = "Option::is_none")]
    pub eq_mid_l: Option<f32>,
    #[serde(rename = "eqTrebleL", skip_serializing_if = "Option::is_none")]
    pub eq_treble_l: Option<f32>,
    #[serde(rename = "eqEnabledR", skip_serializing_if = "Option::is_none")]
    pub eq_enabled_r: Option<bool>,
    #[serde(rename = "eqBassR", skip_serializing_if = "Option::is_none")]
    pub eq_bass_r: Option<f32>,
    #[serde(rename = "eqMidR", skip_serializing_if = "Option::is_none")]
    pub eq_mid_r: Option<f32>,
    #[serde(rename = "eqTrebleR", skip_serializing_if = "Option::is_none")]
    pub eq_treble_r: Option<f32>,

    // Noise gate, legacy and per-channel
    #[serde(rename = "noiseGateEnabled", skip_serializing_if = "Option::is_none")]
    pub noise_gate_enabled: Option<bool>,
    #[serde(rename = "noiseGateThreshold", skip_serializing_if = "Option::is_none")]
    pub noise_gate_threshold: Option<f32>,
    #[serde(rename = "noiseGateEnabledL", skip_serializing_if = "Option::is_none")]
    pub noise_gate_enabled_l: Option<bool>,
    #[serde(rename = "noiseGateThresholdL", skip_serializing_if = "Option::is_none")]
    pub noise_gate_threshold_l: Option<f32>,
    #[serde(rename = "noiseGateEnabledR", skip_serializing_if = "Option::is_none")]
    pub noise_gate_enabled_r: Option<bool>,
    #[serde(rename = "noiseGateThresholdR", skip_serializing_if = "Option::is_none")]
    pub noise_gate_threshold_r: Option<f32>,

    // Reverb
    #[serde(rename = "reverbEnabled", skip_serializing_if = "Option::is_none")]
    pub reverb_enabled: Option<bool>,
    #[serde(rename = "reverbRoomSize", skip_serializing_if = "Option::is_none")]
    pub reverb_room_size: Option<f32>,
    #[serde(rename = "reverbDecayTime", skip_serializing_if = "Option::is_none")]
    pub reverb_decay_time: Option<f32>,
    #[serde(rename = "reverbDry", skip_serializing_if = "Option::is_none")]
    pub reverb_dry: Option<f32>,
    #[serde(rename = "reverbWet", skip_serializing_if = "Option::is_none")]
    pub reverb_wet: Option<f32>,

    // Stereo routing
    #[serde(rename = "stereoMode", skip_serializing_if = "Option::is_none")]
    pub stereo_mode: Option<String>,
    #[serde(rename = "stereo2MonoMixL", skip_serializing_if = "Option::is_none")]
    pub stereo2mono_mix_l: Option<f32>,
    #[serde(rename = "stereo2MonoMixR", skip_serializing_if = "Option::is_none")]
    pub stereo2mono_mix_r: Option<f32>,
}

impl RuntimeConfig {
    /// Read a config file. Anything unreadable counts as no saved state.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("ignoring corrupt config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                debug!("no saved config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the document via a temp file and atomic rename.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// Push every present key into the engine. Per-channel values win over
    /// the legacy single values because they are applied last.
    pub fn apply(&self, engine: &Engine) {
        if let Some(gain) = self.input_gain {
            engine.set_input_gain(gain);
        }
        if let Some(gain) = self.output_gain {
            engine.set_output_gain(gain);
        }
        if let Some(gain) = self.input_gain_l {
            engine.set_input_gain_l(gain);
        }
        if let Some(gain) = self.input_gain_r {
            engine.set_input_gain_r(gain);
        }
        if let Some(gain) = self.output_gain_l {
            engine.set_output_gain_l(gain);
        }
        if let Some(gain) = self.output_gain_r {
            engine.set_output_gain_r(gain);
        }

        if let Some(bypass) = self.bypass_model_l {
            engine.set_bypass_model_l(bypass);
        }
        if let Some(bypass) = self.bypass_model_r {
            engine.set_bypass_model_r(bypass);
        }

        if let Some(enabled) = self.eq_enabled {
            engine.set_eq_enabled(enabled);
        }
        if let Some(db) = self.eq_bass {
            engine.set_eq_bass(db);
        }
        if let Some(db) = self.eq_mid {
            engine.set_eq_mid(db);
        }
        if let Some(db) = self.eq_treble {
            engine.set_eq_treble(db);
        }
        if let Some(enabled) = self.eq_enabled_l {
            engine.eq_l().set_enabled(enabled);
        }
        if let Some(db) = self.eq_bass_l {
            engine.eq_l().set_bass(db);
        }
        if let Some(db) = self.eq_mid_l {
            engine.eq_l().set_mid(db);
        }
        if let Some(db) = self.eq_treble_l {
            engine.eq_l().set_treble(db);
        }
        if let Some(enabled) = self.eq_enabled_r {
            engine.eq_r().set_enabled(enabled);
        }
        if let Some(db) = self.eq_bass_r {
            engine.eq_r().set_bass(db);
        }
        if let Some(db) = self.eq_mid_r {
            engine.eq_r().set_mid(db);
        }
        if let Some(db) = self.eq_treble_r {
            engine.eq_r().set_treble(db);
        }

        let legacy_gate_enabled = self.noise_gate_enabled.unwrap_or(false);
        let legacy_gate_threshold = self.noise_gate_threshold.unwrap_or(-40.0);
        if self.noise_gate_enabled.is_some() || self.noise_gate_threshold.is_some() {
            engine.set_noise_gate(legacy_gate_enabled, legacy_gate_threshold);
        }
        if self.noise_gate_enabled_l.is_some() || self.noise_gate_threshold_l.is_some() {
            engine.set_noise_gate_l(
                self.noise_gate_enabled_l.unwrap_or(legacy_gate_enabled),
                self.noise_gate_threshold_l.unwrap_or(legacy_gate_threshold),
            );
        }
        if self.noise_gate_enabled_r.is_some() || self.noise_gate_threshold_r.is_some() {
            engine.set_noise_gate_r(
                self.noise_gate_enabled_r.unwrap_or(legacy_gate_enabled),
                self.noise_gate_threshold_r.unwrap_or(legacy_gate_threshold),
            );
        }

        if let Some(enabled) = self.reverb_enabled {
            engine.reverb().set_enabled(enabled);
        }
        if let Some(size) = self.reverb_room_size {
            engine.reverb().set_room_size(size);
        }
        if let Some(seconds) = self.reverb_decay_time {
            engine.reverb().set_decay_time(seconds);
        }
        if self.reverb_dry.is_some() || self.reverb_wet.is_some() {
            engine.reverb().set_mix(
                self.reverb_dry.unwrap_or(1.0),
                self.reverb_wet.unwrap_or(0.3),
            );
        }

        if let Some(mode) = &self.stereo_mode {
            engine.set_stereo_mode(StereoMode::parse(mode));
        }
        if let Some(level) = self.stereo2mono_mix_l {
            engine.set_stereo2mono_mix_l(level);
        }
        if let Some(level) = self.stereo2mono_mix_r {
            engine.set_stereo2mono_mix_r(level);
        }
    }

    pub fn slot_model(&self, slot: usize) -> Option<&str> {
        match slot {
            0 => self.slot0_model.as_deref(),
            1 => self.slot1_model.as_deref(),
            _ => None,
        }
    }

    pub fn set_slot_model(&mut self, slot: usize, path: Option<String>) {
        match slot {
            0 => self.slot0_model = path,
            1 => self.slot1_model = path,
            _ => {}
        }
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => Path::new(&home).join(".config/hoopi-pi/runtime.json"),
        Err(_) => PathBuf::from("/tmp/hoopi-pi-runtime.json"),
    }
}

/// In-memory config document plus its on-disk location. Control handlers
/// mutate through `update`, which rewrites the file after every change.
pub struct ConfigStore {
    path: PathBuf,
    config: Mutex<RuntimeConfig>,
}

impl ConfigStore {
    pub fn open(path: PathBuf) -> Self {
        let config = RuntimeConfig::load(&path);
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn snapshot(&self) -> RuntimeConfig {
        self.config
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Mutate the document and persist it.
    pub fn update(&self, mutate: impl FnOnce(&mut RuntimeConfig)) {
        let Ok(mut config) = self.config.lock() else {
            return;
        };
        mutate(&mut config);
        if let Err(e) = config.save(&self.path) {
            warn!("failed to persist config to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runtime.json");

        let mut config = RuntimeConfig::default();
        config.slot0_model = Some("/models/clean.onnx".into());
        config.active_slot = Some(1);
        config.input_gain_l = Some(-3.5);
        config.eq_enabled = Some(true);
        config.eq_bass_r = Some(4.0);
        config.noise_gate_threshold = Some(-42.0);
        config.reverb_wet = Some(0.25);
        config.stereo_mode = Some("Stereo2Mono".into());

        config.save(&path).expect("save");
        let loaded = RuntimeConfig::load(&path);
        assert_eq!(loaded, config);

        // Saving the loaded document is idempotent
        loaded.save(&path).expect("save again");
        assert_eq!(RuntimeConfig::load(&path), loaded);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = RuntimeConfig::load(Path::new("/nonexistent/runtime.json"));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, "{not json").expect("write");

        let config = RuntimeConfig::load(&path);
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_absent_keys_are_not_serialized() {
        let mut config = RuntimeConfig::default();
        config.eq_bass = Some(1.0);

        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("eqBass"));
        assert!(!json.contains("slot0Model"));
        assert!(!json.contains("reverbEnabled"));
    }

    #[test]
    fn test_apply_pushes_values_into_engine() {
        let engine = Engine::new(48000, 128);

        let mut config = RuntimeConfig::default();
        config.input_gain = Some(-6.0);
        config.input_gain_l = Some(2.0);
        config.bypass_model_r = Some(false);
        config.stereo_mode = Some("Stereo2Stereo".into());
        config.noise_gate_enabled = Some(true);
        config.noise_gate_threshold = Some(-30.0);
        config.apply(&engine);

        // Per-channel wins on L; legacy fills R
        assert!((engine.input_gain_l() - 2.0).abs() < 1e-3);
        assert!((engine.input_gain_r() - (-6.0)).abs() < 1e-3);
        assert!(!engine.bypass_model_r());
        assert_eq!(engine.stereo_mode().as_str(), "Stereo2Stereo");
        assert!(engine.noise_gate_enabled());
        assert!((engine.noise_gate_threshold() - (-30.0)).abs() < 1e-6);
    }

    #[test]
    fn test_config_store_updates_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runtime.json");

        let store = ConfigStore::open(path.clone());
        store.update(|c| c.active_slot = Some(1));
        store.update(|c| c.set_slot_model(0, Some("/m/a.onnx".into())));

        let reloaded = RuntimeConfig::load(&path);
        assert_eq!(reloaded.active_slot, Some(1));
        assert_eq!(reloaded.slot_model(0), Some("/m/a.onnx"));
    }
}
