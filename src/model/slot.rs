//! Asynchronous model slot with click-free crossfades
//!
//! Each slot owns one long-lived worker thread that loads captures from
//! disk and hot-swaps them into the live graph. The audio thread only ever
//! sees a consistent slot: the `ready` flag gates model access, and a
//! linear fade-out handshake guarantees the worker never destroys a model
//! the audio thread is still running.
//!
//! The fade state machine is driven entirely from the audio thread; the
//! worker only requests transitions through atomic flags and waits on a
//! condvar for the fade-out to drain.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info};

use super::neural::NeuralModel;
use crate::util::AtomicF32;

/// Crossfade length, ~5 ms at 48 kHz
pub const FADE_SAMPLES: u32 = 256;

/// Worker waits this long for a fade-out before proceeding anyway
const FADE_OUT_TIMEOUT: Duration = Duration::from_millis(60);

/// Unload waits a little longer since it runs on a control thread
const UNLOAD_TIMEOUT: Duration = Duration::from_millis(100);

/// Silent samples pushed through a fresh model to settle internal state
const PREWARM_SAMPLES: usize = 256;

const FADE_IDLE: u8 = 0;
const FADE_OUT: u8 = 1;
const FADE_IN: u8 = 2;

struct SlotShared {
    max_block: usize,

    /// Installed model. Swapped only while `ready` is false; the audio
    /// thread try-locks and treats contention as not-ready.
    model: Mutex<Option<NeuralModel>>,
    ready: AtomicBool,

    /// Path of the installed model, worker-written
    path: Mutex<String>,
    /// Last load failure, surfaced through status
    last_error: Mutex<String>,

    normalization_gain: AtomicF32,
    model_sample_rate: AtomicU32,

    // Fade requests (worker -> audio thread)
    do_ramp_down: AtomicBool,
    do_ramp_up: AtomicBool,

    // Fade state (audio-thread private, atomics for shared storage only)
    fade_state: AtomicU8,
    fade_remaining: AtomicU32,
    fade_gain: AtomicF32,

    // Fade-out completion handshake
    sync_mutex: Mutex<()>,
    sync_cv: Condvar,

    // Load requests; a new request supersedes any pending one
    pending: Mutex<Option<PathBuf>>,
    work_cv: Condvar,
    worker_running: AtomicBool,
}

/// A named, replaceable holder for one neural model
pub struct ModelSlot {
    shared: Arc<SlotShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ModelSlot {
    pub fn new(max_block: usize) -> Self {
        let shared = Arc::new(SlotShared {
            max_block,
            model: Mutex::new(None),
            ready: AtomicBool::new(false),
            path: Mutex::new(String::new()),
            last_error: Mutex::new(String::new()),
            normalization_gain: AtomicF32::new(1.0),
            model_sample_rate: AtomicU32::new(0),
            do_ramp_down: AtomicBool::new(false),
            do_ramp_up: AtomicBool::new(false),
            fade_state: AtomicU8::new(FADE_IDLE),
            fade_remaining: AtomicU32::new(0),
            fade_gain: AtomicF32::new(0.0),
            sync_mutex: Mutex::new(()),
            sync_cv: Condvar::new(),
            pending: Mutex::new(None),
            work_cv: Condvar::new(),
            worker_running: AtomicBool::new(true),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("model-loader".into())
            .spawn(move || worker_loop(worker_shared))
            .ok();

        Self { shared, worker }
    }

    // ===== Control surface =====

    /// Queue an asynchronous load. Replaces any request not yet started.
    pub fn load_async(&self, path: PathBuf) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            *pending = Some(path);
        }
        self.shared.work_cv.notify_one();
    }

    /// Fade out, drop the installed model and clear the path. Runs on the
    /// calling control thread.
    pub fn unload(&self) {
        let shared = &self.shared;
        if shared.ready.load(Ordering::Acquire) {
            shared.do_ramp_down.store(true, Ordering::Release);
            wait_fade_out(shared, UNLOAD_TIMEOUT);
        }

        shared.ready.store(false, Ordering::Release);
        if let Ok(mut model) = shared.model.lock() {
            *model = None;
        }
        if let Ok(mut path) = shared.path.lock() {
            path.clear();
        }
        shared.normalization_gain.store(1.0, Ordering::Relaxed);
        shared.model_sample_rate.store(0, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    pub fn model_path(&self) -> String {
        self.shared
            .path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> String {
        self.shared
            .last_error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn model_sample_rate(&self) -> u32 {
        self.shared.model_sample_rate.load(Ordering::Acquire)
    }

    // ===== Audio thread =====

    /// Process a block in place. Not ready (or the worker mid-install)
    /// leaves the buffer untouched; otherwise the model runs, optional
    /// normalization applies, and any active fade envelope shapes the tail.
    pub fn process(&self, buffer: &mut [f32], normalize: bool) {
        let shared = &self.shared;

        if shared.ready.load(Ordering::Acquire) {
            if let Ok(mut guard) = shared.model.try_lock() {
                if let Some(model) = guard.as_mut() {
                    if model.process_in_place(buffer).is_ok() && normalize {
                        let gain = shared.normalization_gain.load(Ordering::Relaxed);
                        if gain != 1.0 {
                            for sample in buffer.iter_mut() {
                                *sample *= gain;
                            }
                        }
                    }
                }
            }
        }

        self.apply_fade(buffer);
    }

    /// Drive the fade state machine over one block.
    fn apply_fade(&self, buffer: &mut [f32]) {
        let shared = &self.shared;

        let mut state = shared.fade_state.load(Ordering::Relaxed);

        // Pick up worker requests
        if shared.do_ramp_down.load(Ordering::Acquire) && state != FADE_OUT {
            state = FADE_OUT;
            shared.fade_state.store(state, Ordering::Relaxed);
            shared.fade_remaining.store(FADE_SAMPLES, Ordering::Relaxed);
            shared.fade_gain.store(1.0, Ordering::Relaxed);
        } else if shared.do_ramp_up.load(Ordering::Acquire) && state != FADE_IN {
            state = FADE_IN;
            shared.fade_state.store(state, Ordering::Relaxed);
            shared.fade_remaining.store(FADE_SAMPLES, Ordering::Relaxed);
            shared.fade_gain.store(0.0, Ordering::Relaxed);
        }

        if state == FADE_IDLE {
            return;
        }

        let mut remaining = shared.fade_remaining.load(Ordering::Relaxed);
        let mut gain = shared.fade_gain.load(Ordering::Relaxed);

        for sample in buffer.iter_mut() {
            if remaining == 0 {
                break;
            }

            gain = if state == FADE_OUT {
                remaining as f32 / FADE_SAMPLES as f32
            } else {
                1.0 - (remaining as f32 / FADE_SAMPLES as f32)
            };

            *sample *= gain;
            remaining -= 1;

            if remaining == 0 {
                if state == FADE_OUT {
                    gain = 0.0;
                    shared.do_ramp_down.store(false, Ordering::Release);
                    // Wake the worker waiting on the fade-out drain
                    shared.sync_cv.notify_all();
                } else {
                    gain = 1.0;
                    shared.do_ramp_up.store(false, Ordering::Release);
                }
                state = FADE_IDLE;
            }
        }

        shared.fade_state.store(state, Ordering::Relaxed);
        shared.fade_remaining.store(remaining, Ordering::Relaxed);
        shared.fade_gain.store(gain, Ordering::Relaxed);
    }
}

impl Drop for ModelSlot {
    fn drop(&mut self) {
        self.shared.worker_running.store(false, Ordering::Release);
        self.shared.work_cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Block until the audio thread reports the fade-out drained, or timeout.
fn wait_fade_out(shared: &SlotShared, timeout: Duration) {
    let Ok(guard) = shared.sync_mutex.lock() else {
        return;
    };
    let _ = shared
        .sync_cv
        .wait_timeout_while(guard, timeout, |_| {
            shared.do_ramp_down.load(Ordering::Acquire)
        })
        .map(|(_, result)| {
            if result.timed_out() {
                // Audio thread may not be running; proceed regardless
                shared.do_ramp_down.store(false, Ordering::Release);
            }
        });
}

fn worker_loop(shared: Arc<SlotShared>) {
    while shared.worker_running.load(Ordering::Acquire) {
        let request = {
            let Ok(mut pending) = shared.pending.lock() else {
                return;
            };
            loop {
                if !shared.worker_running.load(Ordering::Acquire) {
                    return;
                }
                if let Some(path) = pending.take() {
                    break path;
                }
                pending = match shared.work_cv.wait(pending) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        };

        do_load(&shared, request);
    }
}

fn do_load(shared: &SlotShared, path: PathBuf) {
    // Fade out whatever is currently playing through this slot
    if shared.ready.load(Ordering::Acquire) {
        shared.do_ramp_down.store(true, Ordering::Release);
        wait_fade_out(shared, FADE_OUT_TIMEOUT);
    }

    shared.ready.store(false, Ordering::Release);

    let mut model = match NeuralModel::from_file(&path) {
        Ok(model) => model,
        Err(e) => {
            error!("model load failed: {}", e);
            if let Ok(mut p) = shared.path.lock() {
                p.clear();
            }
            if let Ok(mut last) = shared.last_error.lock() {
                *last = e.to_string();
            }
            return;
        }
    };

    model.set_max_block_size(shared.max_block);
    shared
        .model_sample_rate
        .store(model.sample_rate(), Ordering::Release);

    // Normalization toward a -6 dB target
    let loudness = model.recommended_output_db();
    let norm_gain = 10.0f32.powf((-6.0 + loudness) / 20.0);
    shared.normalization_gain.store(norm_gain, Ordering::Release);

    // Prewarm so the first live block doesn't carry startup transients
    let mut silence = vec![0.0f32; shared.max_block.max(1).min(PREWARM_SAMPLES)];
    let mut warmed = 0;
    while warmed < PREWARM_SAMPLES {
        if model.process_in_place(&mut silence).is_err() {
            break;
        }
        warmed += silence.len();
        silence.fill(0.0);
    }

    // Install; the previous model is dropped here, on the worker
    if let Ok(mut slot_model) = shared.model.lock() {
        *slot_model = Some(model);
    }
    if let Ok(mut p) = shared.path.lock() {
        *p = path.display().to_string();
    }
    if let Ok(mut last) = shared.last_error.lock() {
        last.clear();
    }

    shared.do_ramp_up.store(true, Ordering::Release);
    shared.ready.store(true, Ordering::Release);

    info!("model installed: {}", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unready_slot_is_passthrough() {
        let slot = ModelSlot::new(128);
        let mut buffer: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let original = buffer.clone();

        slot.process(&mut buffer, true);

        assert_eq!(buffer, original);
        assert!(!slot.is_ready());
        assert_eq!(slot.model_path(), "");
    }

    #[test]
    fn test_load_of_missing_file_reports_error() {
        let slot = ModelSlot::new(128);
        slot.load_async(PathBuf::from("/nonexistent/amp.onnx"));

        // Worker should fail quickly and leave the slot unready
        for _ in 0..100 {
            if !slot.last_error().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert!(!slot.is_ready());
        assert_eq!(slot.model_path(), "");
        assert!(!slot.last_error().is_empty());
    }

    #[test]
    fn test_unload_clears_state() {
        let slot = ModelSlot::new(128);
        slot.unload();
        assert!(!slot.is_ready());
        assert_eq!(slot.model_path(), "");
    }

    #[test]
    fn test_fade_out_request_ramps_to_zero() {
        let slot = ModelSlot::new(512);

        // Request a fade-out directly; the slot is a passthrough so the
        // envelope shapes the raw input
        slot.shared.do_ramp_down.store(true, Ordering::Release);

        let mut buffer = vec![1.0f32; 512];
        slot.process(&mut buffer, false);

        // Monotone non-increasing ramp over the fade window, with the
        // per-sample step bounded by 1/FADE_SAMPLES
        for window in buffer[..FADE_SAMPLES as usize].windows(2) {
            assert!(window[1] <= window[0] + 1e-6);
            assert!((window[0] - window[1]).abs() <= 1.0 / FADE_SAMPLES as f32 + 1e-6);
        }
        assert!(buffer[FADE_SAMPLES as usize - 1] <= 1.0 / FADE_SAMPLES as f32 + 1e-6);

        // Handshake flag cleared once drained
        assert!(!slot.shared.do_ramp_down.load(Ordering::Acquire));
    }

    #[test]
    fn test_fade_in_ramps_up() {
        let slot = ModelSlot::new(512);
        slot.shared.do_ramp_up.store(true, Ordering::Release);

        let mut buffer = vec![1.0f32; 512];
        slot.process(&mut buffer, false);

        for window in buffer[..FADE_SAMPLES as usize].windows(2) {
            assert!(window[1] >= window[0] - 1e-6);
        }
        assert!(!slot.shared.do_ramp_up.load(Ordering::Acquire));
    }
}
