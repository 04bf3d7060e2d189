//! Neural amp model inference via ONNX Runtime
//!
//! Each loaded capture is one `ort` session. Inference runs on whole blocks
//! with shape `[1, n]`; the model's recommended output level is read from
//! the ONNX metadata so the engine can normalize between captures.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, CowArray};
use once_cell::sync::OnceCell;
use ort::{Environment, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder};
use thiserror::Error;

/// Shared ONNX Runtime environment, initialized on first model load.
static ORT_ENVIRONMENT: OnceCell<Arc<Environment>> = OnceCell::new();

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to initialize ONNX runtime: {0}")]
    Runtime(String),

    #[error("failed to load model '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

fn ort_environment() -> Result<&'static Arc<Environment>, ModelError> {
    ORT_ENVIRONMENT.get_or_try_init(|| {
        Environment::builder()
            .with_name("hoopi-pi")
            .with_execution_providers([ExecutionProvider::CPU(Default::default())])
            .build()
            .map(|env| env.into_arc())
            .map_err(|e| ModelError::Runtime(e.to_string()))
    })
}

/// One loaded amp capture
pub struct NeuralModel {
    session: Session,
    /// Inference output lands here before being copied back in place
    scratch: Vec<f32>,
    max_block: usize,
    sample_rate: u32,
    recommended_output_db: f32,
}

impl NeuralModel {
    /// Load a model from an .onnx amp capture.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let environment = ort_environment()?;

        let load_err = |e: String| ModelError::Load {
            path: path.display().to_string(),
            reason: e,
        };

        let session = SessionBuilder::new(environment)
            .map_err(|e| load_err(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| load_err(e.to_string()))?
            .with_model_from_file(path)
            .map_err(|e| load_err(e.to_string()))?;

        // Captures carry their training rate and loudness in the metadata
        let mut sample_rate = 48000u32;
        let mut recommended_output_db = 0.0f32;
        if let Ok(metadata) = session.metadata() {
            if let Ok(Some(rate)) = metadata.custom("sample_rate") {
                if let Ok(parsed) = rate.trim().parse::<f32>() {
                    sample_rate = parsed as u32;
                }
            }
            if let Ok(Some(loudness)) = metadata.custom("loudness") {
                if let Ok(parsed) = loudness.trim().parse::<f32>() {
                    recommended_output_db = parsed;
                }
            }
        }

        Ok(Self {
            session,
            scratch: Vec::new(),
            max_block: 0,
            sample_rate,
            recommended_output_db,
        })
    }

    /// Preallocate for the engine's maximum block length.
    pub fn set_max_block_size(&mut self, max_block: usize) {
        self.max_block = max_block;
        self.scratch.resize(max_block.max(1), 0.0);
    }

    /// Run block inference in place. The buffer is only written on success.
    pub fn process_in_place(&mut self, buffer: &mut [f32]) -> Result<(), ModelError> {
        let n = buffer.len();
        if n == 0 {
            return Ok(());
        }

        let input = CowArray::from(
            Array2::from_shape_vec((1, n), buffer.to_vec())
                .map_err(|e| ModelError::Inference(e.to_string()))?
                .into_dyn(),
        );
        let value = ort::Value::from_array(self.session.allocator(), &input)
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(vec![value])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let tensor = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model produced no output".into()))?
            .try_extract::<f32>()
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let view = tensor.view();
        let flat = view
            .as_slice()
            .ok_or_else(|| ModelError::Inference("non-contiguous model output".into()))?;
        if flat.len() < n {
            return Err(ModelError::Inference(format!(
                "model returned {} samples for a {} sample block",
                flat.len(),
                n
            )));
        }

        self.scratch[..n].copy_from_slice(&flat[..n]);
        buffer.copy_from_slice(&self.scratch[..n]);
        Ok(())
    }

    /// The capture's native sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Recommended output level adjustment in dB, from model metadata.
    pub fn recommended_output_db(&self) -> f32 {
        self.recommended_output_db
    }
}
