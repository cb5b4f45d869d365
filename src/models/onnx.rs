//! Cross-framework models executed with ONNX Runtime

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("failed to create session: {0}")]
    Session(String),

    #[error("model declares no {0}")]
    MissingBinding(&'static str),

    #[error("failed to run session: {0}")]
    Run(String),

    #[error("output '{name}' is not an f32 tensor: {cause}")]
    Output { name: String, cause: String },
}

fn session_error(e: impl Display) -> OnnxError {
    OnnxError::Session(e.to_string())
}

fn run_error(e: impl Display) -> OnnxError {
    OnnxError::Run(e.to_string())
}

/// Loaded ONNX model with its resolved input/output bindings
pub struct OnnxModel {
    session: Session,
    /// Input the request tensor is bound to
    input_name: String,
    /// First declared output; its tensor is the model result
    output_name: String,
}

impl OnnxModel {
    /// Load a model file.
    ///
    /// The input binding is `preferred_input` when the model declares it,
    /// otherwise the model's first input.
    pub fn load(path: &Path, threads: usize, preferred_input: &str) -> Result<Self, OnnxError> {
        // Environment init is idempotent; a failure resurfaces when the session is built
        if let Err(e) = ort::init().commit() {
            warn!(error = %e, "ONNX Runtime environment init failed");
        }

        info!(path = %path.display(), threads = threads, "Loading ONNX model");

        let session = Session::builder()
            .map_err(session_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(session_error)?
            .with_intra_threads(threads)
            .map_err(session_error)?
            .commit_from_file(path)
            .map_err(session_error)?;

        let input_name = session
            .inputs
            .iter()
            .find(|i| i.name == preferred_input)
            .or_else(|| session.inputs.first())
            .map(|i| i.name.clone())
            .ok_or(OnnxError::MissingBinding("inputs"))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or(OnnxError::MissingBinding("outputs"))?;

        info!(input = %input_name, output = %output_name, "ONNX model loaded");

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Bind `data` (laid out as `shape`) to the input and return the first output, flattened
    pub fn run(&mut self, shape: Vec<i64>, data: Vec<f32>) -> Result<Vec<f32>, OnnxError> {
        debug!(input = %self.input_name, shape = ?shape, "Running ONNX session");

        let tensor = Tensor::from_array((shape, data)).map_err(run_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(run_error)?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or(OnnxError::MissingBinding("outputs"))?;
        let (_, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxError::Output {
                name: self.output_name.clone(),
                cause: e.to_string(),
            })?;

        Ok(values.to_vec())
    }
}
