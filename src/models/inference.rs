//! Inference dispatch over every runtime kind

use super::classical::{Estimator, Features};
use super::{Capability, LoadedArtifact, ModelHandle, RuntimeKind};
use crate::error::InferenceError;
use ndarray::ArrayView2;
use serde_json::Value;
use tracing::debug;

/// Preprocessed request, ready for a runtime
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedInput {
    /// One document for text pipelines
    Text(String),
    /// Dense tensor without the batch dimension (images are `[3, H, W]`)
    Tensor { shape: Vec<usize>, data: Vec<f32> },
    /// Flat numeric feature row
    Numeric(Vec<f32>),
    /// Unspecialized JSON payload
    Raw(Value),
}

impl NormalizedInput {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedInput::Text(_) => "text",
            NormalizedInput::Tensor { .. } => "tensor",
            NormalizedInput::Numeric(_) => "numeric",
            NormalizedInput::Raw(_) => "raw JSON",
        }
    }

    /// Batched shape and flat data for tensor runtimes
    fn dense(&self, runtime: RuntimeKind) -> Result<(Vec<usize>, Vec<f32>), InferenceError> {
        match self {
            NormalizedInput::Tensor { shape, data } => {
                let mut batched = Vec::with_capacity(shape.len() + 1);
                batched.push(1);
                batched.extend_from_slice(shape);
                Ok((batched, data.clone()))
            }
            NormalizedInput::Numeric(values) => Ok((vec![1, values.len()], values.clone())),
            NormalizedInput::Raw(Value::Array(items)) => {
                let values = items
                    .iter()
                    .map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Option<Vec<f32>>>()
                    .ok_or_else(|| self.incompatible(runtime))?;
                Ok((vec![1, values.len()], values))
            }
            _ => Err(self.incompatible(runtime)),
        }
    }

    fn text(&self, runtime: RuntimeKind) -> Result<&str, InferenceError> {
        match self {
            NormalizedInput::Text(text) => Ok(text),
            NormalizedInput::Raw(Value::String(text)) => Ok(text),
            _ => Err(self.incompatible(runtime)),
        }
    }

    fn incompatible(&self, runtime: RuntimeKind) -> InferenceError {
        InferenceError::IncompatibleInput {
            runtime: runtime.as_str(),
            input: self.kind(),
        }
    }
}

/// Which classical entry point to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRequest {
    /// Per-class scores (`predict_proba`)
    Scores,
    /// Point prediction (`predict`)
    Prediction,
}

/// Flat numeric model output
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub values: Vec<f64>,
}

impl RawOutput {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    fn from_f32(values: impl IntoIterator<Item = f32>) -> Self {
        Self::new(values.into_iter().map(f64::from).collect())
    }
}

/// Run one inference on a loaded artifact
pub fn infer(
    artifact: &mut LoadedArtifact,
    input: &NormalizedInput,
    want: OutputRequest,
) -> Result<RawOutput, InferenceError> {
    let output = match artifact {
        LoadedArtifact::Single(handle) => infer_handle(handle, input, want)?,
        LoadedArtifact::Bundled(bundle) => {
            let runtime = RuntimeKind::ClassicalPipeline;
            let doc = input.text(runtime)?;
            let features = bundle
                .features(doc)
                .map_err(|e| InferenceError::runtime(runtime.as_str(), e))?;
            run_classical(&bundle.classifier, features, want)?
        }
    };

    debug!(
        runtime = %artifact.runtime_kind(),
        outputs = output.values.len(),
        "Inference complete"
    );
    Ok(output)
}

fn infer_handle(
    handle: &mut ModelHandle,
    input: &NormalizedInput,
    want: OutputRequest,
) -> Result<RawOutput, InferenceError> {
    let runtime = handle.runtime_kind();
    let failed = |e: &dyn std::fmt::Display| InferenceError::runtime(runtime.as_str(), e);

    match handle {
        ModelHandle::TensorNetwork(network) => {
            let (_, data) = input.dense(runtime)?;
            let output = network.forward(&data).map_err(|e| failed(&e))?;
            Ok(RawOutput::from_f32(output))
        }
        ModelHandle::Graph(graph) => {
            let (_, data) = input.dense(runtime)?;
            let batch = ArrayView2::from_shape((1, data.len()), &data).map_err(|e| failed(&e))?;
            let output = graph.predict_batch(batch).map_err(|e| failed(&e))?;
            Ok(RawOutput::from_f32(output.iter().copied()))
        }
        ModelHandle::Classical(estimator) => {
            let features = if estimator.accepts_text() {
                Features::text(input.text(runtime)?)
            } else {
                let (_, data) = input.dense(runtime)?;
                Features::row(&data)
            };
            run_classical(estimator, features, want)
        }
        ModelHandle::CrossFramework(model) => {
            let (shape, data) = input.dense(runtime)?;
            let shape = shape.into_iter().map(|d| d as i64).collect();
            let output = model.run(shape, data).map_err(|e| failed(&e))?;
            Ok(RawOutput::from_f32(output))
        }
    }
}

fn run_classical(
    estimator: &Estimator,
    features: Features,
    want: OutputRequest,
) -> Result<RawOutput, InferenceError> {
    let runtime = RuntimeKind::ClassicalPipeline.as_str();
    let capability = match want {
        OutputRequest::Scores => Capability::PredictProba,
        OutputRequest::Prediction => Capability::Predict,
    };
    if !estimator.capabilities().contains(&capability) {
        return Err(InferenceError::UnsupportedModelType(format!(
            "{} does not support {:?}",
            estimator.name(),
            capability
        )));
    }

    let values = match want {
        OutputRequest::Scores => estimator
            .predict_proba(features)
            .map_err(|e| InferenceError::runtime(runtime, e))?
            .into_iter()
            .collect(),
        OutputRequest::Prediction => estimator
            .predict(features)
            .map_err(|e| InferenceError::runtime(runtime, e))?
            .to_vec(),
    };
    Ok(RawOutput::new(values))
}
