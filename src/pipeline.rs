//! The load → preprocess → infer → postprocess pipeline

use crate::config::{AppConfig, DefaultsConfig};
use crate::error::AdapterResult;
use crate::models::{infer, DeclaredFormat, LoadedArtifact, ModelLoader, OutputRequest};
use crate::postprocess::postprocess;
use crate::preprocess::Preprocessor;
use crate::types::{InferenceRequest, InferenceResult, ResponseEnvelope, TaskConfig};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

/// Successful invocation: normalized result plus envelope metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub output: InferenceResult,
    pub metadata: Map<String, Value>,
}

/// One-shot inference adapter
pub struct Adapter {
    loader: ModelLoader,
    preprocessor: Preprocessor,
    defaults: DefaultsConfig,
}

impl Adapter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            loader: ModelLoader::new(&config.runtime),
            preprocessor: Preprocessor::new(&config.limits),
            defaults: config.defaults.clone(),
        }
    }

    /// Run one request against the model at `model_path`
    pub fn run(&self, model_path: &Path, request: &InferenceRequest) -> AdapterResult<Outcome> {
        let declared = request
            .model_format
            .as_deref()
            .map(str::parse::<DeclaredFormat>)
            .transpose()?;

        let mut artifact = self.loader.load_artifact(model_path, declared)?;
        let task = self.task_for(request, &artifact);

        let input = self.preprocessor.preprocess(&request.input, &task)?;
        let want = if task.model_type.is_classification() {
            OutputRequest::Scores
        } else {
            OutputRequest::Prediction
        };
        let raw = infer(&mut artifact, &input, want)?;
        let output = postprocess(&raw, &task)?;

        info!(
            model = %model_path.display(),
            runtime = %artifact.runtime_kind(),
            model_type = %task.model_type,
            label = output.label().unwrap_or("-"),
            "Inference succeeded"
        );

        let mut metadata = Map::new();
        metadata.insert(
            "runtime".to_string(),
            Value::from(artifact.runtime_kind().as_str()),
        );
        metadata.insert("model_type".to_string(), Value::from(task.model_type.as_str()));
        if let LoadedArtifact::Bundled(bundle) = &artifact {
            metadata.insert("bundle".to_string(), Value::Object(bundle.metadata.clone()));
        }

        Ok(Outcome { output, metadata })
    }

    /// Request labels win, then bundle metadata labels, then configured defaults
    fn task_for(&self, request: &InferenceRequest, artifact: &LoadedArtifact) -> TaskConfig {
        let mut task = request.task_config(&self.defaults);
        if request.model_config.labels.is_none() {
            if let LoadedArtifact::Bundled(bundle) = artifact {
                if let Some(labels) = bundle.labels() {
                    task.labels = Some(labels);
                }
            }
        }
        task
    }

    /// Parse the request argument, run it and wrap the result in an envelope
    pub fn respond(&self, model_path: &Path, request_arg: &str) -> ResponseEnvelope {
        match self.try_respond(model_path, request_arg) {
            Ok(Outcome { output, metadata }) => ResponseEnvelope::success(output, metadata),
            Err(err) => {
                warn!(model = %model_path.display(), error = %format!("{:#}", err), "Inference failed");
                ResponseEnvelope::from_error(&err)
            }
        }
    }

    fn try_respond(&self, model_path: &Path, request_arg: &str) -> anyhow::Result<Outcome> {
        let request = InferenceRequest::from_arg(request_arg)?;
        Ok(self.run(model_path, &request)?)
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new(&AppConfig::default())
    }
}
