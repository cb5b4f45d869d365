//! Model packaging: validate, hash and describe a model for distribution.
//!
//! A package is a directory holding `model_metadata.json` and a copy of the
//! model file named `model.<ext>`.

use crate::error::{AdapterError, LoadError};
use crate::models::{
    infer, Capability, DeclaredFormat, LoadedArtifact, ModelLoader, NormalizedInput,
    OutputRequest, RuntimeKind,
};
use crate::types::InputSize;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the metadata document inside a package
pub const METADATA_FILE: &str = "model_metadata.json";

/// Task names accepted for `model_type`
pub const MODEL_TYPES: [&str; 5] = [
    "text_classification",
    "image_classification",
    "sentiment_analysis",
    "regression",
    "other",
];

const HASH_BLOCK_SIZE: usize = 4096;
const DUMMY_TEXT: &str = "package validation sample";

/// Framework the model was produced with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Pytorch,
    Tensorflow,
    Sklearn,
    Onnx,
    Other,
}

/// Descriptive fields supplied by the packager
#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub name: String,
    pub description: String,
    pub model_type: String,
    pub framework: Framework,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub version: String,
    pub creator: Option<String>,
    pub license: String,
    pub labels: Option<Vec<String>>,
    pub input_size: Option<InputSize>,
    /// Overrides extension-based format detection
    pub format: Option<DeclaredFormat>,
}

impl PackageOptions {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        model_type: impl Into<String>,
        framework: Framework,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model_type: model_type.into(),
            framework,
            input_format: None,
            output_format: None,
            version: "1.0.0".to_string(),
            creator: None,
            license: "MIT".to_string(),
            labels: None,
            input_size: None,
            format: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub labels: Option<Vec<String>>,
    pub input_size: Option<[u32; 2]>,
}

/// Contents of `model_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub description: String,
    pub model_type: String,
    pub framework: Framework,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub version: String,
    pub creator: Option<String>,
    pub license: String,
    /// SHA-256 of the model file, lowercase hex
    pub hash: String,
    pub packaged_at: DateTime<Utc>,
    pub config: PackageConfig,
}

/// SHA-256 of a file as lowercase hex, read in fixed-size blocks
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Load the model and push one dummy input through it.
///
/// The dummy input is random features sized from the model's declared input
/// width, or a short document for text pipelines. Models that declare
/// neither are only loaded.
pub fn validate_model(
    loader: &ModelLoader,
    path: &Path,
    declared: Option<DeclaredFormat>,
) -> Result<RuntimeKind, AdapterError> {
    let mut artifact = loader.load_artifact(path, declared)?;
    let runtime = artifact.runtime_kind();

    let probe = match &artifact {
        LoadedArtifact::Bundled(_) => Some((
            NormalizedInput::Text(DUMMY_TEXT.to_string()),
            OutputRequest::Scores,
        )),
        LoadedArtifact::Single(handle) => {
            let want = if handle.capabilities().contains(&Capability::PredictProba) {
                OutputRequest::Scores
            } else {
                OutputRequest::Prediction
            };
            let text_pipeline = matches!(
                handle,
                crate::models::ModelHandle::Classical(estimator) if estimator.accepts_text()
            );
            if text_pipeline {
                Some((NormalizedInput::Text(DUMMY_TEXT.to_string()), want))
            } else {
                handle
                    .input_width()
                    .map(|width| (NormalizedInput::Numeric(random_features(width)), want))
            }
        }
    };

    match probe {
        Some((input, want)) => {
            let output = infer(&mut artifact, &input, want)?;
            debug!(runtime = %runtime, outputs = output.values.len(), "Dummy inference passed");
        }
        None => info!(runtime = %runtime, "Model declares no input width; skipped dummy inference"),
    }

    Ok(runtime)
}

fn random_features(width: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..width).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Validate a model and write its package into `output_dir`
pub fn package_model(
    loader: &ModelLoader,
    model_path: &Path,
    output_dir: &Path,
    options: &PackageOptions,
) -> Result<PackageMetadata> {
    if !model_path.exists() {
        return Err(LoadError::FileNotFound(model_path.display().to_string()).into());
    }
    if !MODEL_TYPES.contains(&options.model_type.as_str()) {
        anyhow::bail!(
            "Unknown model type '{}' (expected one of {})",
            options.model_type,
            MODEL_TYPES.join(", ")
        );
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    info!(model = %model_path.display(), "Validating model");
    let runtime = validate_model(loader, model_path, options.format)
        .with_context(|| format!("Model validation failed for {}", model_path.display()))?;
    info!(runtime = %runtime, "Model validation successful");

    let hash = hash_file(model_path)
        .with_context(|| format!("Failed to hash {}", model_path.display()))?;

    let metadata = PackageMetadata {
        name: options.name.clone(),
        description: options.description.clone(),
        model_type: options.model_type.clone(),
        framework: options.framework,
        input_format: options.input_format.clone(),
        output_format: options.output_format.clone(),
        version: options.version.clone(),
        creator: options.creator.clone(),
        license: options.license.clone(),
        hash,
        packaged_at: Utc::now(),
        config: PackageConfig {
            labels: options.labels.clone(),
            input_size: options.input_size.map(Into::into),
        },
    };

    let metadata_path = output_dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    std::fs::write(&metadata_path, json)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    let packaged = packaged_model_path(model_path, output_dir);
    std::fs::copy(model_path, &packaged)
        .with_context(|| format!("Failed to copy model to {}", packaged.display()))?;

    info!(
        output_dir = %output_dir.display(),
        hash = %metadata.hash,
        "Model packaged successfully"
    );
    Ok(metadata)
}

/// `model.<ext>` inside the package, keeping the original extension
pub fn packaged_model_path(model_path: &Path, output_dir: &Path) -> PathBuf {
    match model_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => output_dir.join(format!("model.{}", ext)),
        None => output_dir.join("model"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_known_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        assert_eq!(
            hash_file(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_spans_blocks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![7u8; HASH_BLOCK_SIZE * 2 + 17];
        file.write_all(&data).unwrap();
        assert_eq!(
            hash_file(file.path()).unwrap(),
            hex::encode(Sha256::digest(&data))
        );
    }

    #[test]
    fn test_packaged_model_name() {
        let out = Path::new("/tmp/pkg");
        assert_eq!(
            packaged_model_path(Path::new("/a/spam.bundle"), out),
            out.join("model.bundle")
        );
        assert_eq!(packaged_model_path(Path::new("/a/weights"), out), out.join("model"));
    }

    #[test]
    fn test_dense_model_gets_dummy_pass() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"type": "logistic_regression", "coef": [[0.5, -0.5, 1.0]], "intercept": [0.0]}"#)
            .unwrap();
        let runtime = validate_model(&ModelLoader::default(), file.path(), None).unwrap();
        assert_eq!(runtime, RuntimeKind::ClassicalPipeline);
    }
}
