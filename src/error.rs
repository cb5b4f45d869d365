//! Error taxonomy for every pipeline stage.
//!
//! Each stage fails fast with its own named error; [`AdapterError`] is what
//! the pipeline surfaces to the envelope builder.

use thiserror::Error;

/// Failures while resolving and deserializing a model file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    FileNotFound(String),

    #[error("Model file is empty: {0}")]
    EmptyFile(String),

    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to deserialize model {path}: {cause}")]
    DeserializationFailed { path: String, cause: String },

    #[error("Failed to read model file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    pub(crate) fn deserialization(path: impl Into<String>, cause: impl ToString) -> Self {
        LoadError::DeserializationFailed {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

/// Failures specific to the single-file classifier + vectorizer bundle.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Bundle is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("Invalid classifier in bundle: {0}")]
    InvalidClassifier(String),

    #[error("Invalid vectorizer in bundle: {0}")]
    InvalidVectorizer(String),

    #[error("Invalid bundle metadata: {0}")]
    InvalidMetadata(String),
}

/// Failures while adapting a request payload to model input.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("Input too large: {size} bytes exceeds limit of {limit} bytes")]
    OversizedInput { size: usize, limit: usize },

    #[error("Invalid payload shape: {0}")]
    InvalidPayloadShape(String),

    #[error("Invalid task configuration: {0}")]
    InvalidTaskConfig(String),
}

/// Failures raised by the dispatcher or the underlying runtime.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("{runtime} cannot consume {input} input")]
    IncompatibleInput {
        runtime: &'static str,
        input: &'static str,
    },

    #[error("{runtime} inference failed: {message}")]
    RuntimeFailure {
        runtime: &'static str,
        message: String,
    },
}

impl InferenceError {
    pub(crate) fn runtime(runtime: &'static str, cause: impl ToString) -> Self {
        InferenceError::RuntimeFailure {
            runtime,
            message: cause.to_string(),
        }
    }
}

/// Failures while normalizing raw model output.
#[derive(Error, Debug)]
pub enum PostprocessError {
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Label count mismatch: {labels} labels configured but model produced {outputs} outputs")]
    LabelMismatch { labels: usize, outputs: usize },
}

/// Top-level error of one adapter invocation.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to load model")]
    Load(#[from] LoadError),

    #[error("Failed to load bundle")]
    Bundle(#[from] BundleError),

    #[error("Preprocessing failed")]
    Preprocess(#[from] PreprocessError),

    #[error("Inference failed")]
    Inference(#[from] InferenceError),

    #[error("Postprocessing failed")]
    Postprocess(#[from] PostprocessError),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
