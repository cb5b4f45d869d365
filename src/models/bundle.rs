//! Single-file classifier bundles.
//!
//! A bundle is one JSON object with three parts:
//!
//! ```json
//! {
//!   "model":      { "type": "multinomial_nb", ... },
//!   "vectorizer": { "type": "count_vectorizer", ... },
//!   "metadata":   { "labels": ["NOT_SPAM", "SPAM"], ... }
//! }
//! ```
//!
//! `metadata` is optional. Every part is checked before the bundle is handed
//! to inference.

use super::classical::{Estimator, EstimatorError, Features};
use super::loader::{check_file, read_text};
use super::Capability;
use crate::error::{BundleError, LoadError};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Classifier, its feature extractor and free-form metadata
#[derive(Debug, Clone)]
pub struct Bundle {
    pub classifier: Estimator,
    pub feature_extractor: Estimator,
    pub metadata: Map<String, Value>,
}

impl Bundle {
    /// Label names recorded in the metadata, if any
    pub fn labels(&self) -> Option<Vec<String>> {
        let labels = self.metadata.get("labels")?.as_array()?;
        labels
            .iter()
            .map(|l| l.as_str().map(str::to_string))
            .collect()
    }

    /// Vectorize one document for the classifier
    pub fn features(&self, doc: &str) -> Result<Features, EstimatorError> {
        self.feature_extractor.transform(Features::text(doc))
    }
}

/// Read and validate a bundle file
pub fn resolve_bundle(path: &Path) -> Result<Bundle, BundleError> {
    check_file(path)?;
    let text = read_text(path)?;
    let bundle = parse_bundle(&text).map_err(|e| match e {
        BundleError::Load(LoadError::DeserializationFailed { cause, .. }) => {
            BundleError::Load(LoadError::deserialization(path.display().to_string(), cause))
        }
        other => other,
    })?;

    info!(
        path = %path.display(),
        classifier = bundle.classifier.name(),
        vectorizer = bundle.feature_extractor.name(),
        "Bundle resolved"
    );
    Ok(bundle)
}

/// Validate bundle JSON already in memory
pub fn parse_bundle(text: &str) -> Result<Bundle, BundleError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| LoadError::deserialization("bundle", e))?;
    let Value::Object(mut parts) = value else {
        return Err(LoadError::deserialization("bundle", "bundle must be a JSON object").into());
    };

    let model = parts.remove("model").ok_or(BundleError::MissingKey("model"))?;
    let vectorizer = parts
        .remove("vectorizer")
        .ok_or(BundleError::MissingKey("vectorizer"))?;

    let classifier = classifier(model)?;
    let feature_extractor = feature_extractor(vectorizer)?;

    if let (Some(produced), Some(expected)) =
        (feature_extractor.output_width(), classifier.input_width())
    {
        if produced != expected {
            return Err(BundleError::InvalidClassifier(format!(
                "{} expects {} features but the vectorizer produces {}",
                classifier.name(),
                expected,
                produced
            )));
        }
    }

    let metadata = match parts.remove("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(metadata)) => metadata,
        Some(other) => {
            return Err(BundleError::InvalidMetadata(format!(
                "expected an object, got {}",
                json_kind(&other)
            )))
        }
    };
    if let Some(labels) = metadata.get("labels") {
        let all_strings = labels
            .as_array()
            .is_some_and(|l| l.iter().all(Value::is_string));
        if !all_strings {
            return Err(BundleError::InvalidMetadata(
                "'labels' must be an array of strings".to_string(),
            ));
        }
    }

    debug!(metadata_keys = metadata.len(), "Bundle parts validated");

    Ok(Bundle {
        classifier,
        feature_extractor,
        metadata,
    })
}

fn classifier(value: Value) -> Result<Estimator, BundleError> {
    let estimator: Estimator = serde_json::from_value(value)
        .map_err(|e| BundleError::InvalidClassifier(e.to_string()))?;
    estimator
        .validate()
        .map_err(|e| BundleError::InvalidClassifier(e.to_string()))?;

    let capabilities = estimator.capabilities();
    for required in [Capability::Predict, Capability::PredictProba] {
        if !capabilities.contains(&required) {
            return Err(BundleError::InvalidClassifier(format!(
                "{} does not support {:?}",
                estimator.name(),
                required
            )));
        }
    }
    Ok(estimator)
}

fn feature_extractor(value: Value) -> Result<Estimator, BundleError> {
    let estimator: Estimator = serde_json::from_value(value)
        .map_err(|e| BundleError::InvalidVectorizer(e.to_string()))?;
    estimator
        .validate()
        .map_err(|e| BundleError::InvalidVectorizer(e.to_string()))?;

    if !estimator.capabilities().contains(&Capability::Transform) || !estimator.accepts_text() {
        return Err(BundleError::InvalidVectorizer(format!(
            "{} cannot transform text",
            estimator.name()
        )));
    }
    Ok(estimator)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
