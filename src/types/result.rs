//! Normalized inference results and the response envelope

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Label → probability pairs, serialized as a JSON object in label order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Probabilities(Vec<(String, f64)>);

impl Probabilities {
    pub fn new(pairs: Vec<(String, f64)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, p)| *p)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Probabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, probability) in &self.0 {
            map.serialize_entry(label, probability)?;
        }
        map.end()
    }
}

/// Task-normalized model output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InferenceResult {
    Classification {
        label: String,
        confidence: f64,
        probabilities: Probabilities,
    },
    Regression {
        prediction: f64,
    },
    /// Unspecialized tasks: raw output passed through untouched
    Raw {
        output: Value,
    },
}

impl InferenceResult {
    pub fn label(&self) -> Option<&str> {
        match self {
            InferenceResult::Classification { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            InferenceResult::Classification { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }
}

/// The single JSON document written to stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success {
        success: bool,
        output: InferenceResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    Failure {
        success: bool,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

impl ResponseEnvelope {
    pub fn success(output: InferenceResult, metadata: Map<String, Value>) -> Self {
        ResponseEnvelope::Success {
            success: true,
            output,
            metadata: (!metadata.is_empty()).then_some(metadata),
        }
    }

    pub fn failure(error: impl Into<String>, traceback: Option<String>) -> Self {
        ResponseEnvelope::Failure {
            success: false,
            error: error.into(),
            traceback: traceback.filter(|t| !t.is_empty()),
        }
    }

    /// Build a failure envelope from an error chain.
    ///
    /// `error` carries the messages joined with `": "`; `traceback` carries
    /// anyhow's multi-line debug rendering (with its `Caused by:` list).
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::failure(format!("{:#}", err), Some(format!("{:?}", err)))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    /// Process exit code for this envelope
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":"failed to serialize response: {}"}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}
