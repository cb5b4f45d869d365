//! Request-side data structures: the wire request and the task it declares

use crate::config::DefaultsConfig;
use crate::error::{AdapterError, PreprocessError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Largest accepted image side in pixels
pub const MAX_INPUT_SIDE: u32 = 4096;

/// Declared semantic task of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    #[serde(alias = "sentiment_analysis")]
    TextClassification,
    ImageClassification,
    Regression,
    /// Anything the adapter does not specialize; also the fallback for unknown names
    #[serde(other)]
    Other,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::TextClassification => "text_classification",
            ModelType::ImageClassification => "image_classification",
            ModelType::Regression => "regression",
            ModelType::Other => "other",
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            ModelType::TextClassification | ModelType::ImageClassification
        )
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target image dimensions, written as `[width, height]` or `"WxH"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InputSizeRepr", into = "[u32; 2]")]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for InputSize {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

impl FromStr for InputSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w
            .trim()
            .parse()
            .map_err(|e| format!("invalid width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse()
            .map_err(|e| format!("invalid height '{}': {}", h, e))?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for InputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputSizeRepr {
    Pair([u32; 2]),
    Text(String),
}

impl TryFrom<InputSizeRepr> for InputSize {
    type Error = String;

    fn try_from(repr: InputSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            InputSizeRepr::Pair([width, height]) => Ok(Self { width, height }),
            InputSizeRepr::Text(s) => s.parse(),
        }
    }
}

impl From<InputSize> for [u32; 2] {
    fn from(size: InputSize) -> Self {
        [size.width, size.height]
    }
}

/// Task-specific options carried in the request's `modelConfig`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    pub labels: Option<Vec<String>>,
    #[serde(alias = "input_size")]
    pub input_size: Option<InputSize>,
    /// Apply a softmax to raw scores before classification postprocessing
    pub softmax: bool,
}

/// Fully resolved task configuration used by pre- and postprocessing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskConfig {
    pub model_type: ModelType,
    /// Ordered class names; index = class id
    pub labels: Option<Vec<String>>,
    pub input_size: InputSize,
    pub softmax: bool,
}

impl TaskConfig {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            ..Default::default()
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_input_size(mut self, input_size: InputSize) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_softmax(mut self, softmax: bool) -> Self {
        self.softmax = softmax;
        self
    }

    /// Labels must be unique and image sides within `1..=MAX_INPUT_SIDE`
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if let Some(labels) = &self.labels {
            let mut seen = HashSet::with_capacity(labels.len());
            for label in labels {
                if !seen.insert(label.as_str()) {
                    return Err(PreprocessError::InvalidTaskConfig(format!(
                        "duplicate label '{}'",
                        label
                    )));
                }
            }
        }

        if self.input_size.width == 0 || self.input_size.height == 0 {
            return Err(PreprocessError::InvalidTaskConfig(format!(
                "input size must be non-zero, got {}",
                self.input_size
            )));
        }
        if self.input_size.width > MAX_INPUT_SIDE || self.input_size.height > MAX_INPUT_SIDE {
            return Err(PreprocessError::InvalidTaskConfig(format!(
                "input size {} exceeds {} pixels per side",
                self.input_size, MAX_INPUT_SIDE
            )));
        }

        Ok(())
    }
}

/// One adapter request, either read from a JSON file or given inline
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    /// Raw payload: text, `{ "text": ... }`, data-URI image or numeric array
    pub input: Value,
    #[serde(default)]
    pub model_type: Option<ModelType>,
    #[serde(default)]
    pub model_config: ModelConfig,
    /// Declared model representation, overriding extension detection
    #[serde(default)]
    pub model_format: Option<String>,
}

impl InferenceRequest {
    /// Parse the second CLI argument: a path to a JSON file, or inline JSON
    pub fn from_arg(arg: &str) -> Result<Self, AdapterError> {
        let path = Path::new(arg);
        if path.is_file() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                AdapterError::InvalidRequest(format!(
                    "failed to read request file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            return Self::from_json(&contents).map_err(|e| match e {
                AdapterError::InvalidRequest(msg) => AdapterError::InvalidRequest(format!(
                    "{} (in {})",
                    msg,
                    path.display()
                )),
                other => other,
            });
        }

        Self::from_json(arg)
    }

    pub fn from_json(json: &str) -> Result<Self, AdapterError> {
        serde_json::from_str(json).map_err(|e| {
            AdapterError::InvalidRequest(format!("request is not valid JSON: {}", e))
        })
    }

    /// Resolve the task, filling gaps from configured defaults.
    ///
    /// Defaults only apply to requests that omit `modelType` (the plain
    /// `{ "input": ... }` file form); a request that names its task gets
    /// exactly the options it specifies.
    pub fn task_config(&self, defaults: &DefaultsConfig) -> TaskConfig {
        let config = &self.model_config;
        match self.model_type {
            Some(model_type) => TaskConfig {
                model_type,
                labels: config.labels.clone(),
                input_size: config.input_size.unwrap_or_default(),
                softmax: config.softmax,
            },
            None => TaskConfig {
                model_type: defaults.model_type,
                labels: config.labels.clone().or_else(|| defaults.labels.clone()),
                input_size: config.input_size.unwrap_or(defaults.input_size),
                softmax: config.softmax,
            },
        }
    }
}
