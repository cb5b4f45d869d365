//! Configuration management for the inference adapter

use crate::types::request::{InputSize, ModelType};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default config file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/adapter.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_PATH_ENV: &str = "INFERENCE_ADAPTER_CONFIG";

/// Text payloads above this many UTF-8 bytes are rejected (100 KiB)
pub const DEFAULT_MAX_TEXT_BYTES: usize = 100 * 1024;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub limits: LimitsConfig,
    pub runtime: RuntimeConfig,
    pub defaults: DefaultsConfig,
    pub logging: LoggingConfig,
}

/// Input bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum text payload size in bytes
    pub max_text_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }
}

/// Model runtime settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Intra-op threads for ONNX Runtime sessions
    pub onnx_threads: usize,
    /// Input name bound when running ONNX models
    pub onnx_input_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            onnx_threads: 1,
            onnx_input_name: "input".to_string(),
        }
    }
}

/// Task defaults for requests that only carry `input`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub model_type: ModelType,
    pub labels: Option<Vec<String>>,
    pub input_size: InputSize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::TextClassification,
            labels: Some(vec!["NOT_SPAM".to_string(), "SPAM".to_string()]),
            input_size: InputSize::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location (if present) and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// The file is optional; `ADAPTER__SECTION__KEY` environment variables
    /// override it.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("ADAPTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

/// Initialize the tracing subscriber; logs go to stderr so stdout stays a single JSON document
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(format!("inference_adapter={}", logging.level))
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
