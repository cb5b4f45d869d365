//! Model loader: resolves a runtime kind and deserializes the model file

use super::bundle::resolve_bundle;
use super::classical::Estimator;
use super::graph::GraphModel;
use super::network::TensorNetwork;
use super::onnx::OnnxModel;
use super::{LoadedArtifact, ModelHandle, RuntimeKind};
use crate::config::RuntimeConfig;
use crate::error::{AdapterError, LoadError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Model representation named by the caller instead of the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredFormat {
    TensorNetwork,
    Graph,
    Classical,
    CrossFramework,
    Bundle,
}

impl DeclaredFormat {
    /// Format implied by a file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "safetensors" | "pt" | "pth" => Some(DeclaredFormat::TensorNetwork),
            "graph" => Some(DeclaredFormat::Graph),
            "pipeline" | "json" => Some(DeclaredFormat::Classical),
            "onnx" => Some(DeclaredFormat::CrossFramework),
            "bundle" => Some(DeclaredFormat::Bundle),
            _ => None,
        }
    }

    /// Runtime the format executes on; bundles are classical pipelines
    pub fn runtime_kind(&self) -> RuntimeKind {
        match self {
            DeclaredFormat::TensorNetwork => RuntimeKind::TensorNetwork,
            DeclaredFormat::Graph => RuntimeKind::GraphExecution,
            DeclaredFormat::Classical | DeclaredFormat::Bundle => RuntimeKind::ClassicalPipeline,
            DeclaredFormat::CrossFramework => RuntimeKind::CrossFrameworkRuntime,
        }
    }
}

impl FromStr for DeclaredFormat {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tensor_network" | "pytorch" | "torch" => Ok(DeclaredFormat::TensorNetwork),
            "graph" | "tensorflow" | "keras" => Ok(DeclaredFormat::Graph),
            "classical" | "sklearn" | "pipeline" => Ok(DeclaredFormat::Classical),
            "onnx" | "cross_framework" => Ok(DeclaredFormat::CrossFramework),
            "bundle" => Ok(DeclaredFormat::Bundle),
            other => Err(LoadError::UnsupportedFormat(format!(
                "unknown model type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DeclaredFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclaredFormat::TensorNetwork => "tensor_network",
            DeclaredFormat::Graph => "graph",
            DeclaredFormat::Classical => "classical",
            DeclaredFormat::CrossFramework => "cross_framework",
            DeclaredFormat::Bundle => "bundle",
        };
        f.write_str(name)
    }
}

/// The file must exist, be a regular file and be non-empty; returns its size
pub(crate) fn check_file(path: &Path) -> Result<u64, LoadError> {
    let display = path.display().to_string();
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::FileNotFound(display))
        }
        Err(source) => {
            return Err(LoadError::Io {
                path: display,
                source,
            })
        }
    };

    if !metadata.is_file() {
        return Err(LoadError::FileNotFound(format!("{} (not a regular file)", display)));
    }
    if metadata.len() == 0 {
        return Err(LoadError::EmptyFile(display));
    }
    Ok(metadata.len())
}

pub(crate) fn read_text(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Loader for every supported model representation
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
    /// Preferred ONNX input binding
    onnx_input_name: String,
}

impl ModelLoader {
    pub fn new(runtime: &RuntimeConfig) -> Self {
        Self {
            onnx_threads: runtime.onnx_threads.max(1),
            onnx_input_name: runtime.onnx_input_name.clone(),
        }
    }

    /// Load a single model.
    ///
    /// Without a declared format the extension decides. Tensor networks are
    /// returned in inference mode.
    pub fn load(&self, path: &Path, declared: Option<DeclaredFormat>) -> Result<ModelHandle, LoadError> {
        let size = check_file(path)?;
        let format = resolve_format(path, declared)?;
        let path_str = path.display().to_string();

        info!(path = %path_str, format = %format, bytes = size, "Loading model");

        let handle = match format {
            DeclaredFormat::TensorNetwork => {
                let mut network = TensorNetwork::load(path)
                    .map_err(|e| LoadError::deserialization(&path_str, e))?;
                network.eval();
                ModelHandle::TensorNetwork(network)
            }
            DeclaredFormat::Graph => {
                let graph = GraphModel::from_json(&read_text(path)?)
                    .map_err(|e| LoadError::deserialization(&path_str, e))?;
                ModelHandle::Graph(graph)
            }
            DeclaredFormat::Classical => {
                let estimator: Estimator = serde_json::from_str(&read_text(path)?)
                    .map_err(|e| LoadError::deserialization(&path_str, e))?;
                estimator
                    .validate()
                    .map_err(|e| LoadError::deserialization(&path_str, e))?;
                ModelHandle::Classical(estimator)
            }
            DeclaredFormat::CrossFramework => {
                let model = OnnxModel::load(path, self.onnx_threads, &self.onnx_input_name)
                    .map_err(|e| LoadError::deserialization(&path_str, e))?;
                ModelHandle::CrossFramework(model)
            }
            DeclaredFormat::Bundle => {
                return Err(LoadError::UnsupportedFormat(format!(
                    "{} is a bundle; load it as an artifact",
                    path_str
                )))
            }
        };

        debug!(
            runtime = %handle.runtime_kind(),
            capabilities = ?handle.capabilities(),
            "Model loaded successfully"
        );
        Ok(handle)
    }

    /// Load a model or, for `bundle` formats, resolve a classifier bundle
    pub fn load_artifact(
        &self,
        path: &Path,
        declared: Option<DeclaredFormat>,
    ) -> Result<LoadedArtifact, AdapterError> {
        check_file(path)?;
        match resolve_format(path, declared)? {
            DeclaredFormat::Bundle => Ok(LoadedArtifact::Bundled(resolve_bundle(path)?)),
            format => Ok(LoadedArtifact::Single(self.load(path, Some(format))?)),
        }
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

fn resolve_format(path: &Path, declared: Option<DeclaredFormat>) -> Result<DeclaredFormat, LoadError> {
    match declared {
        Some(format) => Ok(format),
        None => DeclaredFormat::from_extension(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or_else(|| "(none)".to_string(), |e| format!(".{}", e));
            LoadError::UnsupportedFormat(format!(
                "cannot infer model type from extension {} of {}",
                ext,
                path.display()
            ))
        }),
    }
}
