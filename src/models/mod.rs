//! Model representations, loading and inference dispatch

pub mod bundle;
pub mod classical;
pub mod graph;
pub mod inference;
pub mod loader;
pub mod network;
pub mod onnx;

pub use bundle::{resolve_bundle, Bundle};
pub use classical::Estimator;
pub use graph::GraphModel;
pub use inference::{infer, NormalizedInput, OutputRequest, RawOutput};
pub use loader::{DeclaredFormat, ModelLoader};
pub use network::TensorNetwork;
pub use onnx::OnnxModel;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Category of execution engine a loaded model needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    TensorNetwork,
    GraphExecution,
    ClassicalPipeline,
    CrossFrameworkRuntime,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::TensorNetwork => "tensor_network",
            RuntimeKind::GraphExecution => "graph_execution",
            RuntimeKind::ClassicalPipeline => "classical_pipeline",
            RuntimeKind::CrossFrameworkRuntime => "cross_framework_runtime",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation a loaded model exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Predict,
    PredictProba,
    Transform,
    Forward,
    Run,
}

pub type Capabilities = BTreeSet<Capability>;

/// A loaded predictive artifact; one variant per runtime kind
pub enum ModelHandle {
    TensorNetwork(TensorNetwork),
    Graph(GraphModel),
    Classical(Estimator),
    CrossFramework(OnnxModel),
}

impl ModelHandle {
    pub fn runtime_kind(&self) -> RuntimeKind {
        match self {
            ModelHandle::TensorNetwork(_) => RuntimeKind::TensorNetwork,
            ModelHandle::Graph(_) => RuntimeKind::GraphExecution,
            ModelHandle::Classical(_) => RuntimeKind::ClassicalPipeline,
            ModelHandle::CrossFramework(_) => RuntimeKind::CrossFrameworkRuntime,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            ModelHandle::TensorNetwork(_) => [Capability::Forward].into_iter().collect(),
            ModelHandle::Graph(_) => [Capability::Predict].into_iter().collect(),
            ModelHandle::Classical(estimator) => estimator.capabilities(),
            ModelHandle::CrossFramework(_) => [Capability::Run].into_iter().collect(),
        }
    }

    /// Flat feature width the model expects, when the format records it
    pub fn input_width(&self) -> Option<usize> {
        match self {
            ModelHandle::TensorNetwork(network) => network.input_width(),
            ModelHandle::Graph(graph) => graph.input_width(),
            ModelHandle::Classical(estimator) => estimator.input_width(),
            // ONNX input shapes may be symbolic; the request decides
            ModelHandle::CrossFramework(_) => None,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("runtime_kind", &self.runtime_kind())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// What the loader produced: a single model or a classifier bundle
#[derive(Debug)]
pub enum LoadedArtifact {
    Single(ModelHandle),
    Bundled(Bundle),
}

impl LoadedArtifact {
    pub fn runtime_kind(&self) -> RuntimeKind {
        match self {
            LoadedArtifact::Single(handle) => handle.runtime_kind(),
            LoadedArtifact::Bundled(_) => RuntimeKind::ClassicalPipeline,
        }
    }
}
