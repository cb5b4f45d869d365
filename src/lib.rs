//! Model-Agnostic Inference Adapter Library
//!
//! Loads a serialized model (tensor network, dataflow graph, classical
//! pipeline, ONNX model or classifier bundle), adapts a JSON request to the
//! input the model expects, runs inference and normalizes the output into a
//! stable response envelope.

pub mod config;
pub mod error;
pub mod models;
pub mod packaging;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod runtime_check;
pub mod types;

pub use config::AppConfig;
pub use error::{AdapterError, AdapterResult};
pub use models::{LoadedArtifact, ModelHandle, ModelLoader, RuntimeKind};
pub use pipeline::{Adapter, Outcome};
pub use types::{InferenceRequest, InferenceResult, ResponseEnvelope, TaskConfig};
