//! Type definitions for adapter requests and responses

pub mod request;
pub mod result;

pub use request::{InferenceRequest, InputSize, ModelConfig, ModelType, TaskConfig};
pub use result::{InferenceResult, Probabilities, ResponseEnvelope};
