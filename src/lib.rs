//! HTTP/gRPC image classification server backed by an ONNX model.

pub mod config;
pub mod grpc;
pub mod http;
pub mod labels;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod server;
pub mod telemetry;

pub use config::ServerConfig;
pub use labels::LabelTable;
pub use model::{InferenceEngine, ModelError, OrtEngine};
pub use predictor::{PredictError, PredictionResult, Predictor};
pub use preprocess::{InputTensor, Preprocessor};
