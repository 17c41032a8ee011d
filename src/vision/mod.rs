//! Vision/OCR Layer
//!
//! Normalizes captured photos to the model's fixed input and runs the meter
//! OCR model off the UI thread:
//! - `preprocess`: rotation + 320x320 rescale, input tensor conversion
//! - `model`: the OCR model seam and its ONNX Runtime backend
//! - `dispatcher`: the single inference worker

pub mod dispatcher;
pub mod model;
pub mod preprocess;

pub use dispatcher::{ExecutionResult, InferenceDispatcher, SubmitError};
pub use model::{OcrModel, OnnxMeterModel, OnnxModelConfig};
pub use preprocess::{NormalizedImage, Rotation, SENSOR_MOUNT_ROTATION};
