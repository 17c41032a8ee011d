//! Error taxonomy for a capture attempt
//!
//! Every variant is recovered where it occurs and surfaced to the user as a
//! log line, so the display text doubles as the execution log message.

use thiserror::Error;

/// Failures that can end a capture attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeterReaderError {
    /// Camera permission has not been granted
    #[error("Camera permission is required")]
    PermissionDenied,
    /// Camera hardware or driver failed to take the picture
    #[error("Error capturing image: {0}")]
    Capture(String),
    /// The saved photo could not be decoded
    #[error("Error decoding image: {0}")]
    Decode(String),
    /// The OCR model failed
    #[error("OCR execution failed: {0}")]
    Inference(String),
}

impl From<image::ImageError> for MeterReaderError {
    fn from(err: image::ImageError) -> Self {
        MeterReaderError::Decode(err.to_string())
    }
}
