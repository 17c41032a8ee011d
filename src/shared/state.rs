//! Presentation state shown to the user
//!
//! Owned by the UI thread and mutated only there, so it carries no locking.
//! Each capture attempt overwrites the previous attempt's fields.

use image::RgbImage;
use serde::Serialize;

use crate::error::MeterReaderError;
use crate::vision::{ExecutionResult, NormalizedImage};

/// Log line for a successful inference
pub const LOG_SUCCESS: &str = "OCR execution completed successfully.";
/// Reading shown when the model found nothing
pub const NO_READING: &str = "No reading detected";
/// Reading shown when inference failed
pub const READING_FAILED: &str = "OCR execution failed";

const READING_PREFIX: &str = "Meter Reading: ";
const LOG_WAITING: &str = "Waiting for capture";
const READING_PLACEHOLDER: &str = "--";

/// Camera session status as displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    #[default]
    Idle,
    PermissionRequired,
    Previewing,
    Capturing,
}

/// Everything the UI surface displays
#[derive(Debug, Clone)]
pub struct PresentationState {
    /// Execution log message
    pub execution_log: String,
    /// Meter reading text
    pub reading_text: String,
    /// Captured image after normalization
    pub captured_image: Option<RgbImage>,
    /// Annotated image returned by the model
    pub annotated_image: Option<RgbImage>,
    /// Camera session status
    pub camera_status: CameraStatus,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            execution_log: LOG_WAITING.to_string(),
            reading_text: reading_text(READING_PLACEHOLDER),
            captured_image: None,
            annotated_image: None,
            camera_status: CameraStatus::Idle,
        }
    }
}

impl PresentationState {
    /// Create the initial state
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the outcome of an inference attempt
    pub fn apply(&mut self, result: ExecutionResult) {
        match result {
            ExecutionResult::Success {
                annotated_image,
                reading,
            } => {
                self.execution_log = LOG_SUCCESS.to_string();
                self.reading_text = reading_text(reading.as_deref().unwrap_or(NO_READING));
                self.annotated_image = Some(annotated_image);
            }
            ExecutionResult::Failure { reason } => {
                self.execution_log = MeterReaderError::Inference(reason).to_string();
                self.reading_text = reading_text(READING_FAILED);
                self.annotated_image = None;
            }
        }
    }

    /// Show an attempt that failed before producing a result
    pub fn show_error(&mut self, error: &MeterReaderError) {
        self.execution_log = error.to_string();
        self.reading_text = reading_text(READING_PLACEHOLDER);
        self.captured_image = None;
        self.annotated_image = None;
    }

    /// Show the normalized capture
    pub fn show_captured(&mut self, image: NormalizedImage) {
        self.captured_image = Some(image.into_pixels());
    }

    /// Set an informational log line
    pub fn show_notice(&mut self, message: impl Into<String>) {
        self.execution_log = message.into();
    }

    /// Update the camera status
    pub fn set_camera_status(&mut self, status: CameraStatus) {
        self.camera_status = status;
    }

    /// Serializable summary of the text fields
    pub fn snapshot(&self) -> PresentationSnapshot {
        PresentationSnapshot {
            execution_log: self.execution_log.clone(),
            reading_text: self.reading_text.clone(),
            camera_status: self.camera_status,
            has_captured_image: self.captured_image.is_some(),
            has_annotated_image: self.annotated_image.is_some(),
        }
    }
}

/// Text-only view of [`PresentationState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationSnapshot {
    pub execution_log: String,
    pub reading_text: String,
    pub camera_status: CameraStatus,
    pub has_captured_image: bool,
    pub has_annotated_image: bool,
}

fn reading_text(value: &str) -> String {
    format!("{}{}", READING_PREFIX, value)
}
