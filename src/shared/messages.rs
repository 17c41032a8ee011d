//! Message types delivered to the UI context
//!
//! Camera callbacks, the permission flow, the inference worker and the input
//! source all talk to the UI thread exclusively through these events.

use crate::capture::frame::AttemptId;
use crate::capture::CameraEvent;
use crate::error::MeterReaderError;
use crate::vision::{ExecutionResult, NormalizedImage};

/// Events processed by the UI event loop
#[derive(Debug)]
pub enum UiEvent {
    /// The capture button was pressed
    CaptureRequested,
    /// The platform permission flow finished
    PermissionResult { granted: bool },
    /// Hardware event from the camera executor
    Camera(CameraEvent),
    /// The worker decoded and normalized the captured photo
    ImageNormalized {
        attempt: AttemptId,
        image: NormalizedImage,
    },
    /// The worker finished inference for an attempt
    InferenceCompleted {
        attempt: AttemptId,
        result: ExecutionResult,
    },
    /// The attempt ended before inference (e.g. the photo did not decode)
    AttemptFailed {
        attempt: AttemptId,
        error: MeterReaderError,
    },
    /// Stop the event loop
    Shutdown,
}

impl UiEvent {
    /// Attempt this event belongs to, if any
    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            UiEvent::Camera(event) => Some(event.attempt()),
            UiEvent::ImageNormalized { attempt, .. }
            | UiEvent::InferenceCompleted { attempt, .. }
            | UiEvent::AttemptFailed { attempt, .. } => Some(*attempt),
            UiEvent::CaptureRequested
            | UiEvent::PermissionResult { .. }
            | UiEvent::Shutdown => None,
        }
    }
}
