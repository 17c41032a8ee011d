//! Raw capture data handed from the camera to normalization

use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::vision::Rotation;

/// Identifier of one capture attempt
pub type AttemptId = Uuid;

/// An encoded photo as saved by the camera
#[derive(Debug, Clone)]
pub struct RawCapture {
    /// Attempt this photo belongs to
    pub attempt: AttemptId,
    /// Encoded image bytes (device photo format)
    pub encoded: Vec<u8>,
    /// Where the photo was written
    pub path: PathBuf,
    /// Rotation to apply before scaling
    pub rotation: Rotation,
    /// When the photo was saved
    pub timestamp: Instant,
}

impl RawCapture {
    /// Create a new raw capture
    pub fn new(attempt: AttemptId, encoded: Vec<u8>, path: PathBuf, rotation: Rotation) -> Self {
        Self {
            attempt,
            encoded,
            path,
            rotation,
            timestamp: Instant::now(),
        }
    }

    /// Size of the encoded photo in bytes
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }
}
