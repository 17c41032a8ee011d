//! Camera collaborator interface and a file-backed implementation
//!
//! Hardware callbacks never run on the UI thread: a camera delivers every
//! outcome as a [`UiEvent`] on the channel it is handed.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::frame::AttemptId;
use crate::shared::UiEvent;

/// Platform camera permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Never asked
    #[default]
    NotDetermined,
    Granted,
    Denied,
}

/// A request to take one picture
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Attempt the picture belongs to
    pub attempt: AttemptId,
    /// Path the encoded photo must be written to (overwritten)
    pub output_path: PathBuf,
}

/// Hardware events from the camera executor
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// Photo written to disk
    ImageSaved {
        attempt: AttemptId,
        path: PathBuf,
        encoded: Vec<u8>,
    },
    /// Capture failed at the hardware/driver level
    CaptureFailed { attempt: AttemptId, reason: String },
}

impl CameraEvent {
    /// Attempt this event belongs to
    pub fn attempt(&self) -> AttemptId {
        match self {
            CameraEvent::ImageSaved { attempt, .. }
            | CameraEvent::CaptureFailed { attempt, .. } => *attempt,
        }
    }
}

/// Camera hardware seam
pub trait Camera: Send {
    /// Current permission status
    fn permission(&self) -> PermissionStatus;

    /// Ask the platform for permission; the answer arrives as
    /// [`UiEvent::PermissionResult`]
    fn request_permission(&mut self, events: Sender<UiEvent>);

    /// Bind the preview session
    fn start_preview(&mut self) -> Result<()>;

    /// Unbind the preview session
    fn stop_preview(&mut self);

    /// Take a picture; the outcome arrives as [`UiEvent::Camera`]
    fn take_picture(&mut self, request: CaptureRequest, events: Sender<UiEvent>);
}

/// Shared permission flag, updated from the permission flow thread
#[derive(Debug, Clone, Default)]
pub struct PermissionHandle {
    status: Arc<RwLock<PermissionStatus>>,
}

impl PermissionHandle {
    /// Create a handle with an initial status
    pub fn new(status: PermissionStatus) -> Self {
        Self {
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Current status
    pub fn status(&self) -> PermissionStatus {
        *self.status.read()
    }

    /// Record a decision and notify the UI thread
    pub fn resolve(&self, granted: bool, events: &Sender<UiEvent>) {
        *self.status.write() = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        let _ = events.send(UiEvent::PermissionResult { granted });
    }

    /// Grant permission later, as the platform settings flow would
    pub fn grant(&self, events: &Sender<UiEvent>) {
        info!("Camera permission granted");
        self.resolve(true, events);
    }
}

/// Camera that "photographs" image files.
///
/// The source is a single image or a directory of images taken in name
/// order, cycling. Each picture is copied to the requested output path on a
/// background thread.
pub struct FileCamera {
    source: PathBuf,
    permission: PermissionHandle,
    grant_on_request: bool,
    previewing: bool,
    next_index: usize,
}

impl FileCamera {
    /// Create a camera reading from `source`
    pub fn new(
        source: impl Into<PathBuf>,
        permission: PermissionStatus,
        grant_on_request: bool,
    ) -> Self {
        Self {
            source: source.into(),
            permission: PermissionHandle::new(permission),
            grant_on_request,
            previewing: false,
            next_index: 0,
        }
    }

    /// Handle to the shared permission flag
    pub fn permission_handle(&self) -> PermissionHandle {
        self.permission.clone()
    }
}

impl Camera for FileCamera {
    fn permission(&self) -> PermissionStatus {
        self.permission.status()
    }

    fn request_permission(&mut self, events: Sender<UiEvent>) {
        let handle = self.permission.clone();
        let granted = self.grant_on_request;
        std::thread::spawn(move || {
            debug!("Permission prompt answered: granted={}", granted);
            handle.resolve(granted, &events);
        });
    }

    fn start_preview(&mut self) -> Result<()> {
        if !self.source.exists() {
            anyhow::bail!("camera source {:?} does not exist", self.source);
        }
        self.previewing = true;
        info!("Preview bound to {:?}", self.source);
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.previewing = false;
    }

    fn take_picture(&mut self, request: CaptureRequest, events: Sender<UiEvent>) {
        let bound = self.previewing;
        let source = self.source.clone();
        let shot = self.next_index;
        self.next_index += 1;

        std::thread::spawn(move || {
            let saved = if bound {
                select_source(&source, shot)
                    .and_then(|src| save_photo(&src, &request.output_path))
            } else {
                Err(anyhow::anyhow!("camera session is not bound"))
            };
            let event = match saved {
                Ok(encoded) => CameraEvent::ImageSaved {
                    attempt: request.attempt,
                    path: request.output_path,
                    encoded,
                },
                Err(e) => {
                    warn!("Camera capture failed: {:#}", e);
                    CameraEvent::CaptureFailed {
                        attempt: request.attempt,
                        reason: format!("{:#}", e),
                    }
                }
            };
            let _ = events.send(UiEvent::Camera(event));
        });
    }
}

/// The photo for the `shot`-th picture: the source itself, or the directory's
/// images in name order, cycling
fn select_source(source: &Path, shot: usize) -> Result<PathBuf> {
    if source.is_file() {
        return Ok(source.to_path_buf());
    }

    let photos = list_photos(source)?;
    if photos.is_empty() {
        anyhow::bail!("no images found in {:?}", source);
    }
    Ok(photos[shot % photos.len()].clone())
}

/// Copy a source photo to the output path, returning its bytes
fn save_photo(source: &Path, output: &Path) -> Result<Vec<u8>> {
    let encoded =
        std::fs::read(source).with_context(|| format!("failed to read {:?}", source))?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &encoded)
        .with_context(|| format!("failed to write {:?}", output))?;
    debug!("Saved {} byte photo to {:?}", encoded.len(), output);
    Ok(encoded)
}

/// Image files in a directory, sorted by name
fn list_photos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut photos: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
        .collect();
    photos.sort();
    Ok(photos)
}
