//! Capture Layer
//!
//! Owns the camera session lifecycle. Camera callbacks arrive as events and
//! drive an explicit state machine:
//!
//! `Idle -> RequestingPermission -> Previewing -> Capturing -> (Previewing | PermissionDenied)`

pub mod camera;
pub mod frame;

use crossbeam_channel::Sender;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use camera::{
    Camera, CameraEvent, CaptureRequest, FileCamera, PermissionHandle, PermissionStatus,
};
pub use frame::{AttemptId, RawCapture};

use crate::error::MeterReaderError;
use crate::shared::UiEvent;
use crate::vision::SENSOR_MOUNT_ROTATION;

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Previewing,
    /// A picture is being taken or its result is still being processed
    Capturing(AttemptId),
    PermissionDenied,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::RequestingPermission => write!(f, "requesting permission"),
            CaptureState::Previewing => write!(f, "previewing"),
            CaptureState::Capturing(_) => write!(f, "capturing"),
            CaptureState::PermissionDenied => write!(f, "permission denied"),
        }
    }
}

/// Why a capture request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CaptureRejected {
    /// Another attempt is still in flight
    #[error("capture already in progress")]
    Busy,
    /// The preview session is not running
    #[error("camera is not ready ({0})")]
    NotReady(CaptureState),
}

/// Drives a [`Camera`] through the capture state machine
pub struct CaptureController<C: Camera> {
    camera: C,
    state: CaptureState,
    output_path: PathBuf,
    events: Sender<UiEvent>,
}

impl<C: Camera> CaptureController<C> {
    /// Create a controller writing photos to `output_path`
    pub fn new(camera: C, output_path: PathBuf, events: Sender<UiEvent>) -> Self {
        Self {
            camera,
            state: CaptureState::Idle,
            output_path,
            events,
        }
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Path photos are written to
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Start the session, asking for permission first if needed
    pub fn start(&mut self) -> Result<CaptureState, MeterReaderError> {
        match self.camera.permission() {
            PermissionStatus::Granted => self.bind_preview(),
            status => {
                info!("Camera permission is {:?}, requesting", status);
                self.state = CaptureState::RequestingPermission;
                self.camera.request_permission(self.events.clone());
                Ok(self.state)
            }
        }
    }

    /// Handle the outcome of the permission flow.
    ///
    /// A grant arriving after a denial starts the preview without restarting.
    pub fn on_permission_result(
        &mut self,
        granted: bool,
    ) -> Result<CaptureState, MeterReaderError> {
        match self.state {
            CaptureState::Idle
            | CaptureState::RequestingPermission
            | CaptureState::PermissionDenied => {}
            state => {
                debug!("Ignoring permission result while {}", state);
                return Ok(state);
            }
        }

        if granted {
            self.bind_preview()
        } else {
            warn!("Camera permission denied");
            self.state = CaptureState::PermissionDenied;
            Err(MeterReaderError::PermissionDenied)
        }
    }

    /// Trigger a capture
    pub fn capture(&mut self) -> Result<AttemptId, CaptureRejected> {
        match self.state {
            CaptureState::Previewing => {}
            CaptureState::Capturing(_) => return Err(CaptureRejected::Busy),
            state => return Err(CaptureRejected::NotReady(state)),
        }

        let attempt = Uuid::new_v4();
        self.state = CaptureState::Capturing(attempt);
        info!("Capturing photo (attempt {})", attempt);

        self.camera.take_picture(
            CaptureRequest {
                attempt,
                output_path: self.output_path.clone(),
            },
            self.events.clone(),
        );
        Ok(attempt)
    }

    /// Handle a hardware event.
    ///
    /// Returns the raw capture to normalize, `None` for stale events, or the
    /// capture error. A failed capture returns the session to previewing.
    pub fn on_camera_event(
        &mut self,
        event: CameraEvent,
    ) -> Result<Option<RawCapture>, MeterReaderError> {
        let CaptureState::Capturing(current) = self.state else {
            warn!("Ignoring camera event while {}", self.state);
            return Ok(None);
        };
        if event.attempt() != current {
            warn!("Ignoring camera event for stale attempt {}", event.attempt());
            return Ok(None);
        }

        match event {
            CameraEvent::ImageSaved {
                attempt,
                path,
                encoded,
            } => {
                debug!("Photo saved to {:?} ({} bytes)", path, encoded.len());
                Ok(Some(RawCapture::new(attempt, encoded, path, SENSOR_MOUNT_ROTATION)))
            }
            CameraEvent::CaptureFailed { reason, .. } => {
                self.state = CaptureState::Previewing;
                Err(MeterReaderError::Capture(reason))
            }
        }
    }

    /// Mark an attempt finished so the next capture may start
    pub fn finish_attempt(&mut self, attempt: AttemptId) {
        if self.state == CaptureState::Capturing(attempt) {
            self.state = CaptureState::Previewing;
        }
    }

    /// Stop the preview session
    pub fn stop(&mut self) {
        self.camera.stop_preview();
        self.state = CaptureState::Idle;
    }

    fn bind_preview(&mut self) -> Result<CaptureState, MeterReaderError> {
        match self.camera.start_preview() {
            Ok(()) => {
                info!("Preview session started");
                self.state = CaptureState::Previewing;
                Ok(self.state)
            }
            Err(e) => {
                warn!("Use case binding failed: {:#}", e);
                self.state = CaptureState::Idle;
                Err(MeterReaderError::Capture(format!("{:#}", e)))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted camera used by capture and app tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// What the scripted camera does when asked for a picture
    #[derive(Debug, Clone)]
    pub enum Shot {
        Photo(Vec<u8>),
        Fail(String),
    }

    /// Camera whose behaviour is fixed up front
    pub struct ScriptedCamera {
        pub permission: PermissionHandle,
        pub grant_on_request: bool,
        pub shot: Shot,
        pub previews_started: Arc<Mutex<usize>>,
        pub pictures_taken: Arc<Mutex<usize>>,
    }

    impl ScriptedCamera {
        pub fn new(permission: PermissionStatus, shot: Shot) -> Self {
            Self {
                permission: PermissionHandle::new(permission),
                grant_on_request: true,
                shot,
                previews_started: Arc::new(Mutex::new(0)),
                pictures_taken: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl Camera for ScriptedCamera {
        fn permission(&self) -> PermissionStatus {
            self.permission.status()
        }

        fn request_permission(&mut self, events: Sender<UiEvent>) {
            let handle = self.permission.clone();
            let granted = self.grant_on_request;
            std::thread::spawn(move || handle.resolve(granted, &events));
        }

        fn start_preview(&mut self) -> anyhow::Result<()> {
            *self.previews_started.lock() += 1;
            Ok(())
        }

        fn stop_preview(&mut self) {}

        fn take_picture(&mut self, request: CaptureRequest, events: Sender<UiEvent>) {
            *self.pictures_taken.lock() += 1;
            let event = match &self.shot {
                Shot::Photo(bytes) => CameraEvent::ImageSaved {
                    attempt: request.attempt,
                    path: request.output_path,
                    encoded: bytes.clone(),
                },
                Shot::Fail(reason) => CameraEvent::CaptureFailed {
                    attempt: request.attempt,
                    reason: reason.clone(),
                },
            };
            std::thread::spawn(move || {
                let _ = events.send(UiEvent::Camera(event));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedCamera, Shot};
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Duration;

    fn controller(
        permission: PermissionStatus,
        shot: Shot,
    ) -> (CaptureController<ScriptedCamera>, Receiver<UiEvent>) {
        let (tx, rx) = unbounded();
        let camera = ScriptedCamera::new(permission, shot);
        (CaptureController::new(camera, PathBuf::from("/tmp/captured_image.jpg"), tx), rx)
    }

    fn next_event(rx: &Receiver<UiEvent>) -> UiEvent {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn camera_event(rx: &Receiver<UiEvent>) -> CameraEvent {
        match next_event(rx) {
            UiEvent::Camera(event) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_start_with_permission_previews() {
        let (mut ctl, _rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![1]));
        assert_eq!(ctl.start(), Ok(CaptureState::Previewing));
        assert_eq!(ctl.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_start_without_permission_requests_it() {
        let (mut ctl, rx) = controller(PermissionStatus::NotDetermined, Shot::Photo(vec![1]));
        assert_eq!(ctl.start(), Ok(CaptureState::RequestingPermission));
        assert_eq!(*ctl.camera.previews_started.lock(), 0);

        assert!(matches!(next_event(&rx), UiEvent::PermissionResult { granted: true }));
        assert_eq!(ctl.on_permission_result(true), Ok(CaptureState::Previewing));
        assert_eq!(*ctl.camera.previews_started.lock(), 1);
    }

    #[test]
    fn test_denied_then_granted_later() {
        let (mut ctl, _rx) = controller(PermissionStatus::Denied, Shot::Photo(vec![1]));
        ctl.camera.grant_on_request = false;
        ctl.start().unwrap();

        assert_eq!(ctl.on_permission_result(false), Err(MeterReaderError::PermissionDenied));
        assert_eq!(ctl.state(), CaptureState::PermissionDenied);
        assert_eq!(*ctl.camera.previews_started.lock(), 0);
        assert_eq!(
            ctl.capture(),
            Err(CaptureRejected::NotReady(CaptureState::PermissionDenied))
        );

        assert_eq!(ctl.on_permission_result(true), Ok(CaptureState::Previewing));
        assert_eq!(*ctl.camera.previews_started.lock(), 1);
    }

    #[test]
    fn test_capture_before_start_is_rejected() {
        let (mut ctl, _rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![1]));
        assert_eq!(ctl.capture(), Err(CaptureRejected::NotReady(CaptureState::Idle)));
    }

    #[test]
    fn test_capture_success_yields_raw_capture() {
        let (mut ctl, rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![9, 9]));
        ctl.start().unwrap();
        let attempt = ctl.capture().unwrap();
        assert_eq!(ctl.state(), CaptureState::Capturing(attempt));

        let raw = ctl.on_camera_event(camera_event(&rx)).unwrap().unwrap();
        assert_eq!(raw.attempt, attempt);
        assert_eq!(raw.encoded, vec![9, 9]);
        assert_eq!(raw.rotation, SENSOR_MOUNT_ROTATION);
        assert_eq!(raw.path, PathBuf::from("/tmp/captured_image.jpg"));

        // Still capturing until the attempt's result is applied
        assert_eq!(ctl.capture(), Err(CaptureRejected::Busy));
        ctl.finish_attempt(attempt);
        assert_eq!(ctl.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_concurrent_capture_rejected() {
        let (mut ctl, _rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![1]));
        ctl.start().unwrap();
        ctl.capture().unwrap();

        assert_eq!(ctl.capture(), Err(CaptureRejected::Busy));
        assert_eq!(*ctl.camera.pictures_taken.lock(), 1);
    }

    #[test]
    fn test_capture_error_returns_to_preview() {
        let (mut ctl, rx) =
            controller(PermissionStatus::Granted, Shot::Fail("sensor busy".to_string()));
        ctl.start().unwrap();
        ctl.capture().unwrap();

        let err = ctl.on_camera_event(camera_event(&rx)).unwrap_err();
        assert_eq!(err, MeterReaderError::Capture("sensor busy".to_string()));
        assert_eq!(err.to_string(), "Error capturing image: sensor busy");
        assert_eq!(ctl.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_stale_event_ignored() {
        let (mut ctl, _rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![1]));
        ctl.start().unwrap();
        let attempt = ctl.capture().unwrap();

        let stale = CameraEvent::CaptureFailed {
            attempt: Uuid::new_v4(),
            reason: "old".to_string(),
        };
        assert_eq!(ctl.on_camera_event(stale).unwrap().map(|r| r.attempt), None);
        assert_eq!(ctl.state(), CaptureState::Capturing(attempt));
    }

    #[test]
    fn test_event_outside_capture_ignored() {
        let (mut ctl, _rx) = controller(PermissionStatus::Granted, Shot::Photo(vec![1]));
        ctl.start().unwrap();
        let event = CameraEvent::ImageSaved {
            attempt: Uuid::new_v4(),
            path: PathBuf::from("/tmp/x.jpg"),
            encoded: vec![],
        };
        assert!(ctl.on_camera_event(event).unwrap().is_none());
        assert_eq!(ctl.state(), CaptureState::Previewing);
    }
}
