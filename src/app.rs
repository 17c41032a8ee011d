//! Application Coordinator
//!
//! Runs the UI context: a single thread draining [`UiEvent`]s and routing
//! them to the capture controller, the inference dispatcher and the
//! presentation state. Nothing else mutates presentation state.

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{Camera, CaptureController, CaptureRejected, CaptureState};
use crate::error::MeterReaderError;
use crate::shared::{CameraStatus, PresentationState, UiEvent};
use crate::vision::{InferenceDispatcher, OcrModel, SubmitError};

/// Called after every event the UI thread handles
pub type PresentationObserver = Box<dyn FnMut(&PresentationState)>;

/// Main application coordinator
pub struct MeterReaderApp<C: Camera> {
    controller: CaptureController<C>,
    dispatcher: InferenceDispatcher,
    presentation: PresentationState,
    events_tx: Sender<UiEvent>,
    events_rx: Receiver<UiEvent>,
    observer: Option<PresentationObserver>,
    attempts_finished: usize,
}

impl<C: Camera> MeterReaderApp<C> {
    /// Create the coordinator and spawn the inference worker
    pub fn new<M: OcrModel + 'static>(camera: C, model: M, output_path: PathBuf) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let dispatcher = InferenceDispatcher::spawn(model, events_tx.clone())?;
        let controller = CaptureController::new(camera, output_path, events_tx.clone());

        Ok(Self {
            controller,
            dispatcher,
            presentation: PresentationState::new(),
            events_tx,
            events_rx,
            observer: None,
            attempts_finished: 0,
        })
    }

    /// Register a presentation observer
    pub fn with_observer(mut self, observer: PresentationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sender for input sources (button presses, shutdown)
    pub fn sender(&self) -> Sender<UiEvent> {
        self.events_tx.clone()
    }

    /// Current presentation state
    pub fn presentation(&self) -> &PresentationState {
        &self.presentation
    }

    /// Current capture state
    pub fn capture_state(&self) -> CaptureState {
        self.controller.state()
    }

    /// Number of capture attempts that reached a final outcome
    pub fn attempts_finished(&self) -> usize {
        self.attempts_finished
    }

    /// Start the camera session
    pub fn start(&mut self) {
        info!("Starting camera session, photos go to {:?}", self.controller.output_path());
        if let Err(error) = self.controller.start() {
            self.presentation.show_error(&error);
        }
        self.sync_status();
    }

    /// Handle one event on the UI thread
    pub fn handle_event(&mut self, event: UiEvent) -> ControlFlow<()> {
        debug!("UI event {:?}", event.attempt());

        match event {
            UiEvent::CaptureRequested => self.on_capture_requested(),
            UiEvent::PermissionResult { granted } => {
                let before = self.controller.state();
                match self.controller.on_permission_result(granted) {
                    Ok(CaptureState::Previewing) if before != CaptureState::Previewing => {
                        self.presentation.show_notice("Camera ready")
                    }
                    Ok(_) => {}
                    Err(error) => self.presentation.show_error(&error),
                }
            }
            UiEvent::Camera(event) => match self.controller.on_camera_event(event) {
                Ok(Some(raw)) => {
                    let attempt = raw.attempt;
                    if let Err(e) = self.dispatcher.submit(raw) {
                        warn!("Inference submission failed: {}", e);
                        let reason = match e {
                            SubmitError::Busy => "inference already in progress",
                            SubmitError::Stopped => "inference worker has stopped",
                        };
                        self.finish(attempt, Err(MeterReaderError::Inference(reason.to_string())));
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    // The controller already returned to previewing
                    self.presentation.show_error(&error);
                    self.attempts_finished += 1;
                }
            },
            UiEvent::ImageNormalized { attempt, image } => {
                if self.is_current(attempt) {
                    self.presentation.show_captured(image);
                }
            }
            UiEvent::InferenceCompleted { attempt, result } => {
                if self.is_current(attempt) {
                    self.finish(attempt, Ok(result));
                } else {
                    warn!("Dropping result for stale attempt {}", attempt);
                }
            }
            UiEvent::AttemptFailed { attempt, error } => {
                if self.is_current(attempt) {
                    self.finish(attempt, Err(error));
                }
            }
            UiEvent::Shutdown => {
                info!(
                    "Shutting down camera session (inference in progress: {})",
                    self.dispatcher.is_busy()
                );
                self.controller.stop();
                self.sync_status();
                return ControlFlow::Break(());
            }
        }

        self.sync_status();
        ControlFlow::Continue(())
    }

    /// Process events until shutdown
    pub fn run(&mut self) {
        while let Ok(event) = self.events_rx.recv() {
            if self.handle_event(event).is_break() {
                break;
            }
        }
    }

    /// Process events until `done` holds, shutdown, or `timeout` elapses.
    ///
    /// Returns whether `done` held at the end.
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    if self.handle_event(event).is_break() {
                        return done(self);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return done(self)
                }
            }
        }
    }

    fn on_capture_requested(&mut self) {
        match self.controller.capture() {
            Ok(attempt) => debug!("Capture attempt {} started", attempt),
            Err(CaptureRejected::Busy) => warn!("Capture already in progress, ignoring request"),
            Err(CaptureRejected::NotReady(
                CaptureState::RequestingPermission | CaptureState::PermissionDenied,
            )) => {
                self.presentation.show_error(&MeterReaderError::PermissionDenied);
            }
            Err(rejected) => {
                warn!("Capture rejected: {}", rejected);
                self.presentation.show_notice(format!("Cannot capture: {}", rejected));
            }
        }
    }

    fn is_current(&self, attempt: crate::capture::AttemptId) -> bool {
        self.controller.state() == CaptureState::Capturing(attempt)
    }

    /// Apply an attempt's final outcome and free the controller
    fn finish(
        &mut self,
        attempt: crate::capture::AttemptId,
        outcome: Result<crate::vision::ExecutionResult, MeterReaderError>,
    ) {
        match outcome {
            Ok(result) => self.presentation.apply(result),
            Err(error) => self.presentation.show_error(&error),
        }
        self.controller.finish_attempt(attempt);
        self.attempts_finished += 1;
    }

    fn sync_status(&mut self) {
        let status = match self.controller.state() {
            CaptureState::Idle => CameraStatus::Idle,
            CaptureState::RequestingPermission | CaptureState::PermissionDenied => {
                CameraStatus::PermissionRequired
            }
            CaptureState::Previewing => CameraStatus::Previewing,
            CaptureState::Capturing(_) => CameraStatus::Capturing,
        };
        self.presentation.set_camera_status(status);

        if let Some(observer) = self.observer.as_mut() {
            observer(&self.presentation);
        }
    }
}
