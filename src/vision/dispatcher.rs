//! Inference dispatch on a dedicated worker thread
//!
//! One worker owns the model. Jobs go through a queue of depth one and a busy
//! flag bounces submissions while a job is outstanding, so inference calls
//! never overlap. Every outcome is sent back to the UI thread as a
//! [`UiEvent`].

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender, TrySendError};
use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::model::OcrModel;
use super::preprocess::{decode_and_normalize, NormalizedImage};
use crate::capture::RawCapture;
use crate::shared::UiEvent;

/// Outcome of one inference attempt
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Success {
        annotated_image: RgbImage,
        /// `None` when the model detected no reading
        reading: Option<String>,
    },
    Failure {
        /// Never empty
        reason: String,
    },
}

impl ExecutionResult {
    /// Whether inference succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }
}

/// Why a submission was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// An inference is already outstanding
    #[error("inference already in progress")]
    Busy,
    /// The worker thread has exited
    #[error("inference worker has stopped")]
    Stopped,
}

/// Run the model once, converting every outcome into an [`ExecutionResult`].
///
/// Model errors and panics both become `Failure`.
pub fn infer(model: &mut dyn OcrModel, image: &NormalizedImage) -> ExecutionResult {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| model.execute(image)));

    match outcome {
        Ok(Ok(output)) => ExecutionResult::Success {
            annotated_image: output.annotated_image,
            reading: output.reading.filter(|r| !r.is_empty()),
        },
        Ok(Err(e)) => {
            error!("OCR execution failed: {:#}", e);
            failure(format!("{:#}", e))
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!("OCR model panicked: {}", reason);
            failure(reason)
        }
    }
}

fn failure(reason: String) -> ExecutionResult {
    let reason = if reason.trim().is_empty() {
        "unknown model failure".to_string()
    } else {
        reason
    };
    ExecutionResult::Failure { reason }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("model panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("model panicked: {}", s)
    } else {
        "model panicked".to_string()
    }
}

/// Single-worker inference dispatcher
pub struct InferenceDispatcher {
    jobs: Option<Sender<RawCapture>>,
    busy: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl InferenceDispatcher {
    /// Spawn the worker; results are delivered on `results`
    pub fn spawn<M: OcrModel + 'static>(mut model: M, results: Sender<UiEvent>) -> Result<Self> {
        let (jobs, job_rx) = bounded::<RawCapture>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = busy.clone();

        let worker = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                info!("Inference worker started");
                for raw in job_rx.iter() {
                    let outcome = run_job(&mut model, raw, &results);
                    // Clear before delivering so the UI can submit again on receipt
                    worker_busy.store(false, Ordering::Release);
                    if results.send(outcome).is_err() {
                        warn!("UI channel closed, dropping inference result");
                    }
                }
                info!("Inference worker exiting");
            })
            .context("Failed to spawn inference worker")?;

        Ok(Self {
            jobs: Some(jobs),
            busy,
            worker: Some(worker),
        })
    }

    /// Queue a capture for normalization and inference without blocking
    pub fn submit(&self, raw: RawCapture) -> Result<(), SubmitError> {
        let Some(jobs) = &self.jobs else {
            return Err(SubmitError::Stopped);
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SubmitError::Busy);
        }

        match jobs.try_send(raw) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(SubmitError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(SubmitError::Stopped)
            }
        }
    }

    /// Whether an inference is outstanding
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for InferenceDispatcher {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Normalize and infer one capture.
///
/// The normalized image goes to the UI as soon as it exists; the returned
/// event is the attempt's final outcome.
fn run_job(model: &mut dyn OcrModel, raw: RawCapture, results: &Sender<UiEvent>) -> UiEvent {
    let attempt = raw.attempt;
    debug!(
        "Processing attempt {} from {:?} ({} bytes, {:?} old)",
        attempt,
        raw.path,
        raw.encoded_len(),
        raw.timestamp.elapsed()
    );

    let image = match decode_and_normalize(&raw.encoded, raw.rotation) {
        Ok(image) => image,
        Err(error) => {
            warn!("Attempt {} failed: {}", attempt, error);
            return UiEvent::AttemptFailed { attempt, error };
        }
    };

    let shown = UiEvent::ImageNormalized {
        attempt,
        image: image.clone(),
    };
    if results.send(shown).is_err() {
        warn!("UI channel closed, dropping captured image");
    }

    let start = Instant::now();
    let result = infer(model, &image);
    info!(
        "Inference for attempt {} finished in {:?} (success: {})",
        attempt,
        start.elapsed(),
        result.is_success()
    );

    UiEvent::InferenceCompleted { attempt, result }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake models for dispatcher and app tests

    use super::super::model::ModelExecutionResult;
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// How the fake model behaves
    #[derive(Debug, Clone)]
    pub enum Behaviour {
        Read(Option<String>),
        Error(String),
        Panic(String),
    }

    /// Model that records the wall-clock window of every call
    #[derive(Clone)]
    pub struct FakeModel {
        pub behaviour: Behaviour,
        pub delay: Duration,
        pub windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
    }

    impl FakeModel {
        pub fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                delay: Duration::ZERO,
                windows: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.windows.lock().len()
        }
    }

    impl OcrModel for FakeModel {
        fn execute(&mut self, image: &NormalizedImage) -> Result<ModelExecutionResult> {
            let start = Instant::now();
            std::thread::sleep(self.delay);
            self.windows.lock().push((start, Instant::now()));

            match &self.behaviour {
                Behaviour::Read(reading) => Ok(ModelExecutionResult {
                    annotated_image: image.pixels().clone(),
                    reading: reading.clone(),
                    raw_output: vec![],
                }),
                Behaviour::Error(reason) => Err(anyhow::anyhow!(reason.clone())),
                Behaviour::Panic(reason) => panic!("{}", reason),
            }
        }
    }

    /// A small PNG photo
    pub fn png_photo(width: u32, height: u32) -> Vec<u8> {
        let mut encoded = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();
        encoded
    }
}
