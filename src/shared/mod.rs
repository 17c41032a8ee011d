//! Presentation state and messaging for the UI context
//!
//! All cross-thread traffic reaches the UI thread as [`UiEvent`]s; the
//! presentation state is only touched by the thread draining them.

pub mod messages;
pub mod state;

pub use messages::UiEvent;
pub use state::{CameraStatus, PresentationSnapshot, PresentationState};
