//! Errors for camera capture and recording hand-off.

use crate::pipeline::CaptureState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Every constraint tier was tried and none produced a stream.
    #[error("no camera available after {attempts} attempts")]
    CameraUnavailable { attempts: usize },

    #[error("device error: {0}")]
    Device(String),

    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        from: CaptureState,
        action: &'static str,
    },

    /// The gallery did not accept the recording.
    #[error("hand-off failed: {0}")]
    Handoff(String),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
