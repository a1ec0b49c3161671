//! Camera/microphone device abstraction.
//!
//! A [`MediaDevices`] implementation opens one stream per set of
//! [`Constraints`]. The pipeline walks [`constraint_tiers`] from most to least
//! specific until a device accepts.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Which way the camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Selfie camera
    User,
    /// Rear camera
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::User => f.write_str("user"),
            FacingMode::Environment => f.write_str("environment"),
        }
    }
}

/// What to ask a device for. `None` means "don't care".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    pub facing: Option<FacingMode>,
    pub resolution: Option<(u32, u32)>,
    pub audio: bool,
}

/// Acquisition attempts in order: everything, then without facing, then bare video.
pub fn constraint_tiers(facing: FacingMode, width: u32, height: u32, audio: bool) -> Vec<Constraints> {
    vec![
        Constraints {
            facing: Some(facing),
            resolution: Some((width, height)),
            audio,
        },
        Constraints {
            facing: None,
            resolution: Some((width, height)),
            audio,
        },
        Constraints {
            facing: None,
            resolution: None,
            audio,
        },
    ]
}

/// Source of camera streams
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>>;
}

/// An open camera (and optionally microphone) stream.
///
/// The holder owns the device until [`MediaStream::release`] is called.
pub trait MediaStream: Send {
    /// Begin encoding. Chunks arrive roughly every `flush_interval`; the
    /// channel closes once the recorder has flushed its final chunk.
    fn start_recorder(&mut self, flush_interval: Duration) -> Result<mpsc::UnboundedReceiver<Bytes>>;

    fn stop_recorder(&mut self) -> Result<()>;

    /// Latest JPEG preview frame
    fn preview(&self) -> Option<Bytes>;

    /// Stop all tracks and give the device back.
    fn release(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_drop_facing_then_resolution() {
        let tiers = constraint_tiers(FacingMode::User, 1280, 720, true);
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0].facing, Some(FacingMode::User));
        assert_eq!(tiers[1].facing, None);
        assert_eq!(tiers[1].resolution, Some((1280, 720)));
        assert_eq!(tiers[2].resolution, None);
        assert!(tiers.iter().all(|t| t.audio));
    }

    #[test]
    fn test_toggle_facing() {
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled().toggled(), FacingMode::Environment);
    }
}
