//! Capture state machine.
//!
//! ```text
//! Idle → Requesting → Live → Recording → Recorded → Confirmed
//!                      ↑                     │
//!                      └──── Retrying ←──────┘        (any) → Cancelled
//! ```
//!
//! The pipeline exclusively owns the device stream while `Requesting`, `Live`
//! or `Recording`. Every exit path hands it back through [`release_stream`],
//! which takes the stream out of its slot, so it is released at most once.
//!
//! [`release_stream`]: CapturePipeline::release_stream

use crate::config::CaptureConfig;
use crate::device::{constraint_tiers, FacingMode, MediaDevices, MediaStream};
use crate::error::{CaptureError, Result};
use crate::handoff::{HandoffReceipt, RecordingHandoff};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

const TICK: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the recorder's last chunk after stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const RECORDING_MIME: &str = "video/webm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Live,
    Recording,
    Recorded,
    Retrying,
    Confirmed,
    Cancelled,
}

/// A finished recording, ready for review.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub data: Bytes,
    pub mime_type: String,
    /// Whole seconds counted while recording
    pub duration_secs: u32,
}

/// Capture settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub max_duration_secs: u32,
    pub flush_interval: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            facing: config.device.initial_facing,
            width: config.device.target_width,
            height: config.device.target_height,
            audio: config.device.audio,
            max_duration_secs: config.recording.max_duration_secs,
            flush_interval: config.recording.chunk_interval(),
        }
    }
}

struct RecordingSession {
    chunks: mpsc::UnboundedReceiver<Bytes>,
    buffered: Vec<Bytes>,
    elapsed_secs: u32,
}

pub struct CapturePipeline<D: MediaDevices> {
    devices: D,
    settings: PipelineSettings,
    facing: FacingMode,
    state: CaptureState,
    stream: Option<Box<dyn MediaStream>>,
    session: Option<RecordingSession>,
    recording: Option<Recording>,
}

impl<D: MediaDevices> CapturePipeline<D> {
    pub fn new(devices: D, settings: PipelineSettings) -> Self {
        Self {
            devices,
            facing: settings.facing,
            settings,
            state: CaptureState::Idle,
            stream: None,
            session: None,
            recording: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Seconds recorded so far in the current session.
    pub fn elapsed_secs(&self) -> u32 {
        self.session.as_ref().map(|s| s.elapsed_secs).unwrap_or(0)
    }

    /// Latest preview frame while a stream is held.
    pub fn preview(&self) -> Option<Bytes> {
        self.stream.as_ref().and_then(|s| s.preview())
    }

    /// The recording awaiting review.
    pub fn recording(&self) -> Option<&Recording> {
        match self.state {
            CaptureState::Recorded => self.recording.as_ref(),
            _ => None,
        }
    }

    /// Acquire a camera and go live. A finished or cancelled flow may be reopened.
    pub async fn open(&mut self) -> Result<()> {
        self.require(
            &[CaptureState::Idle, CaptureState::Confirmed, CaptureState::Cancelled],
            "open the camera",
        )?;
        self.recording = None;
        self.acquire().await
    }

    /// Release the current stream and reacquire with the other camera.
    pub async fn toggle_facing(&mut self) -> Result<()> {
        self.require(&[CaptureState::Live], "switch camera")?;
        self.release_stream();
        self.facing = self.facing.toggled();
        info!(facing = %self.facing, "Switching camera");
        self.acquire().await
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.require(&[CaptureState::Live], "start recording")?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Device("live without a stream".to_string()))?;

        let chunks = stream.start_recorder(self.settings.flush_interval)?;
        self.session = Some(RecordingSession {
            chunks,
            buffered: Vec::new(),
            elapsed_secs: 0,
        });
        self.state = CaptureState::Recording;

        info!(
            max_duration_secs = self.settings.max_duration_secs,
            "Recording started"
        );
        Ok(())
    }

    /// Record until `stop` resolves or the ceiling is reached, then release
    /// the device and assemble the chunks into one [`Recording`].
    pub async fn record_until<F>(&mut self, stop: F) -> Result<&Recording>
    where
        F: Future<Output = ()>,
    {
        self.require(&[CaptureState::Recording], "stop recording")?;
        let ceiling = self.settings.max_duration_secs;
        let session = self.session.as_mut().ok_or(CaptureError::InvalidTransition {
            from: CaptureState::Recording,
            action: "stop recording",
        })?;

        tokio::pin!(stop);
        let mut ticker = interval_at(Instant::now() + TICK, TICK);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!(elapsed_secs = session.elapsed_secs, "Recording stopped");
                    break;
                }
                _ = ticker.tick() => {
                    session.elapsed_secs += 1;
                    if session.elapsed_secs >= ceiling {
                        info!(elapsed_secs = session.elapsed_secs, "Recording ceiling reached");
                        break;
                    }
                }
                chunk = session.chunks.recv() => match chunk {
                    Some(chunk) => session.buffered.push(chunk),
                    None => {
                        warn!(elapsed_secs = session.elapsed_secs, "Recorder ended unexpectedly");
                        break;
                    }
                }
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.stop_recorder() {
                warn!(error = %e, "Failed to stop recorder cleanly");
            }
        }

        let Some(mut session) = self.session.take() else {
            return Err(CaptureError::Device("recording session vanished".to_string()));
        };
        while let Ok(Some(chunk)) = timeout(DRAIN_TIMEOUT, session.chunks.recv()).await {
            session.buffered.push(chunk);
        }

        self.release_stream();

        let size: usize = session.buffered.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(size);
        for chunk in &session.buffered {
            data.extend_from_slice(chunk);
        }

        info!(
            bytes = size,
            chunks = session.buffered.len(),
            duration_secs = session.elapsed_secs,
            "Recording ready for review"
        );

        self.state = CaptureState::Recorded;
        Ok(&*self.recording.insert(Recording {
            data: data.freeze(),
            mime_type: RECORDING_MIME.to_string(),
            duration_secs: session.elapsed_secs,
        }))
    }

    /// Hand the recording off. On failure the recording is kept so the user
    /// can confirm again.
    #[instrument(skip(self, handoff))]
    pub async fn confirm(&mut self, handoff: &dyn RecordingHandoff) -> Result<HandoffReceipt> {
        self.require(&[CaptureState::Recorded], "confirm")?;
        let recording = self.recording.as_ref().ok_or(CaptureError::InvalidTransition {
            from: CaptureState::Recorded,
            action: "confirm",
        })?;

        match handoff.hand_off(recording).await {
            Ok(receipt) => {
                self.recording = None;
                self.state = CaptureState::Confirmed;
                info!(media_id = %receipt.id, "Recording confirmed");
                Ok(receipt)
            }
            Err(e) => {
                error!(error = %e, "Hand-off failed, recording kept for another attempt");
                Err(e)
            }
        }
    }

    /// Discard the recording and go live again.
    pub async fn retry(&mut self) -> Result<()> {
        self.require(&[CaptureState::Recorded], "retry")?;
        self.state = CaptureState::Retrying;
        self.recording = None;
        debug!("Recording discarded");
        self.acquire().await
    }

    /// Abandon the flow from any state. Nothing is kept.
    pub fn cancel(&mut self) {
        if self.state == CaptureState::Recording {
            if let Some(stream) = self.stream.as_mut() {
                if let Err(e) = stream.stop_recorder() {
                    warn!(error = %e, "Failed to stop recorder on cancel");
                }
            }
        }
        self.release_stream();
        self.session = None;
        self.recording = None;
        info!(from = ?self.state, "Capture cancelled");
        self.state = CaptureState::Cancelled;
    }

    async fn acquire(&mut self) -> Result<()> {
        self.state = CaptureState::Requesting;
        let tiers = constraint_tiers(
            self.facing,
            self.settings.width,
            self.settings.height,
            self.settings.audio,
        );

        for (tier, constraints) in tiers.iter().enumerate() {
            match self.devices.acquire(constraints).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.state = CaptureState::Live;
                    info!(tier, facing = ?constraints.facing, resolution = ?constraints.resolution, "Camera live");
                    return Ok(());
                }
                Err(e) => {
                    warn!(tier, error = %e, "Camera acquisition failed, relaxing constraints");
                }
            }
        }

        self.state = CaptureState::Idle;
        error!(attempts = tiers.len(), "No camera could be opened");
        Err(CaptureError::CameraUnavailable {
            attempts: tiers.len(),
        })
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.release();
            debug!("Camera released");
        }
    }

    fn require(&self, allowed: &[CaptureState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CaptureError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }
}

impl<D: MediaDevices> Drop for CapturePipeline<D> {
    fn drop(&mut self) {
        self.release_stream();
    }
}
