//! Camera capture for the wedding album.
//!
//! Guests record a short clip, review it, and confirm or retry. Confirmed
//! recordings are handed off to the gallery service, which uploads them to the
//! media host and indexes them.
//!
//! # Architecture
//!
//! ```text
//! MediaDevices (GStreamer) -> CapturePipeline -> RecordingHandoff -> Gallery
//!        ^                        |
//!        +---- constraint tiers --+
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod gst_device;
pub mod handoff;
pub mod pipeline;

pub use config::CaptureConfig;
pub use device::{FacingMode, MediaDevices, MediaStream};
pub use error::{CaptureError, Result};
pub use gst_device::GstDevices;
pub use handoff::{GalleryUploadClient, HandoffReceipt, RecordingHandoff};
pub use pipeline::{CapturePipeline, CaptureState, PipelineSettings, Recording};
