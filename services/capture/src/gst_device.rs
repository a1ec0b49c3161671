//! GStreamer-backed camera devices.
//!
//! One pipeline per acquired stream. The camera feed is tee'd into a leaky
//! JPEG preview branch and a VP8/Opus WebM branch gated by valves, so the
//! recorder only sees data between `start_recorder` and the end-of-stream
//! sent by `stop_recorder`.

use crate::config::DeviceConfig;
use crate::device::{Constraints, MediaDevices, MediaStream};
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Opens cameras through `v4l2src` and `autoaudiosrc`.
pub struct GstDevices {
    config: DeviceConfig,
}

impl GstDevices {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        gst::init().map_err(|e| CaptureError::Device(format!("GStreamer initialization failed: {e}")))?;
        Ok(Self { config })
    }
}

#[async_trait]
impl MediaDevices for GstDevices {
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>> {
        let device = match constraints.facing {
            Some(facing) => Some(
                self.config
                    .device_for(facing)
                    .ok_or_else(|| CaptureError::Device(format!("no {facing} camera configured")))?
                    .to_string(),
            ),
            None => None,
        };

        let launch = build_pipeline_string(device.as_deref(), constraints);
        let timeout = self.config.acquire_timeout();

        let stream = tokio::task::spawn_blocking(move || GstStream::start(&launch, timeout))
            .await
            .map_err(|e| CaptureError::Device(format!("acquisition task failed: {e}")))??;

        Ok(Box::new(stream))
    }
}

fn build_pipeline_string(device: Option<&str>, constraints: &Constraints) -> String {
    let mut source = String::from("v4l2src");
    if let Some(device) = device {
        source.push_str(&format!(" device={device}"));
    }

    let caps = match constraints.resolution {
        Some((width, height)) => format!(" ! video/x-raw,width={width},height={height}"),
        None => String::new(),
    };

    let mut launch = format!(
        "{source} ! videoconvert ! videoscale{caps} ! tee name=t \
         t. ! queue leaky=downstream max-size-buffers=2 ! jpegenc \
         ! appsink name=preview max-buffers=1 drop=true sync=false \
         t. ! queue ! valve name=video_gate drop=true ! vp8enc deadline=1 \
         ! webmmux name=mux streamable=true ! appsink name=recording sync=false"
    );

    if constraints.audio {
        launch.push_str(
            " autoaudiosrc ! audioconvert ! audioresample ! queue \
             ! valve name=audio_gate drop=true ! opusenc ! mux.",
        );
    }

    launch
}

/// Accumulates muxed output and flushes it to the receiver every interval.
struct ChunkBuffer {
    sender: Option<mpsc::UnboundedSender<Bytes>>,
    pending: BytesMut,
    flush_interval: Duration,
    last_flush: Instant,
}

impl ChunkBuffer {
    fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        if self.last_flush.elapsed() >= self.flush_interval {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.pending.is_empty() {
            return;
        }
        let chunk = self.pending.split().freeze();
        if let Some(sender) = &self.sender {
            if sender.send(chunk).is_err() {
                debug!("Chunk receiver gone, discarding recorder output");
                self.sender = None;
            }
        }
    }
}

pub struct GstStream {
    pipeline: gst::Pipeline,
    preview: Arc<Mutex<Option<Bytes>>>,
    chunks: Arc<Mutex<ChunkBuffer>>,
    running: Arc<AtomicBool>,
}

impl GstStream {
    fn start(launch: &str, timeout: Duration) -> Result<Self> {
        debug!(pipeline = %launch, "Creating capture pipeline");

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Device("Failed to cast to Pipeline".to_string()))?;

        let stream = Self {
            pipeline,
            preview: Arc::new(Mutex::new(None)),
            chunks: Arc::new(Mutex::new(ChunkBuffer {
                sender: None,
                pending: BytesMut::new(),
                flush_interval: Duration::from_secs(1),
                last_flush: Instant::now(),
            })),
            running: Arc::new(AtomicBool::new(true)),
        };

        stream.configure_preview_sink()?;
        stream.configure_recording_sink()?;

        stream
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Device(format!("camera refused to start: {e}")))?;

        let (result, _state, _pending) = stream
            .pipeline
            .state(gst::ClockTime::from_mseconds(timeout.as_millis() as u64));
        if result.is_err() {
            // Drop sets the pipeline back to Null
            return Err(CaptureError::Device(
                "Timeout waiting for camera to start".to_string(),
            ));
        }

        stream.watch_bus();
        info!("Camera pipeline playing");
        Ok(stream)
    }

    fn app_sink(&self, name: &str) -> Result<gst_app::AppSink> {
        self.pipeline
            .by_name(name)
            .ok_or_else(|| CaptureError::Device(format!("element {name} not found")))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Device(format!("element {name} is not an appsink")))
    }

    fn configure_preview_sink(&self) -> Result<()> {
        let appsink = self.app_sink("preview")?;
        let latest = self.preview.clone();

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    *latest.lock() = Some(Bytes::copy_from_slice(map.as_slice()));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        Ok(())
    }

    fn configure_recording_sink(&self) -> Result<()> {
        let appsink = self.app_sink("recording")?;
        let on_sample = self.chunks.clone();
        let on_eos = self.chunks.clone();

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    on_sample.lock().push(map.as_slice());
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| {
                    let mut chunks = on_eos.lock();
                    chunks.flush();
                    // Closing the channel tells the reader the recording is complete
                    chunks.sender = None;
                })
                .build(),
        );
        Ok(())
    }

    fn set_gates(&self, open: bool) {
        for name in ["video_gate", "audio_gate"] {
            if let Some(valve) = self.pipeline.by_name(name) {
                valve.set_property("drop", !open);
            }
        }
    }

    fn watch_bus(&self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let running = self.running.clone();

        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
                    continue;
                };
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        error!(error = %err.error(), debug = ?err.debug(), "Capture pipeline error");
                        break;
                    }
                    gst::MessageView::Eos(_) => {
                        debug!("Capture pipeline reached end of stream");
                        break;
                    }
                    gst::MessageView::Warning(w) => {
                        warn!(warning = %w.error(), "GStreamer warning");
                    }
                    _ => {}
                }
            }
        });
    }
}

impl MediaStream for GstStream {
    fn start_recorder(&mut self, flush_interval: Duration) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut chunks = self.chunks.lock();
            chunks.sender = Some(tx);
            chunks.pending.clear();
            chunks.flush_interval = flush_interval;
            chunks.last_flush = Instant::now();
        }
        self.set_gates(true);
        debug!(flush_ms = flush_interval.as_millis() as u64, "Recorder started");
        Ok(rx)
    }

    fn stop_recorder(&mut self) -> Result<()> {
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            return Err(CaptureError::Device(
                "pipeline did not accept end-of-stream".to_string(),
            ));
        }
        Ok(())
    }

    fn preview(&self) -> Option<Bytes> {
        self.preview.lock().clone()
    }

    fn release(self: Box<Self>) {
        debug!("Releasing camera pipeline");
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.chunks.lock().sender = None;
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
