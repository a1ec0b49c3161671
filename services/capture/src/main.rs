//! Capture service for the wedding album.
//!
//! Drives one [`CapturePipeline`] from line commands on stdin:
//!
//! ```text
//! open | flip | record | stop | confirm | retry | cancel | quit
//! ```
//!
//! `record` runs until `stop` is entered or the recording ceiling is reached.
//! `cancel`, `quit` or Ctrl-C during a recording abandon it.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/capture, /etc/wedding-album/capture)
//! 2. Environment variables (prefixed with CAPTURE__)

use capture_service::config::{self, CaptureConfig};
use capture_service::{CapturePipeline, GalleryUploadClient, GstDevices, PipelineSettings};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Commands = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CaptureConfig::load()?;

    init_logging(&config.logging)?;

    info!(
        service = "capture-service",
        version = env!("CARGO_PKG_VERSION"),
        gallery = %config.handoff.gallery_url,
        "Starting capture service"
    );

    config.validate()?;

    let devices = GstDevices::new(config.device.clone())?;
    let handoff = GalleryUploadClient::new(&config.handoff)?;
    let mut pipeline = CapturePipeline::new(devices, PipelineSettings::from_config(&config));

    let mut commands = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = commands.next_line() => line?,
            _ = signal::ctrl_c() => {
                info!("Received interrupt, cancelling capture");
                pipeline.cancel();
                break;
            }
        };
        let Some(line) = line else {
            pipeline.cancel();
            break;
        };

        let outcome = match line.trim() {
            "open" => pipeline.open().await,
            "flip" => pipeline.toggle_facing().await,
            "record" => match record(&mut pipeline, &mut commands).await {
                Ok(Interrupt::Quit) => break,
                outcome => outcome.map(|_| ()),
            },
            "confirm" => pipeline.confirm(&handoff).await.map(|receipt| {
                info!(
                    media_id = %receipt.id,
                    display_url = receipt.display_url.as_deref().unwrap_or(""),
                    "Recording saved to the album"
                );
            }),
            "retry" => pipeline.retry().await,
            "cancel" => {
                pipeline.cancel();
                Ok(())
            }
            "quit" => {
                pipeline.cancel();
                break;
            }
            "" => continue,
            other => {
                warn!(command = other, "Unknown command");
                continue;
            }
        };

        if let Err(e) = outcome {
            error!(error = %e, state = ?pipeline.state(), "Command failed");
        }
    }

    info!("Capture service stopped");
    Ok(())
}

/// What ended a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Stop,
    Cancel,
    Quit,
}

fn interrupt_for(line: &str) -> Option<Interrupt> {
    match line.trim() {
        "stop" => Some(Interrupt::Stop),
        "cancel" => Some(Interrupt::Cancel),
        "quit" => Some(Interrupt::Quit),
        _ => None,
    }
}

/// Start recording and run until `stop`, the ceiling, or an interrupt.
/// `cancel`, `quit`, end of input and Ctrl-C abandon the recording.
async fn record(
    pipeline: &mut CapturePipeline<GstDevices>,
    commands: &mut Commands,
) -> capture_service::Result<Interrupt> {
    pipeline.start_recording()?;

    let mut interrupt = Interrupt::Stop;
    let stop = async {
        loop {
            tokio::select! {
                line = commands.next_line() => match line {
                    Ok(Some(line)) => match interrupt_for(&line) {
                        Some(command) => {
                            interrupt = command;
                            break;
                        }
                        None => continue,
                    },
                    Ok(None) | Err(_) => {
                        interrupt = Interrupt::Quit;
                        break;
                    }
                },
                _ = signal::ctrl_c() => {
                    info!("Received interrupt during recording");
                    interrupt = Interrupt::Quit;
                    break;
                }
            }
        }
    };

    let recording = pipeline.record_until(stop).await?;
    let (duration_secs, bytes) = (recording.duration_secs, recording.data.len());

    match interrupt {
        Interrupt::Stop => info!(
            duration_secs,
            bytes, "Review the recording, then confirm or retry"
        ),
        Interrupt::Cancel | Interrupt::Quit => pipeline.cancel(),
    }
    Ok(interrupt)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("capture_service={}", level).parse()?)
        .add_directive("gstreamer=warn".parse()?)
        .add_directive("reqwest=info".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupts_during_recording() {
        assert_eq!(interrupt_for("stop"), Some(Interrupt::Stop));
        assert_eq!(interrupt_for(" cancel "), Some(Interrupt::Cancel));
        assert_eq!(interrupt_for("quit"), Some(Interrupt::Quit));
        assert_eq!(interrupt_for("flip"), None);
        assert_eq!(interrupt_for(""), None);
    }
}
