//! Configuration management for the capture service.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use crate::device::FacingMode;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the capture service.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Camera and microphone configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Recorder configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Gallery hand-off configuration
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Camera and microphone selection.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Video device facing the user (e.g., "/dev/video0")
    #[serde(default)]
    pub front_device: Option<String>,

    /// Video device facing away from the user
    #[serde(default)]
    pub back_device: Option<String>,

    /// Facing mode requested first
    #[serde(default = "default_facing")]
    pub initial_facing: FacingMode,

    /// Preferred capture width
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Preferred capture height
    #[serde(default = "default_target_height")]
    pub target_height: u32,

    /// Record audio alongside video
    #[serde(default = "default_true")]
    pub audio: bool,

    /// How long one acquisition attempt may take, in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

/// Recorder limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Recording stops automatically after this many seconds
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u32,

    /// Encoded data is flushed from the device at this interval
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
}

/// Where confirmed recordings are sent.
#[derive(Debug, Clone, Deserialize)]
pub struct HandoffConfig {
    /// Gallery service base URL
    #[serde(default = "default_gallery_url")]
    pub gallery_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_facing() -> FacingMode {
    FacingMode::Environment
}
fn default_target_width() -> u32 {
    1920
}
fn default_target_height() -> u32 {
    1080
}
fn default_true() -> bool {
    true
}
fn default_acquire_timeout() -> u64 {
    5
}
fn default_max_duration_secs() -> u32 {
    60
}
fn default_chunk_interval_ms() -> u64 {
    1000
}
fn default_gallery_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            front_device: None,
            back_device: None,
            initial_facing: default_facing(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            audio: true,
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            chunk_interval_ms: default_chunk_interval_ms(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            gallery_url: default_gallery_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. `config/capture`
    /// 2. `/etc/wedding-album/capture`
    /// 3. Environment variables (e.g., CAPTURE__RECORDING__MAX_DURATION_SECS)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/capture").required(false))
            .add_source(File::with_name("/etc/wedding-album/capture").required(false))
            .add_source(
                Environment::with_prefix("CAPTURE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.recording.max_duration_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "recording.max_duration_secs".to_string(),
                message: "Recording ceiling must be greater than 0".to_string(),
            });
        }

        if self.recording.chunk_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "recording.chunk_interval_ms".to_string(),
                message: "Flush interval must be greater than 0".to_string(),
            });
        }

        if self.device.target_width == 0 || self.device.target_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "device.target_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if self.handoff.gallery_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "handoff.gallery_url".to_string(),
            ));
        }
        if !self.handoff.gallery_url.starts_with("http://")
            && !self.handoff.gallery_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "handoff.gallery_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }
}

impl DeviceConfig {
    /// Device path for a facing mode, when one is configured.
    pub fn device_for(&self, facing: FacingMode) -> Option<&str> {
        match facing {
            FacingMode::User => self.front_device.as_deref(),
            FacingMode::Environment => self.back_device.as_deref(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl RecordingConfig {
    /// Get flush interval as Duration.
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

impl HandoffConfig {
    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CaptureConfig {
        CaptureConfig {
            device: DeviceConfig {
                front_device: Some("/dev/video0".to_string()),
                back_device: Some("/dev/video2".to_string()),
                ..Default::default()
            },
            recording: RecordingConfig::default(),
            handoff: HandoffConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.max_duration_secs, 60);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = create_test_config();
        config.recording.max_duration_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_flush_interval_rejected() {
        let mut config = create_test_config();
        config.recording.chunk_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_gallery_url() {
        let mut config = create_test_config();
        config.handoff.gallery_url = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_gallery_url() {
        let mut config = create_test_config();
        config.handoff.gallery_url = "ftp://gallery".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_device_for_facing() {
        let config = create_test_config();
        assert_eq!(config.device.device_for(FacingMode::User), Some("/dev/video0"));
        assert_eq!(config.device.device_for(FacingMode::Environment), Some("/dev/video2"));
    }
}
