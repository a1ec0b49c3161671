//! Upload orchestration.
//!
//! One guest submission runs strictly in this order: type validation, media
//! host configuration check, local preview, remote upload, metadata insert.
//! Nothing is retried; a failure after the preview leaves the preview visible
//! and reports the error once.

use crate::config::MediaHostConfig;
use crate::error::{GalleryError, Result};
use crate::media_host::{MediaFile, MediaHost, UploadOptions};
use crate::metadata_store::{MediaKind, MediaRecord, MediaRepository, NewMediaRecord};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// User-visible phase of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Uploading,
    Succeeded { media_id: Uuid },
    Failed { reason: String },
}

/// Local-only rendering of the submitted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub content_type: String,
    pub data_url: String,
}

impl Preview {
    fn of(file: &MediaFile) -> Self {
        Self {
            content_type: file.content_type.clone(),
            data_url: format!(
                "data:{};base64,{}",
                file.content_type,
                STANDARD.encode(&file.data)
            ),
        }
    }
}

/// Observable state of one upload trigger.
///
/// Phase and preview are independent channels: the preview survives an upload
/// or persistence failure.
pub struct UploadProgress {
    phase: watch::Sender<UploadPhase>,
    preview: watch::Sender<Option<Preview>>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self {
            phase: watch::Sender::new(UploadPhase::Idle),
            preview: watch::Sender::new(None),
        }
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase.borrow().clone()
    }

    pub fn preview(&self) -> Option<Preview> {
        self.preview.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<UploadPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe_preview(&self) -> watch::Receiver<Option<Preview>> {
        self.preview.subscribe()
    }

    /// Enter `Uploading`, refusing while another upload is in flight.
    fn begin(&self) -> Result<()> {
        let mut busy = false;
        self.phase.send_if_modified(|phase| {
            if *phase == UploadPhase::Uploading {
                busy = true;
                false
            } else {
                *phase = UploadPhase::Uploading;
                true
            }
        });

        if busy {
            Err(GalleryError::Busy)
        } else {
            Ok(())
        }
    }

    fn show_preview(&self, preview: Preview) {
        self.preview.send_replace(Some(preview));
    }

    fn finish(&self, phase: UploadPhase) {
        self.phase.send_replace(phase);
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a successful submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub record: MediaRecord,
    pub preview: Preview,
}

/// Validates, previews, uploads and persists guest media
pub struct UploadOrchestrator {
    host: Arc<dyn MediaHost>,
    repository: Arc<dyn MediaRepository>,
    folder: Option<String>,
    tags: Vec<String>,
}

impl UploadOrchestrator {
    pub fn new(
        host: Arc<dyn MediaHost>,
        repository: Arc<dyn MediaRepository>,
        config: &MediaHostConfig,
    ) -> Self {
        Self {
            host,
            repository,
            folder: Some(config.folder.clone()).filter(|f| !f.is_empty()),
            tags: config.tags.clone(),
        }
    }

    /// Submit a file with a fresh progress handle.
    pub async fn submit(
        &self,
        file: MediaFile,
        kind: MediaKind,
        duration: Option<u32>,
    ) -> Result<Submission> {
        let progress = UploadProgress::new();
        self.submit_with(&progress, file, kind, duration).await
    }

    /// Submit a file, reporting phase and preview through `progress`.
    #[instrument(skip(self, progress, file), fields(file_name = %file.file_name, content_type = %file.content_type, kind = %kind))]
    pub async fn submit_with(
        &self,
        progress: &UploadProgress,
        file: MediaFile,
        kind: MediaKind,
        duration: Option<u32>,
    ) -> Result<Submission> {
        validate_media_type(&file, kind)?;

        if !self.host.is_configured() {
            warn!("Upload refused: media host is not configured");
            return Err(GalleryError::Configuration(
                "uploads are disabled until the media host is configured".to_string(),
            ));
        }

        progress.begin()?;

        let preview = Preview::of(&file);
        progress.show_preview(preview.clone());

        match self.upload_and_persist(&file, kind, duration).await {
            Ok(record) => {
                progress.finish(UploadPhase::Succeeded { media_id: record.id });
                metrics::counter!("gallery.uploads.succeeded").increment(1);
                metrics::counter!("gallery.bytes.uploaded").increment(file.len() as u64);
                info!(media_id = %record.id, storage_ref = %record.storage_ref, "Upload completed");
                Ok(Submission { record, preview })
            }
            Err(e) => {
                progress.finish(UploadPhase::Failed {
                    reason: e.to_string(),
                });
                metrics::counter!("gallery.uploads.failed").increment(1);
                Err(e)
            }
        }
    }

    async fn upload_and_persist(
        &self,
        file: &MediaFile,
        kind: MediaKind,
        duration: Option<u32>,
    ) -> Result<MediaRecord> {
        let uploaded = self.host.upload(file, &self.options_for(kind)).await?;

        let persisted = match NewMediaRecord::from_upload(&uploaded, kind, duration) {
            Ok(record) => self.repository.insert(&record).await,
            Err(e) => Err(e),
        };

        persisted.map_err(|e| {
            // The remote asset stays behind; nothing deletes it.
            error!(
                public_id = %uploaded.public_id,
                secure_url = %uploaded.secure_url,
                error = %e,
                "Metadata write failed after upload; remote asset is orphaned"
            );
            metrics::counter!("gallery.uploads.orphaned").increment(1);
            GalleryError::Persistence {
                public_id: uploaded.public_id.clone(),
                source: Box::new(e),
            }
        })
    }

    fn options_for(&self, kind: MediaKind) -> UploadOptions {
        let mut tags = self.tags.clone();
        tags.push(kind.as_str().to_string());

        UploadOptions {
            folder: self.folder.clone(),
            tags,
        }
    }
}

/// Only `image/*` and `video/*` are accepted, and the type must agree with `kind`.
fn validate_media_type(file: &MediaFile, kind: MediaKind) -> Result<()> {
    match MediaKind::from_mime(&file.content_type) {
        Some(declared) if declared == kind => Ok(()),
        Some(declared) => Err(GalleryError::UnsupportedMediaType(format!(
            "{} was submitted as a {} but declares a {}",
            file.content_type, kind, declared
        ))),
        None => Err(GalleryError::UnsupportedMediaType(file.content_type.clone())),
    }
}
