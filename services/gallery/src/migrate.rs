//! One-shot move of legacy uploads onto the media host.
//!
//! Each record still served from the legacy bucket is downloaded, uploaded to
//! the media host and re-pointed at the hosted copy. Failures are logged and
//! skipped so one bad blob never blocks the rest.

use crate::blob_store::{content_type_for_path, BlobStore};
use crate::config::MediaHostConfig;
use crate::error::{GalleryError, Result};
use crate::media_host::{MediaFile, MediaHost, UploadOptions, UploadResult};
use crate::metadata_store::{MediaKind, MediaRecord, MediaRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Tag marking assets that arrived through migration
pub const MIGRATED_TAG: &str = "migrated-from-storage";

/// Outcome of a migration or cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl MigrationReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct LegacyMigrator {
    repository: Arc<dyn MediaRepository>,
    host: Arc<dyn MediaHost>,
    blobs: Arc<dyn BlobStore>,
    folder: Option<String>,
    tags: Vec<String>,
    pause: Duration,
}

impl LegacyMigrator {
    pub fn new(
        repository: Arc<dyn MediaRepository>,
        host: Arc<dyn MediaHost>,
        blobs: Arc<dyn BlobStore>,
        config: &MediaHostConfig,
    ) -> Self {
        Self {
            repository,
            host,
            blobs,
            folder: Some(config.folder.clone()).filter(|f| !f.is_empty()),
            tags: config.tags.clone(),
            pause: Duration::from_millis(100),
        }
    }

    /// Delay between records, to stay under the media host's rate limit.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Migrate every record without a cloud URL.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        if !self.host.is_configured() {
            return Err(GalleryError::Configuration(
                "media_host.cloud_name and media_host.upload_preset are required to migrate".to_string(),
            ));
        }

        let records = self.repository.list_unmigrated().await?;
        info!(count = records.len(), "Starting legacy migration");

        let mut report = MigrationReport::default();
        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.pause).await;
            }

            match self.migrate_one(record).await {
                Ok(result) => {
                    report.succeeded += 1;
                    info!(
                        media_id = %record.id,
                        from = %record.storage_ref,
                        to = %result.public_id,
                        "Migrated"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(media_id = %record.id, path = %record.storage_ref, error = %e, "Migration failed");
                }
            }
        }

        info!(succeeded = report.succeeded, failed = report.failed, "Legacy migration finished");
        Ok(report)
    }

    /// Remove legacy blobs of records that already live on the media host.
    pub async fn cleanup(&self) -> Result<MigrationReport> {
        let records = self.repository.list_legacy_leftovers().await?;
        info!(count = records.len(), "Removing migrated legacy blobs");

        let mut report = MigrationReport::default();
        for record in &records {
            let Some(ref path) = record.legacy_path else {
                continue;
            };

            let removed = match self.blobs.delete(path).await {
                Ok(()) => self.repository.clear_legacy_path(record.id).await,
                Err(e) => Err(e),
            };

            match removed {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(media_id = %record.id, path = %path, error = %e, "Legacy blob not removed");
                }
            }
        }

        Ok(report)
    }

    #[instrument(skip(self, record), fields(media_id = %record.id))]
    async fn migrate_one(&self, record: &MediaRecord) -> Result<UploadResult> {
        let data = self.blobs.get(&record.storage_ref).await?;

        let file_name = record
            .storage_ref
            .rsplit('/')
            .next()
            .unwrap_or(&record.storage_ref)
            .to_string();
        let file = MediaFile::new(file_name, content_type_for(record), data);

        let result = self.host.upload(&file, &self.options_for(record)).await?;
        self.repository.mark_migrated(record.id, &result).await?;

        Ok(result)
    }

    fn options_for(&self, record: &MediaRecord) -> UploadOptions {
        let mut tags = self.tags.clone();
        tags.push(record.kind.as_str().to_string());
        tags.push(MIGRATED_TAG.to_string());

        UploadOptions {
            folder: self.folder.clone(),
            tags,
        }
    }
}

/// MIME type for a legacy blob. The extension is trusted only when it agrees
/// with the recorded kind.
fn content_type_for(record: &MediaRecord) -> &'static str {
    let guessed = content_type_for_path(&record.storage_ref);
    if MediaKind::from_mime(guessed) == Some(record.kind) {
        return guessed;
    }
    match record.kind {
        MediaKind::Video => "video/webm",
        MediaKind::Photo => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MockBlobStore;
    use crate::media_host::{MockMediaHost, ResourceKind};
    use crate::metadata_store::MockMediaRepository;
    use bytes::Bytes;
    use chrono::Utc;
    use uuid::Uuid;

    fn legacy(path: &str, kind: MediaKind) -> MediaRecord {
        MediaRecord {
            id: Uuid::new_v4(),
            storage_ref: path.to_string(),
            kind,
            duration_secs: None,
            cloud_url: None,
            size_bytes: None,
            width: None,
            height: None,
            legacy_path: None,
            created_at: Utc::now(),
        }
    }

    fn hosted(public_id: &str) -> UploadResult {
        UploadResult {
            public_id: public_id.to_string(),
            secure_url: format!("https://res.cloudinary.com/demo/image/upload/{public_id}.jpg"),
            format: "jpg".to_string(),
            resource_type: ResourceKind::Image,
            bytes: 3,
            duration: None,
            width: None,
            height: None,
            created_at: None,
        }
    }

    fn migrator(repository: MockMediaRepository, host: MockMediaHost, blobs: MockBlobStore) -> LegacyMigrator {
        LegacyMigrator::new(
            Arc::new(repository),
            Arc::new(host),
            Arc::new(blobs),
            &MediaHostConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_record_is_skipped() {
        let broken = legacy("gone-1.jpg", MediaKind::Photo);
        let good = legacy("ok-2.jpg", MediaKind::Photo);
        let good_id = good.id;
        let records = vec![broken, good];

        let mut repository = MockMediaRepository::new();
        repository
            .expect_list_unmigrated()
            .returning(move || Ok(records.clone()));
        repository
            .expect_mark_migrated()
            .withf(move |id, result| *id == good_id && result.public_id == "wedding-photos/ok-2")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut blobs = MockBlobStore::new();
        blobs
            .expect_get()
            .withf(|path| path == "gone-1.jpg")
            .returning(|path| Err(GalleryError::NotFound(format!("blob {path}"))));
        blobs
            .expect_get()
            .withf(|path| path == "ok-2.jpg")
            .returning(|_| Ok(Bytes::from_static(b"jpg")));

        let mut host = MockMediaHost::new();
        host.expect_is_configured().return_const(true);
        host.expect_upload()
            .withf(|file, options| {
                file.file_name == "ok-2.jpg"
                    && file.content_type == "image/jpeg"
                    && options.tags == vec!["wedding", "photo", MIGRATED_TAG]
            })
            .times(1)
            .returning(|_, _| Ok(hosted("wedding-photos/ok-2")));

        let report = migrator(repository, host, blobs).migrate().await.unwrap();
        assert_eq!(report, MigrationReport { succeeded: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_migrate_requires_configured_host() {
        let mut repository = MockMediaRepository::new();
        repository.expect_list_unmigrated().never();
        let mut host = MockMediaHost::new();
        host.expect_is_configured().return_const(false);

        let err = migrator(repository, host, MockBlobStore::new())
            .migrate()
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cleanup_clears_path_only_after_delete() {
        let mut done = legacy("wedding-photos/a", MediaKind::Photo);
        done.cloud_url = Some("https://res.cloudinary.com/demo/image/upload/a".to_string());
        done.legacy_path = Some("a-1.jpg".to_string());
        let mut stuck = done.clone();
        stuck.id = Uuid::new_v4();
        stuck.legacy_path = Some("b-2.jpg".to_string());
        let done_id = done.id;
        let records = vec![done, stuck];

        let mut repository = MockMediaRepository::new();
        repository
            .expect_list_legacy_leftovers()
            .returning(move || Ok(records.clone()));
        repository
            .expect_clear_legacy_path()
            .withf(move |id| *id == done_id)
            .times(1)
            .returning(|_| Ok(()));

        let mut blobs = MockBlobStore::new();
        blobs
            .expect_delete()
            .withf(|path| path == "a-1.jpg")
            .returning(|_| Ok(()));
        blobs
            .expect_delete()
            .withf(|path| path == "b-2.jpg")
            .returning(|_| Err(GalleryError::BlobStore("denied".to_string())));

        let report = migrator(repository, MockMediaHost::new(), blobs)
            .cleanup()
            .await
            .unwrap();
        assert_eq!(report, MigrationReport { succeeded: 1, failed: 1 });
        assert_eq!(report.total(), 2);
    }

    #[tokio::test]
    async fn test_video_with_unknown_extension_goes_to_video_endpoint() {
        let clip = legacy("x7k2p9-1717243200000.m4v", MediaKind::Video);
        let records = vec![clip];

        let mut repository = MockMediaRepository::new();
        repository
            .expect_list_unmigrated()
            .returning(move || Ok(records.clone()));
        repository.expect_mark_migrated().times(1).returning(|_, _| Ok(()));

        let mut blobs = MockBlobStore::new();
        blobs.expect_get().returning(|_| Ok(Bytes::from_static(b"m4v")));

        let mut host = MockMediaHost::new();
        host.expect_is_configured().return_const(true);
        host.expect_upload()
            .withf(|file, options| {
                file.content_type == "video/webm"
                    && ResourceKind::from_mime(&file.content_type) == ResourceKind::Video
                    && options.tags == vec!["wedding", "video", MIGRATED_TAG]
            })
            .times(1)
            .returning(|_, _| Ok(hosted("wedding-photos/x7k2p9")));

        let report = migrator(repository, host, blobs).migrate().await.unwrap();
        assert_eq!(report, MigrationReport { succeeded: 1, failed: 0 });
    }

    #[test]
    fn test_extension_trusted_only_when_it_matches_kind() {
        assert_eq!(content_type_for(&legacy("a.mov", MediaKind::Video)), "video/quicktime");
        assert_eq!(content_type_for(&legacy("a.png", MediaKind::Photo)), "image/png");
        assert_eq!(content_type_for(&legacy("a.jpg", MediaKind::Video)), "video/webm");
        assert_eq!(content_type_for(&legacy("noext", MediaKind::Photo)), "image/jpeg");
    }
}
