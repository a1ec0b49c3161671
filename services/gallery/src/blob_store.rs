//! Legacy object storage.
//!
//! Uploads made before the media host was introduced live in an S3-compatible
//! bucket under a flat `{random}-{millis}.{ext}` path. They are served from
//! there until migrated, and removed when their record is deleted. Nothing new
//! is written here.

use crate::config::BlobStoreConfig;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// Blob operations on legacy storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Bytes>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Publicly reachable URL for `path`, when the bucket is public.
    fn public_url(&self, path: &str) -> Option<String>;
}

/// S3-backed legacy blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3BlobStore {
    /// Create a new blob store client
    pub async fn new(config: &BlobStoreConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Legacy blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                    GalleryError::NotFound(format!("blob {path}"))
                } else {
                    GalleryError::BlobStore(format!("failed to download {path}: {e}"))
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| GalleryError::BlobStore(format!("failed to read {path}: {e}")))?;

        Ok(data.into_bytes())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| GalleryError::BlobStore(format!("failed to delete {path}: {e}")))?;

        debug!(path, "Legacy blob deleted");
        Ok(())
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base, path.trim_start_matches('/')))
    }
}

/// Content type for a legacy blob, inferred from its extension
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_lowercase());
    match ext.as_deref() {
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for_path("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for_path("a.webm"), "video/webm");
        assert_eq!(content_type_for_path("wedding-photos/abc"), "application/octet-stream");
    }
}
