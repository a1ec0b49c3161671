//! Media host client.
//!
//! Uploads guest media to the hosted media service over its unsigned upload
//! API, and builds delivery URLs with on-the-fly transformations.

use crate::config::MediaHostConfig;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

/// Resource family on the media host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Video,
}

impl ResourceKind {
    /// `video/*` uploads as video, anything else as image.
    pub fn from_mime(content_type: &str) -> Self {
        if content_type.starts_with("video/") {
            ResourceKind::Video
        } else {
            ResourceKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Video => "video",
        }
    }
}

/// A file held in memory, as received from a guest.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    /// Declared MIME type
    pub content_type: String,
    pub data: Bytes,
}

impl MediaFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-upload options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    pub folder: Option<String>,
    pub tags: Vec<String>,
}

/// Normalized response of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub public_id: String,
    pub secure_url: String,
    #[serde(default)]
    pub format: String,
    pub resource_type: ResourceKind,
    pub bytes: u64,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

/// Remote media host operations used by the orchestrator and admin surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Whether the account name and upload preset are available.
    fn is_configured(&self) -> bool;

    /// Upload one file.
    async fn upload(&self, file: &MediaFile, options: &UploadOptions) -> Result<UploadResult>;

    /// Remove an uploaded asset. Requires signed-API credentials.
    async fn destroy(&self, public_id: &str, kind: ResourceKind) -> Result<()>;
}

/// HTTP client for the hosted media service
pub struct CloudMediaHost {
    client: Client,
    config: MediaHostConfig,
    urls: DeliveryUrls,
}

impl CloudMediaHost {
    /// Create a new media host client
    pub fn new(config: &MediaHostConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        if config.is_configured() {
            info!(
                cloud_name = config.cloud_name().unwrap_or_default(),
                folder = %config.folder,
                "Media host client initialized"
            );
        } else {
            warn!("Media host is not configured; set media_host.cloud_name and media_host.upload_preset");
        }

        Ok(Self {
            client,
            config: config.clone(),
            urls: DeliveryUrls::new(config),
        })
    }

    /// Delivery URL builder bound to the same account
    pub fn delivery(&self) -> &DeliveryUrls {
        &self.urls
    }

    fn endpoint(&self, cloud_name: &str, kind: ResourceKind, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            cloud_name,
            kind.as_str(),
            action
        )
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.config.cloud_name(), self.config.upload_preset()) {
            (Some(cloud_name), Some(preset)) => Ok((cloud_name, preset)),
            _ => Err(GalleryError::Configuration(
                "media_host.cloud_name and media_host.upload_preset are required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl MediaHost for CloudMediaHost {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    #[instrument(skip(self, file, options), fields(file_name = %file.file_name, content_type = %file.content_type, size_bytes = file.len()))]
    async fn upload(&self, file: &MediaFile, options: &UploadOptions) -> Result<UploadResult> {
        let (cloud_name, preset) = self.credentials()?;
        let kind = ResourceKind::from_mime(&file.content_type);
        let url = self.endpoint(cloud_name, kind, "upload");

        let part = Part::stream_with_length(file.data.clone(), file.len() as u64)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;

        let mut form = Form::new()
            .part("file", part)
            .text("upload_preset", preset.to_string());

        if let Some(ref folder) = options.folder {
            form = form.text("folder", folder.clone());
        }

        if !options.tags.is_empty() {
            form = form.text("tags", options.tags.join(","));
        }

        form = form.text("timestamp", Utc::now().timestamp_millis().to_string());

        debug!(url = %url, "Uploading to media host");

        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!(status, body = %body, "Media host rejected upload");
            return Err(GalleryError::Transport { status, body });
        }

        let result: UploadResult = response.json().await?;

        info!(
            public_id = %result.public_id,
            resource_type = result.resource_type.as_str(),
            bytes = result.bytes,
            "Upload accepted by media host"
        );

        Ok(result)
    }

    #[instrument(skip(self))]
    async fn destroy(&self, public_id: &str, kind: ResourceKind) -> Result<()> {
        let cloud_name = self
            .config
            .cloud_name()
            .ok_or_else(|| GalleryError::Configuration("media_host.cloud_name is required".to_string()))?;
        let (api_key, api_secret) = match (&self.config.api_key, &self.config.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => (key, secret),
            _ => {
                return Err(GalleryError::Configuration(
                    "media_host.api_key and media_host.api_secret are required to delete assets"
                        .to_string(),
                ))
            }
        };

        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_params(&[("public_id", public_id), ("timestamp", &timestamp)], api_secret);

        let response = self
            .client
            .post(self.endpoint(cloud_name, kind, "destroy"))
            .form(&[
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
                ("api_key", api_key.as_str()),
                ("signature", signature.as_str()),
                ("signature_algorithm", "sha256"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GalleryError::Transport { status, body });
        }

        let outcome: DestroyResponse = response.json().await?;
        match outcome.result.as_str() {
            "ok" => debug!(public_id, "Asset removed from media host"),
            other => warn!(public_id, result = other, "Media host did not remove asset"),
        }

        Ok(())
    }
}

/// Signature over alphabetically sorted `key=value` pairs followed by the secret.
fn sign_params(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let digest = Sha256::digest(format!("{joined}{secret}").as_bytes());
    format!("{:x}", digest)
}

/// Delivery transformation options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformation {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop: Option<String>,
    pub quality: Option<String>,
    pub format: Option<String>,
}

impl Transformation {
    /// Square gallery thumbnail with automatic quality and format.
    pub fn thumbnail(size: u32) -> Self {
        Self {
            width: Some(size),
            height: Some(size),
            crop: Some("fill".to_string()),
            quality: Some("auto".to_string()),
            format: Some("auto".to_string()),
        }
    }

    /// Segments in delivery order: dimensions+crop, quality, format.
    fn segments(&self, forced_crop: Option<&str>) -> Vec<String> {
        let mut segments = Vec::new();

        if self.width.is_some() || self.height.is_some() {
            let crop = forced_crop
                .map(str::to_string)
                .or_else(|| self.crop.clone())
                .unwrap_or_else(|| "fill".to_string());

            let dims: Vec<String> = [
                self.width.map(|w| format!("w_{w}")),
                self.height.map(|h| format!("h_{h}")),
                Some(format!("c_{crop}")),
            ]
            .into_iter()
            .flatten()
            .collect();

            segments.push(dims.join(","));
        }

        if let Some(ref quality) = self.quality {
            segments.push(format!("q_{quality}"));
        }

        if let Some(ref format) = self.format {
            segments.push(format!("f_{format}"));
        }

        segments
    }
}

/// Pure delivery URL builder; never touches the network.
#[derive(Debug, Clone)]
pub struct DeliveryUrls {
    base: String,
    cloud_name: Option<String>,
}

impl DeliveryUrls {
    pub fn new(config: &MediaHostConfig) -> Self {
        Self {
            base: config.delivery_base.trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name().map(str::to_string),
        }
    }

    /// Image delivery URL. Empty when no account is configured.
    pub fn generate_url(&self, public_id: &str, options: &Transformation) -> String {
        self.build(ResourceKind::Image, public_id, options.segments(None))
    }

    /// Video delivery URL; dimensions always crop with `fill`.
    pub fn generate_video_url(&self, public_id: &str, options: &Transformation) -> String {
        self.build(ResourceKind::Video, public_id, options.segments(Some("fill")))
    }

    fn build(&self, kind: ResourceKind, public_id: &str, segments: Vec<String>) -> String {
        let Some(ref cloud_name) = self.cloud_name else {
            return String::new();
        };

        let transformations = if segments.is_empty() {
            String::new()
        } else {
            format!("{}/", segments.join("/"))
        };

        format!(
            "{}/{}/{}/upload/{}{}",
            self.base,
            cloud_name,
            kind.as_str(),
            transformations,
            public_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        fields: HashMap<String, String>,
        file_len: usize,
    }

    #[derive(Clone)]
    struct FakeHost {
        status: StatusCode,
        body: &'static str,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    async fn fake_upload(
        State(host): State<FakeHost>,
        Path((cloud, kind)): Path<(String, String)>,
        mut multipart: Multipart,
    ) -> (StatusCode, String) {
        let mut fields = HashMap::new();
        let mut file_len = 0;

        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                file_len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            } else {
                fields.insert(name, field.text().await.unwrap_or_default());
            }
        }

        host.requests.lock().await.push(CapturedRequest {
            path: format!("/v1_1/{cloud}/{kind}/upload"),
            fields,
            file_len,
        });

        (host.status, host.body.to_string())
    }

    async fn spawn_fake_host(
        status: StatusCode,
        body: &'static str,
    ) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/v1_1/:cloud/:kind/upload", post(fake_upload))
            .layer(axum::extract::DefaultBodyLimit::disable())
            .with_state(FakeHost {
                status,
                body,
                requests: requests.clone(),
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), requests)
    }

    fn configured(api_base: &str) -> MediaHostConfig {
        MediaHostConfig {
            cloud_name: Some("demo".to_string()),
            upload_preset: Some("guests".to_string()),
            api_base: api_base.to_string(),
            ..Default::default()
        }
    }

    const IMAGE_RESPONSE: &str = r#"{
        "public_id": "wedding-photos/abc123",
        "secure_url": "https://res.cloudinary.com/demo/image/upload/v1/wedding-photos/abc123.jpg",
        "format": "jpg",
        "resource_type": "image",
        "bytes": 2097152,
        "width": 4032,
        "height": 3024,
        "created_at": "2024-06-01T18:30:00Z"
    }"#;

    #[test]
    fn test_resource_kind_from_mime() {
        assert_eq!(ResourceKind::from_mime("video/webm"), ResourceKind::Video);
        assert_eq!(ResourceKind::from_mime("image/jpeg"), ResourceKind::Image);
        assert_eq!(ResourceKind::from_mime("application/pdf"), ResourceKind::Image);
    }

    #[test]
    fn test_generate_url_orders_segments() {
        let urls = DeliveryUrls::new(&configured("unused"));
        let options = Transformation::thumbnail(400);

        let first = urls.generate_url("wedding-photos/abc", &options);
        let second = urls.generate_url("wedding-photos/abc", &options);

        assert_eq!(first, second);
        assert_eq!(
            first,
            "https://res.cloudinary.com/demo/image/upload/w_400,h_400,c_fill/q_auto/f_auto/wedding-photos/abc"
        );
    }

    #[test]
    fn test_generate_url_without_options() {
        let urls = DeliveryUrls::new(&configured("unused"));
        assert_eq!(
            urls.generate_url("abc", &Transformation::default()),
            "https://res.cloudinary.com/demo/image/upload/abc"
        );
    }

    #[test]
    fn test_generate_url_width_only_defaults_crop() {
        let urls = DeliveryUrls::new(&configured("unused"));
        let options = Transformation {
            width: Some(800),
            quality: Some("80".to_string()),
            ..Default::default()
        };
        assert_eq!(
            urls.generate_url("abc", &options),
            "https://res.cloudinary.com/demo/image/upload/w_800,c_fill/q_80/abc"
        );
    }

    #[test]
    fn test_generate_video_url_forces_fill() {
        let urls = DeliveryUrls::new(&configured("unused"));
        let options = Transformation {
            width: Some(400),
            height: Some(400),
            crop: Some("scale".to_string()),
            format: Some("mp4".to_string()),
            ..Default::default()
        };
        assert_eq!(
            urls.generate_video_url("clip", &options),
            "https://res.cloudinary.com/demo/video/upload/w_400,h_400,c_fill/f_mp4/clip"
        );
    }

    #[test]
    fn test_generate_url_empty_without_account() {
        let urls = DeliveryUrls::new(&MediaHostConfig::default());
        assert_eq!(urls.generate_url("abc", &Transformation::thumbnail(400)), "");
    }

    #[test]
    fn test_sign_params_sorts_keys() {
        let a = sign_params(&[("timestamp", "1"), ("public_id", "x")], "secret");
        let b = sign_params(&[("public_id", "x"), ("timestamp", "1")], "secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_upload_posts_to_image_endpoint() {
        let (base, requests) = spawn_fake_host(StatusCode::OK, IMAGE_RESPONSE).await;
        let host = CloudMediaHost::new(&configured(&base)).unwrap();
        let file = MediaFile::new("party.jpg", "image/jpeg", vec![7u8; 2 * 1024 * 1024]);
        let options = UploadOptions {
            folder: Some("wedding-photos".to_string()),
            tags: vec!["wedding".to_string(), "photo".to_string()],
        };

        let result = host.upload(&file, &options).await.unwrap();

        assert_eq!(result.public_id, "wedding-photos/abc123");
        assert_eq!(result.resource_type, ResourceKind::Image);
        assert_eq!(result.width, Some(4032));

        let requests = requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/v1_1/demo/image/upload");
        assert_eq!(requests[0].file_len, 2 * 1024 * 1024);
        assert_eq!(requests[0].fields["upload_preset"], "guests");
        assert_eq!(requests[0].fields["folder"], "wedding-photos");
        assert_eq!(requests[0].fields["tags"], "wedding,photo");
        assert!(requests[0].fields.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn test_upload_video_uses_video_endpoint() {
        let body = r#"{"public_id":"clip","secure_url":"https://x/clip.webm","format":"webm","resource_type":"video","bytes":10,"duration":12.5}"#;
        let (base, requests) = spawn_fake_host(StatusCode::OK, body).await;
        let host = CloudMediaHost::new(&configured(&base)).unwrap();
        let file = MediaFile::new("story.webm", "video/webm", vec![1u8; 10]);

        let result = host.upload(&file, &UploadOptions::default()).await.unwrap();

        assert_eq!(result.duration, Some(12.5));
        let requests = requests.lock().await;
        assert_eq!(requests[0].path, "/v1_1/demo/video/upload");
        assert!(!requests[0].fields.contains_key("folder"));
        assert!(!requests[0].fields.contains_key("tags"));
    }

    #[tokio::test]
    async fn test_upload_server_error_is_transport() {
        let (base, requests) =
            spawn_fake_host(StatusCode::INTERNAL_SERVER_ERROR, "storage offline").await;
        let host = CloudMediaHost::new(&configured(&base)).unwrap();
        let file = MediaFile::new("party.jpg", "image/jpeg", vec![0u8; 16]);

        let err = host.upload(&file, &UploadOptions::default()).await.unwrap_err();

        match err {
            GalleryError::Transport { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "storage offline");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_credentials_makes_no_request() {
        let (base, requests) = spawn_fake_host(StatusCode::OK, IMAGE_RESPONSE).await;
        let config = MediaHostConfig {
            api_base: base,
            ..Default::default()
        };
        let host = CloudMediaHost::new(&config).unwrap();
        let file = MediaFile::new("party.jpg", "image/jpeg", vec![0u8; 16]);

        let err = host.upload(&file, &UploadOptions::default()).await.unwrap_err();

        assert!(matches!(err, GalleryError::Configuration(_)));
        assert!(requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_requires_secret() {
        let host = CloudMediaHost::new(&configured("http://127.0.0.1:9")).unwrap();
        let err = host.destroy("abc", ResourceKind::Image).await.unwrap_err();
        assert!(matches!(err, GalleryError::Configuration(_)));
    }
}
