//! Hand-off of confirmed recordings to the gallery service.

use crate::config::HandoffConfig;
use crate::error::{CaptureError, Result};
use crate::pipeline::Recording;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

/// What the gallery stored for a recording
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HandoffReceipt {
    pub id: Uuid,
    #[serde(default)]
    pub display_url: Option<String>,
}

/// Receiver of confirmed recordings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordingHandoff: Send + Sync {
    async fn hand_off(&self, recording: &Recording) -> Result<HandoffReceipt>;
}

/// Posts recordings to the gallery upload endpoint
pub struct GalleryUploadClient {
    client: Client,
    upload_url: String,
}

impl GalleryUploadClient {
    pub fn new(config: &HandoffConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CaptureError::Handoff(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            upload_url: format!("{}/api/v1/uploads", config.gallery_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RecordingHandoff for GalleryUploadClient {
    #[instrument(skip(self, recording), fields(bytes = recording.data.len(), duration_secs = recording.duration_secs))]
    async fn hand_off(&self, recording: &Recording) -> Result<HandoffReceipt> {
        let file_name = format!("recording-{}.webm", Utc::now().timestamp_millis());
        let part = Part::stream_with_length(recording.data.clone(), recording.data.len() as u64)
            .file_name(file_name)
            .mime_str(&recording.mime_type)
            .map_err(|e| CaptureError::Handoff(e.to_string()))?;

        let form = Form::new()
            .part("file", part)
            .text("duration", recording.duration_secs.to_string());

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CaptureError::Handoff(format!("gallery unreachable: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CaptureError::Handoff(format!("gallery responded {status}: {body}")));
        }

        let receipt: HandoffReceipt = response
            .json()
            .await
            .map_err(|e| CaptureError::Handoff(format!("unreadable gallery response: {e}")))?;

        info!(media_id = %receipt.id, "Recording handed off to gallery");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Received {
        fields: Arc<Mutex<Vec<(String, Option<String>, usize)>>>,
    }

    async fn accept(State(received): State<Received>, mut multipart: Multipart) -> (StatusCode, Json<serde_json::Value>) {
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let content_type = field.content_type().map(str::to_string);
            let len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            received.fields.lock().unwrap().push((name, content_type, len));
        }
        (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": "8d1f8c1e-6b7a-4c8e-9f0a-2b3c4d5e6f70",
                "display_url": "https://res.cloudinary.com/demo/video/upload/clip"
            })),
        )
    }

    async fn reject() -> (StatusCode, &'static str) {
        (StatusCode::SERVICE_UNAVAILABLE, "uploads disabled")
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn recording() -> Recording {
        Recording {
            data: Bytes::from(vec![0x1a, 0x45, 0xdf, 0xa3, 0, 0, 0, 0]),
            mime_type: "video/webm".to_string(),
            duration_secs: 14,
        }
    }

    fn client(gallery_url: String) -> GalleryUploadClient {
        GalleryUploadClient::new(&HandoffConfig {
            gallery_url,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_hand_off_posts_file_and_duration() {
        let received = Received::default();
        let url = spawn(
            Router::new()
                .route("/api/v1/uploads", post(accept))
                .with_state(received.clone()),
        )
        .await;

        let receipt = client(url).hand_off(&recording()).await.unwrap();
        assert_eq!(receipt.id.to_string(), "8d1f8c1e-6b7a-4c8e-9f0a-2b3c4d5e6f70");

        let fields = received.fields.lock().unwrap().clone();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], ("file".to_string(), Some("video/webm".to_string()), 8));
        assert_eq!(fields[1].0, "duration");
    }

    #[tokio::test]
    async fn test_gallery_rejection_is_handoff_error() {
        let url = spawn(Router::new().route("/api/v1/uploads", post(reject))).await;

        let err = client(url).hand_off(&recording()).await.unwrap_err();
        match err {
            CaptureError::Handoff(message) => assert!(message.contains("503")),
            other => panic!("expected hand-off error, got {other:?}"),
        }
    }
}
