//! End-to-end upload path: orchestrator → HTTP media host client → repository,
//! against an in-process stand-in for the media host.

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use gallery_service::config::MediaHostConfig;
use gallery_service::media_host::UploadResult;
use gallery_service::metadata_store::NewMediaRecord;
use gallery_service::{
    CloudMediaHost, GalleryError, MediaFile, MediaKind, MediaQuery, MediaRecord, MediaRepository,
    MediaStats, Result, UploadOrchestrator, UploadPhase, UploadProgress,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Default)]
struct FakeHost {
    status: Option<StatusCode>,
    calls: Arc<Mutex<Vec<String>>>,
}

async fn upload(
    State(host): State<FakeHost>,
    Path((cloud, kind)): Path<(String, String)>,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    let mut size = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        }
    }
    host.calls.lock().unwrap().push(format!("{cloud}/{kind}"));

    if let Some(status) = host.status {
        return (status, "host unavailable".to_string());
    }

    let (format, duration) = if kind == "video" {
        ("webm", Some(9.4))
    } else {
        ("jpg", None)
    };
    let body = serde_json::json!({
        "public_id": "wedding-photos/fresh",
        "secure_url": format!("https://res.cloudinary.com/{cloud}/{kind}/upload/wedding-photos/fresh"),
        "format": format,
        "resource_type": kind,
        "bytes": size,
        "duration": duration,
    });
    (StatusCode::OK, body.to_string())
}

async fn spawn_host(host: FakeHost) -> String {
    let app = Router::new()
        .route("/v1_1/:cloud/:kind/upload", post(upload))
        .layer(DefaultBodyLimit::disable())
        .with_state(host);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Keeps records in memory; optionally fails every write
#[derive(Default)]
struct MemoryRepository {
    records: Mutex<Vec<MediaRecord>>,
    fail_writes: bool,
}

#[async_trait]
impl MediaRepository for MemoryRepository {
    async fn insert(&self, record: &NewMediaRecord) -> Result<MediaRecord> {
        if self.fail_writes {
            return Err(GalleryError::Database(sqlx::Error::PoolClosed));
        }
        let stored = MediaRecord {
            id: Uuid::new_v4(),
            storage_ref: record.storage_ref().to_string(),
            kind: record.kind(),
            duration_secs: record.duration_secs(),
            cloud_url: record.cloud_url().map(str::to_string),
            size_bytes: None,
            width: None,
            height: None,
            legacy_path: None,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaRecord>> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, _query: &MediaQuery) -> Result<Vec<MediaRecord>> {
        Ok(self.records.lock().unwrap().iter().rev().cloned().collect())
    }

    async fn count(&self, _kind: Option<MediaKind>) -> Result<i64> {
        Ok(self.records.lock().unwrap().len() as i64)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn stats(&self) -> Result<MediaStats> {
        Ok(MediaStats::default())
    }

    async fn list_unmigrated(&self) -> Result<Vec<MediaRecord>> {
        Ok(Vec::new())
    }

    async fn list_legacy_leftovers(&self) -> Result<Vec<MediaRecord>> {
        Ok(Vec::new())
    }

    async fn mark_migrated(&self, _id: Uuid, _result: &UploadResult) -> Result<()> {
        Ok(())
    }

    async fn clear_legacy_path(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }
}

fn config(api_base: &str) -> MediaHostConfig {
    MediaHostConfig {
        cloud_name: Some("demo".to_string()),
        upload_preset: Some("guests".to_string()),
        api_base: api_base.to_string(),
        ..Default::default()
    }
}

fn orchestrator(config: &MediaHostConfig, repository: Arc<MemoryRepository>) -> UploadOrchestrator {
    UploadOrchestrator::new(Arc::new(CloudMediaHost::new(config).unwrap()), repository, config)
}

#[tokio::test]
async fn photo_is_uploaded_then_indexed() {
    let host = FakeHost::default();
    let base = spawn_host(host.clone()).await;
    let repository = Arc::new(MemoryRepository::default());

    let file = MediaFile::new("first-dance.jpg", "image/jpeg", vec![7u8; 2 * 1024 * 1024]);
    let submission = orchestrator(&config(&base), repository.clone())
        .submit(file, MediaKind::Photo, None)
        .await
        .unwrap();

    assert_eq!(*host.calls.lock().unwrap(), vec!["demo/image".to_string()]);
    assert_eq!(submission.record.kind, MediaKind::Photo);
    assert_eq!(submission.record.duration_secs, None);
    assert_eq!(repository.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn recorded_video_keeps_client_duration() {
    let host = FakeHost::default();
    let base = spawn_host(host.clone()).await;
    let repository = Arc::new(MemoryRepository::default());

    let file = MediaFile::new("recording.webm", "video/webm", vec![1u8; 4096]);
    let submission = orchestrator(&config(&base), repository)
        .submit(file, MediaKind::Video, Some(12))
        .await
        .unwrap();

    assert_eq!(*host.calls.lock().unwrap(), vec!["demo/video".to_string()]);
    assert_eq!(submission.record.duration_secs, Some(12));
}

#[tokio::test]
async fn host_failure_leaves_nothing_indexed() {
    let host = FakeHost {
        status: Some(StatusCode::INTERNAL_SERVER_ERROR),
        ..Default::default()
    };
    let base = spawn_host(host.clone()).await;
    let repository = Arc::new(MemoryRepository::default());
    let progress = UploadProgress::new();

    let file = MediaFile::new("cake.jpg", "image/jpeg", vec![0u8; 1024]);
    let err = orchestrator(&config(&base), repository.clone())
        .submit_with(&progress, file, MediaKind::Photo, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GalleryError::Transport { status: 500, .. }));
    assert_eq!(repository.count(None).await.unwrap(), 0);
    assert!(progress.preview().is_some());
    assert!(matches!(progress.phase(), UploadPhase::Failed { .. }));
}

#[tokio::test]
async fn missing_credentials_never_reach_the_host() {
    let host = FakeHost::default();
    let base = spawn_host(host.clone()).await;
    let repository = Arc::new(MemoryRepository::default());
    let progress = UploadProgress::new();

    let unconfigured = MediaHostConfig {
        api_base: base,
        ..Default::default()
    };
    let file = MediaFile::new("toast.jpg", "image/jpeg", vec![0u8; 1024]);
    let err = orchestrator(&unconfigured, repository)
        .submit_with(&progress, file, MediaKind::Photo, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GalleryError::Configuration(_)));
    assert!(host.calls.lock().unwrap().is_empty());
    assert!(progress.preview().is_none());
}

#[tokio::test]
async fn failed_insert_reports_orphaned_asset() {
    let host = FakeHost::default();
    let base = spawn_host(host.clone()).await;
    let repository = Arc::new(MemoryRepository {
        fail_writes: true,
        ..Default::default()
    });

    let file = MediaFile::new("vows.jpg", "image/jpeg", vec![0u8; 1024]);
    let err = orchestrator(&config(&base), repository)
        .submit(file, MediaKind::Photo, None)
        .await
        .unwrap_err();

    match err {
        GalleryError::Persistence { public_id, .. } => assert_eq!(public_id, "wedding-photos/fresh"),
        other => panic!("expected persistence error, got {other:?}"),
    }
    assert_eq!(host.calls.lock().unwrap().len(), 1);
}
