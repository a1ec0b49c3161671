use crate::auth::{AdminAccount, AdminAuth, AdminClaim, AdminSession};
use crate::blob_store::BlobStore;
use crate::change_feed::ChangeFeed;
use crate::config::ApiConfig;
use crate::error::GalleryError;
use crate::media_host::{DeliveryUrls, MediaFile, MediaHost, Transformation};
use crate::metadata_store::{MediaKind, MediaQuery, MediaRecord, MediaRepository, MediaStats};
use crate::orchestrator::UploadOrchestrator;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Edge length of gallery thumbnails
const THUMBNAIL_SIZE: u32 = 400;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn MediaRepository>,
    pub orchestrator: Arc<UploadOrchestrator>,
    pub media_host: Arc<dyn MediaHost>,
    pub delivery: Arc<DeliveryUrls>,
    pub blob_store: Arc<dyn BlobStore>,
    pub auth: Arc<AdminAuth>,
    pub changes: ChangeFeed,
}

impl FromRef<AppState> for Arc<AdminAuth> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Media record in API responses, with resolved URLs
#[derive(Debug, Serialize, Deserialize)]
pub struct MediaResponse {
    pub id: Uuid,
    pub kind: MediaKind,
    pub storage_ref: String,
    /// Full-size URL; `None` when no source can serve it
    pub display_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<i32>,
    pub size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for the gallery listing
#[derive(Debug, Deserialize)]
pub struct MediaListQuery {
    /// Filter by kind (`photo` or `video`)
    pub kind: Option<MediaKind>,
    /// Maximum results
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// Gallery listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct MediaListResponse {
    pub media: Vec<MediaResponse>,
    pub total_count: i64,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler error: status plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status for each error kind
pub fn status_for(err: &GalleryError) -> StatusCode {
    match err {
        GalleryError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        GalleryError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        GalleryError::Transport { .. } | GalleryError::Http(_) => StatusCode::BAD_GATEWAY,
        GalleryError::Persistence { .. }
        | GalleryError::Database(_)
        | GalleryError::BlobStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GalleryError::NotFound(_) => StatusCode::NOT_FOUND,
        GalleryError::Unauthorized => StatusCode::UNAUTHORIZED,
        GalleryError::AdminExists | GalleryError::Busy => StatusCode::CONFLICT,
        GalleryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

/// Convert a service error into a handler error, logging server-side failures
pub fn error_response(err: GalleryError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, code = err.code(), "Request failed");
    } else {
        debug!(error = %err, code = err.code(), "Request rejected");
    }

    let message = match err {
        GalleryError::Database(_) => "Failed to query media".to_string(),
        ref other => other.to_string(),
    };

    (
        status,
        Json(ErrorResponse {
            error: message,
            code: err.code().to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/media", get(list_media))
        .route("/api/v1/media/events", get(media_events))
        .route("/api/v1/media/:media_id", get(get_media).delete(delete_media))
        .route("/api/v1/uploads", post(upload_media))
        .route("/api/v1/admin/stats", get(admin_stats))
        .route("/api/v1/auth/sign-up", post(sign_up))
        .route("/api/v1/auth/sign-in", post(sign_in))
        .route("/api/v1/auth/sign-out", post(sign_out))
        .route("/api/v1/auth/me", get(current_admin))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gallery-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.repository.count(None).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "uploads_enabled": state.media_host.is_configured()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Gallery listing, newest first
#[instrument(skip(state))]
async fn list_media(
    State(state): State<AppState>,
    Query(params): Query<MediaListQuery>,
) -> Result<Json<MediaListResponse>, ApiError> {
    if params.limit <= 0 || params.offset < 0 {
        return Err(error_response(GalleryError::InvalidRequest(
            "limit must be positive and offset non-negative".to_string(),
        )));
    }

    let query = MediaQuery {
        kind: params.kind,
        limit: Some(params.limit + 1), // Fetch one extra to check has_more
        offset: Some(params.offset),
    };

    let mut records = state.repository.list(&query).await.map_err(error_response)?;

    let has_more = records.len() > params.limit as usize;
    if has_more {
        records.pop();
    }

    let total_count = state
        .repository
        .count(params.kind)
        .await
        .map_err(error_response)?;

    Ok(Json(MediaListResponse {
        media: records.into_iter().map(|r| media_response(&state, r)).collect(),
        total_count,
        has_more,
    }))
}

#[instrument(skip(state))]
async fn get_media(
    State(state): State<AppState>,
    Path(media_id): Path<Uuid>,
) -> Result<Json<MediaResponse>, ApiError> {
    let record = find_media(&state, media_id).await?;
    Ok(Json(media_response(&state, record)))
}

/// Server-sent change notifications. Lagging clients get a `resync` event.
async fn media_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = BroadcastStream::new(state.changes.subscribe()).map(|message| match message {
        Ok(change) => Event::default().event("change").json_data(&change),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!(missed, "Change feed subscriber lagged");
            Ok(Event::default().event("resync").data(missed.to_string()))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Guest upload: multipart `file` plus optional `duration` in seconds
#[instrument(skip(state, multipart))]
async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MediaResponse>), ApiError> {
    let mut file = None;
    let mut duration = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error_response(GalleryError::InvalidRequest(e.body_text())))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| error_response(GalleryError::InvalidRequest(e.body_text())))?;
                file = Some(MediaFile::new(file_name, content_type, data));
            }
            Some("duration") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| error_response(GalleryError::InvalidRequest(e.body_text())))?;
                duration = Some(parse_duration(&text).map_err(error_response)?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| {
        error_response(GalleryError::InvalidRequest("missing 'file' field".to_string()))
    })?;
    let kind = MediaKind::from_mime(&file.content_type).ok_or_else(|| {
        error_response(GalleryError::UnsupportedMediaType(file.content_type.clone()))
    })?;

    let submission = state
        .orchestrator
        .submit(file, kind, duration)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(media_response(&state, submission.record)),
    ))
}

/// Hard delete: the blob goes first, then the row
#[instrument(skip(state, claim), fields(admin_id = %claim.admin.id))]
async fn delete_media(
    State(state): State<AppState>,
    claim: AdminClaim,
    Path(media_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let record = find_media(&state, media_id).await?;

    remove_blob(&state, &record).await.map_err(error_response)?;

    if !state
        .repository
        .delete(media_id)
        .await
        .map_err(error_response)?
    {
        return Err(error_response(GalleryError::NotFound(format!("media {media_id}"))));
    }

    metrics::counter!("gallery.media.deleted").increment(1);
    info!(media_id = %media_id, "Media deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn admin_stats(
    State(state): State<AppState>,
    _claim: AdminClaim,
) -> Result<Json<MediaStats>, ApiError> {
    let stats = state.repository.stats().await.map_err(error_response)?;
    Ok(Json(stats))
}

async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<AdminSession>), ApiError> {
    let session = state
        .auth
        .sign_up(&request.email, &request.password)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<AdminSession>, ApiError> {
    let session = state
        .auth
        .sign_in(&request.email, &request.password)
        .await
        .map_err(error_response)?;
    Ok(Json(session))
}

async fn sign_out(State(state): State<AppState>, claim: AdminClaim) -> Result<StatusCode, ApiError> {
    state
        .auth
        .sign_out(claim.token())
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_admin(claim: AdminClaim) -> Json<AdminAccount> {
    Json(claim.admin)
}

async fn find_media(state: &AppState, media_id: Uuid) -> Result<MediaRecord, ApiError> {
    state
        .repository
        .get(media_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(GalleryError::NotFound(format!("media {media_id}"))))
}

/// Remove the stored object behind a record.
///
/// Hosted assets that cannot be destroyed for lack of credentials are logged
/// and left behind; the row is still deleted.
async fn remove_blob(state: &AppState, record: &MediaRecord) -> crate::error::Result<()> {
    if !record.is_hosted() {
        return state.blob_store.delete(&record.storage_ref).await;
    }

    match state
        .media_host
        .destroy(&record.storage_ref, record.kind.into())
        .await
    {
        Ok(()) => {}
        Err(GalleryError::Configuration(reason)) => {
            warn!(public_id = %record.storage_ref, reason = %reason, "Media host asset left in place");
        }
        Err(e) => return Err(e),
    }

    if let Some(ref legacy_path) = record.legacy_path {
        if let Err(e) = state.blob_store.delete(legacy_path).await {
            warn!(path = %legacy_path, error = %e, "Failed to remove legacy blob");
        }
    }

    Ok(())
}

/// Display URL: stored cloud URL, then the legacy public URL.
/// Thumbnails come from the media host for hosted records.
fn media_response(state: &AppState, record: MediaRecord) -> MediaResponse {
    let (display_url, thumbnail_url) = if record.is_hosted() {
        let thumbnail = Transformation::thumbnail(THUMBNAIL_SIZE);
        let thumbnail_url = match record.kind {
            MediaKind::Photo => state.delivery.generate_url(&record.storage_ref, &thumbnail),
            MediaKind::Video => state.delivery.generate_video_url(&record.storage_ref, &thumbnail),
        };
        let display_url = record.cloud_url.clone().or_else(|| {
            Some(state.delivery.generate_url(&record.storage_ref, &Transformation::default()))
        });
        (
            display_url.filter(|u| !u.is_empty()),
            Some(thumbnail_url).filter(|u| !u.is_empty()),
        )
    } else {
        let url = state.blob_store.public_url(&record.storage_ref);
        (url.clone(), url)
    };

    MediaResponse {
        id: record.id,
        kind: record.kind,
        storage_ref: record.storage_ref,
        display_url,
        thumbnail_url,
        duration_secs: record.duration_secs,
        size_bytes: record.size_bytes,
        width: record.width,
        height: record.height,
        created_at: record.created_at,
    }
}

/// Seconds as sent by the recorder; fractional values are rounded.
fn parse_duration(text: &str) -> crate::error::Result<u32> {
    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|_| GalleryError::InvalidRequest(format!("invalid duration '{}'", text.trim())))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(GalleryError::InvalidRequest(format!("invalid duration '{seconds}'")));
    }

    Ok(seconds.round() as u32)
}

/// Start the gallery API server; returns once `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
