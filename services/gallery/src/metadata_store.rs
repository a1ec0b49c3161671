use crate::config::DatabaseConfig;
use crate::error::{GalleryError, Result};
use crate::media_host::{ResourceKind, UploadResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Kind of guest media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    /// Kind implied by a declared MIME type, if it is image or video.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        if content_type.starts_with("image/") {
            Some(MediaKind::Photo)
        } else if content_type.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl From<MediaKind> for ResourceKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Photo => ResourceKind::Image,
            MediaKind::Video => ResourceKind::Video,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = GalleryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            other => Err(GalleryError::InvalidRequest(format!("unknown media kind '{other}'"))),
        }
    }
}

/// Stored media metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: Uuid,
    /// Legacy storage path or media host public id
    pub storage_ref: String,
    pub kind: MediaKind,
    /// Seconds; only ever set for videos
    pub duration_secs: Option<i32>,
    pub cloud_url: Option<String>,
    pub size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Pre-migration storage path, kept until the legacy blob is cleaned up
    pub legacy_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    /// Whether `storage_ref` points at the media host rather than legacy storage.
    pub fn is_hosted(&self) -> bool {
        self.cloud_url.is_some()
    }
}

#[derive(Debug, FromRow)]
struct MediaRow {
    id: Uuid,
    storage_ref: String,
    media_type: String,
    duration_secs: Option<i32>,
    cloud_url: Option<String>,
    size_bytes: Option<i64>,
    width: Option<i32>,
    height: Option<i32>,
    legacy_path: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for MediaRecord {
    type Error = GalleryError;

    fn try_from(row: MediaRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            storage_ref: row.storage_ref,
            kind: row.media_type.parse()?,
            duration_secs: row.duration_secs,
            cloud_url: row.cloud_url,
            size_bytes: row.size_bytes,
            width: row.width,
            height: row.height,
            legacy_path: row.legacy_path,
            created_at: row.created_at,
        })
    }
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaRecord {
    storage_ref: String,
    kind: MediaKind,
    duration_secs: Option<i32>,
    cloud_url: Option<String>,
    size_bytes: Option<i64>,
    width: Option<i32>,
    height: Option<i32>,
}

impl NewMediaRecord {
    /// Fails when the storage reference is empty.
    pub fn new(storage_ref: impl Into<String>, kind: MediaKind) -> Result<Self> {
        let storage_ref = storage_ref.into();
        if storage_ref.trim().is_empty() {
            return Err(GalleryError::InvalidRequest(
                "storage reference must not be empty".to_string(),
            ));
        }

        Ok(Self {
            storage_ref,
            kind,
            duration_secs: None,
            cloud_url: None,
            size_bytes: None,
            width: None,
            height: None,
        })
    }

    /// Map a media host upload into a record. An explicit `duration` wins over
    /// the one reported by the host; photos never carry one.
    pub fn from_upload(result: &UploadResult, kind: MediaKind, duration: Option<u32>) -> Result<Self> {
        let mut record = Self::new(result.public_id.clone(), kind)?;
        record.cloud_url = Some(result.secure_url.clone());
        record.size_bytes = Some(result.bytes as i64);
        record.width = result.width.map(|w| w as i32);
        record.height = result.height.map(|h| h as i32);

        let reported = result.duration.map(|d| d.round() as u32);
        Ok(record.with_duration(duration.or(reported)))
    }

    /// Attach a duration; dropped for photos.
    pub fn with_duration(mut self, duration_secs: Option<u32>) -> Self {
        self.duration_secs = match self.kind {
            MediaKind::Video => duration_secs.map(|d| d as i32),
            MediaKind::Photo => {
                if duration_secs.is_some() {
                    debug!("Ignoring duration for photo record");
                }
                None
            }
        };
        self
    }

    pub fn storage_ref(&self) -> &str {
        &self.storage_ref
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn duration_secs(&self) -> Option<i32> {
        self.duration_secs
    }

    pub fn cloud_url(&self) -> Option<&str> {
        self.cloud_url.as_deref()
    }
}

/// Query parameters for gallery listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaQuery {
    /// Filter by kind
    pub kind: Option<MediaKind>,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Offset for pagination
    pub offset: Option<i64>,
}

/// Collection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MediaStats {
    pub total_media: i64,
    pub photos: i64,
    pub videos: i64,
    pub total_bytes: i64,
}

/// Relational access to media records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn insert(&self, record: &NewMediaRecord) -> Result<MediaRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<MediaRecord>>;

    /// Newest first.
    async fn list(&self, query: &MediaQuery) -> Result<Vec<MediaRecord>>;

    async fn count(&self, kind: Option<MediaKind>) -> Result<i64>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn stats(&self) -> Result<MediaStats>;

    /// Records still served from legacy storage.
    async fn list_unmigrated(&self) -> Result<Vec<MediaRecord>>;

    /// Migrated records whose legacy blob has not been removed yet.
    async fn list_legacy_leftovers(&self) -> Result<Vec<MediaRecord>>;

    /// Point a legacy record at its media host copy.
    async fn mark_migrated(&self, id: Uuid, result: &UploadResult) -> Result<()>;

    async fn clear_legacy_path(&self, id: Uuid) -> Result<()>;
}

const MEDIA_COLUMNS: &str = "id, storage_ref, media_type, duration_secs, cloud_url, \
                             size_bytes, width, height, legacy_path, created_at";

/// PostgreSQL-backed media repository
pub struct PgMediaRepository {
    pool: PgPool,
}

impl PgMediaRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks and auth)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_records(&self, sql: &str) -> Result<Vec<MediaRecord>> {
        sqlx::query_as::<_, MediaRow>(sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(MediaRecord::try_from)
            .collect()
    }
}

#[async_trait]
impl MediaRepository for PgMediaRepository {
    #[instrument(skip(self, record), fields(storage_ref = %record.storage_ref, kind = %record.kind))]
    async fn insert(&self, record: &NewMediaRecord) -> Result<MediaRecord> {
        let sql = format!(
            r#"
            INSERT INTO media (
                id, storage_ref, media_type, duration_secs, cloud_url,
                size_bytes, width, height, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, NOW()
            )
            RETURNING {MEDIA_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, MediaRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.storage_ref)
            .bind(record.kind.as_str())
            .bind(record.duration_secs)
            .bind(&record.cloud_url)
            .bind(record.size_bytes)
            .bind(record.width)
            .bind(record.height)
            .fetch_one(&self.pool)
            .await?;

        let stored = MediaRecord::try_from(row)?;

        debug!(media_id = %stored.id, "Media record inserted");
        metrics::counter!("gallery.media.indexed").increment(1);

        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaRecord>> {
        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = $1");

        sqlx::query_as::<_, MediaRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(MediaRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, query: &MediaQuery) -> Result<Vec<MediaRecord>> {
        let sql = format!(
            r#"
            SELECT {MEDIA_COLUMNS}
            FROM media
            WHERE ($1::text IS NULL OR media_type = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );

        sqlx::query_as::<_, MediaRow>(&sql)
            .bind(query.kind.map(|k| k.as_str()))
            .bind(query.limit)
            .bind(query.offset.unwrap_or(0))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(MediaRecord::try_from)
            .collect()
    }

    async fn count(&self, kind: Option<MediaKind>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM media WHERE ($1::text IS NULL OR media_type = $1)",
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<MediaStats> {
        let stats = sqlx::query_as::<_, MediaStats>(
            r#"
            SELECT
                COUNT(*) AS total_media,
                COUNT(*) FILTER (WHERE media_type = 'photo') AS photos,
                COUNT(*) FILTER (WHERE media_type = 'video') AS videos,
                COALESCE(SUM(size_bytes), 0)::bigint AS total_bytes
            FROM media
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn list_unmigrated(&self) -> Result<Vec<MediaRecord>> {
        self.fetch_records(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE cloud_url IS NULL ORDER BY created_at ASC"
        ))
        .await
    }

    async fn list_legacy_leftovers(&self) -> Result<Vec<MediaRecord>> {
        self.fetch_records(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media \
             WHERE cloud_url IS NOT NULL AND legacy_path IS NOT NULL \
             ORDER BY created_at ASC"
        ))
        .await
    }

    #[instrument(skip(self, result), fields(public_id = %result.public_id))]
    async fn mark_migrated(&self, id: Uuid, result: &UploadResult) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE media SET
                legacy_path = storage_ref,
                storage_ref = $2,
                cloud_url = $3,
                size_bytes = $4,
                width = $5,
                height = $6
            WHERE id = $1 AND cloud_url IS NULL
            "#,
        )
        .bind(id)
        .bind(&result.public_id)
        .bind(&result.secure_url)
        .bind(result.bytes as i64)
        .bind(result.width.map(|w| w as i32))
        .bind(result.height.map(|h| h as i32))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(GalleryError::NotFound(format!("unmigrated media {id}")));
        }

        Ok(())
    }

    async fn clear_legacy_path(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE media SET legacy_path = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
