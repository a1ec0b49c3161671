//! Error taxonomy for the gallery service.

use thiserror::Error;

/// Errors surfaced by uploads, persistence and the admin surface.
///
/// None of these are retried automatically. Each one is reported once and the
/// caller decides whether to re-attempt.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// Media host credentials are missing.
    #[error("media host is not configured: {0}")]
    Configuration(String),

    /// Declared type is neither `image/*` nor `video/*`.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The media host answered with a non-success status.
    #[error("upload failed: {status} - {body}")]
    Transport { status: u16, body: String },

    /// The request to the media host never produced a response.
    #[error("media host request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Metadata write failed after the remote upload succeeded.
    #[error("failed to persist media metadata for {public_id}: {source}")]
    Persistence {
        public_id: String,
        #[source]
        source: Box<GalleryError>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob store error: {0}")]
    BlobStore(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Only one administrator account may exist.
    #[error("an administrator account already exists")]
    AdminExists,

    /// An upload is already in flight on this progress handle.
    #[error("an upload is already in progress")]
    Busy,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GalleryError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GalleryError::Configuration(_) => "NOT_CONFIGURED",
            GalleryError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            GalleryError::Transport { .. } | GalleryError::Http(_) => "UPLOAD_FAILED",
            GalleryError::Persistence { .. } => "PERSISTENCE_ERROR",
            GalleryError::Database(_) => "QUERY_ERROR",
            GalleryError::BlobStore(_) => "BLOB_STORE_ERROR",
            GalleryError::NotFound(_) => "NOT_FOUND",
            GalleryError::Unauthorized => "UNAUTHORIZED",
            GalleryError::AdminExists => "ADMIN_EXISTS",
            GalleryError::Busy => "BUSY",
            GalleryError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

pub type Result<T, E = GalleryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_includes_status_and_body() {
        let err = GalleryError::Transport {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "upload failed: 500 - boom");
        assert_eq!(err.code(), "UPLOAD_FAILED");
    }

    #[test]
    fn test_persistence_wraps_source() {
        let err = GalleryError::Persistence {
            public_id: "wedding-photos/abc".to_string(),
            source: Box::new(GalleryError::BlobStore("down".to_string())),
        };
        assert!(err.to_string().contains("wedding-photos/abc"));
        assert!(err.to_string().contains("down"));
    }
}
