//! Wedding Album Gallery Service
//!
//! Collects guest photos and videos for the wedding album. Guests upload media
//! over HTTP; the service validates it, pushes it to the hosted media service,
//! and indexes it in PostgreSQL. The gallery listing, a live change feed and a
//! small admin surface are served from the same API.
//!
//! ## Features
//!
//! - **Upload orchestration**: type check, local preview, remote upload, then
//!   metadata insert, strictly in that order
//! - **Media host client**: multipart uploads and transformation-aware
//!   delivery URLs
//! - **Single-admin auth**: argon2 credentials and bearer sessions
//! - **Change feed**: PostgreSQL `LISTEN/NOTIFY` republished as server-sent
//!   events
//! - **Legacy migration**: moves pre-media-host uploads out of S3
//!
//! ## Architecture
//!
//! ```text
//! Guest / Capture            Media Host                PostgreSQL
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │ POST         │          │ image/upload │          │ media        │
//! │ /uploads     │          │ video/upload │          │ admins       │
//! └──────────────┘          └──────────────┘          └──────────────┘
//!        │                         ▲                    │        ▲
//!        ▼                         │                    │ NOTIFY │
//! ┌──────────────┐                 │                    ▼        │
//! │ Upload       │─────────────────┘             ┌──────────────┐│
//! │ Orchestrator │──────────────────────────────▶│ Metadata     ││
//! └──────────────┘                               │ Store        │┘
//!                                                └──────────────┘
//!                                                       │
//!                                                       ▼
//!                                                ┌──────────────┐
//!                                                │ Gallery API  │
//!                                                │ + SSE feed   │
//!                                                └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod change_feed;
pub mod config;
pub mod error;
pub mod media_host;
pub mod metadata_store;
pub mod migrate;
pub mod orchestrator;
pub mod telemetry;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AdminAccount, AdminAuth, AdminClaim, AdminSession, PgAdminStore};
pub use blob_store::{BlobStore, S3BlobStore};
pub use change_feed::{ChangeFeed, ChangeOp, MediaChange};
pub use config::Config;
pub use error::{GalleryError, Result};
pub use media_host::{CloudMediaHost, DeliveryUrls, MediaFile, MediaHost, Transformation, UploadResult};
pub use metadata_store::{MediaKind, MediaQuery, MediaRecord, MediaRepository, MediaStats, PgMediaRepository};
pub use migrate::{LegacyMigrator, MigrationReport};
pub use orchestrator::{Preview, Submission, UploadOrchestrator, UploadPhase, UploadProgress};
