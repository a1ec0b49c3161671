//! Admin authentication.
//!
//! There is exactly one administrator. Sign-up is open until that account
//! exists and refused afterwards. Sessions are opaque bearer tokens; only their
//! SHA-256 digest is stored.

use crate::api::{error_response, ApiError};
use crate::error::{GalleryError, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// The administrator account, without credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AdminAccount {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Account plus stored argon2 hash, for verification only
#[derive(Debug, Clone, FromRow)]
pub struct AdminCredentials {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AdminCredentials {
    fn account(&self) -> AdminAccount {
        AdminAccount {
            id: self.id,
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

/// A freshly issued session
#[derive(Debug, Clone, Serialize)]
pub struct AdminSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub admin: AdminAccount,
}

/// Resolved admin role for one request.
///
/// Privileged handlers take this as an argument; holding one means the bearer
/// token was valid when the request arrived.
#[derive(Debug, Clone)]
pub struct AdminClaim {
    pub admin: AdminAccount,
    token: String,
}

impl AdminClaim {
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Storage for the admin account and its sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn count_admins(&self) -> Result<i64>;

    /// Insert the admin. A second account fails with `AdminExists`.
    async fn insert_admin(&self, id: Uuid, email: &str, password_hash: &str) -> Result<AdminAccount>;

    async fn find_credentials(&self, email: &str) -> Result<Option<AdminCredentials>>;

    async fn insert_session(&self, token_hash: &str, admin_id: Uuid, expires_at: DateTime<Utc>) -> Result<()>;

    /// Returns whether a session was removed
    async fn delete_session(&self, token_hash: &str) -> Result<bool>;

    /// Admin owning an unexpired session
    async fn find_session(&self, token_hash: &str) -> Result<Option<AdminAccount>>;

    /// Drop sessions past their expiry; returns how many were removed
    async fn delete_expired_sessions(&self) -> Result<u64>;
}

/// PostgreSQL-backed admin store
pub struct PgAdminStore {
    pool: PgPool,
}

impl PgAdminStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminStore for PgAdminStore {
    async fn count_admins(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admins")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn insert_admin(&self, id: Uuid, email: &str, password_hash: &str) -> Result<AdminAccount> {
        sqlx::query_as::<_, AdminAccount>(
            r#"
            INSERT INTO admins (id, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, created_at
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => GalleryError::AdminExists,
            other => GalleryError::Database(other),
        })
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<AdminCredentials>> {
        let credentials = sqlx::query_as::<_, AdminCredentials>(
            "SELECT id, email, password_hash, created_at FROM admins WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn insert_session(&self, token_hash: &str, admin_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO admin_sessions (token_hash, admin_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token_hash)
            .bind(admin_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<AdminAccount>> {
        let account = sqlx::query_as::<_, AdminAccount>(
            r#"
            SELECT a.id, a.email, a.created_at
            FROM admin_sessions s
            JOIN admins a ON a.id = s.admin_id
            WHERE s.token_hash = $1 AND s.expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn delete_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Sign-up, sign-in and session resolution for the single admin
pub struct AdminAuth {
    store: Arc<dyn AdminStore>,
    session_ttl: Duration,
}

impl AdminAuth {
    pub fn new(store: Arc<dyn AdminStore>, session_ttl: Duration) -> Self {
        Self { store, session_ttl }
    }

    /// Create the administrator and open a session for it.
    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AdminSession> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(GalleryError::InvalidRequest("password must not be empty".to_string()));
        }

        if self.store.count_admins().await? > 0 {
            warn!("Sign-up refused: administrator already exists");
            return Err(GalleryError::AdminExists);
        }

        let password_hash = hash_password(password)?;
        let admin = self
            .store
            .insert_admin(Uuid::new_v4(), &email, &password_hash)
            .await?;

        info!(admin_id = %admin.id, "Administrator account created");
        self.open_session(admin).await
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AdminSession> {
        let email = normalize_email(email).map_err(|_| GalleryError::Unauthorized)?;

        let credentials = self
            .store
            .find_credentials(&email)
            .await?
            .ok_or(GalleryError::Unauthorized)?;

        if !verify_password(password, &credentials.password_hash) {
            warn!("Sign-in rejected");
            return Err(GalleryError::Unauthorized);
        }

        self.open_session(credentials.account()).await
    }

    #[instrument(skip_all)]
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        if self.store.delete_session(&token_digest(token)).await? {
            info!("Admin session ended");
        }
        Ok(())
    }

    /// Resolve a bearer token to the admin claim.
    pub async fn current_admin(&self, token: &str) -> Result<AdminClaim> {
        let admin = self
            .store
            .find_session(&token_digest(token))
            .await?
            .ok_or(GalleryError::Unauthorized)?;

        Ok(AdminClaim {
            admin,
            token: token.to_string(),
        })
    }

    async fn open_session(&self, admin: AdminAccount) -> Result<AdminSession> {
        let token = new_token();
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| GalleryError::InvalidRequest(format!("session ttl out of range: {e}")))?;
        let expires_at = Utc::now() + ttl;

        match self.store.delete_expired_sessions().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Expired admin sessions removed"),
            Err(e) => warn!(error = %e, "Failed to remove expired admin sessions"),
        }

        self.store
            .insert_session(&token_digest(&token), admin.id, expires_at)
            .await?;

        Ok(AdminSession {
            token,
            expires_at,
            admin,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminClaim
where
    Arc<AdminAuth>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| error_response(GalleryError::Unauthorized))?;
        let auth = Arc::<AdminAuth>::from_ref(state);
        auth.current_admin(token).await.map_err(error_response)
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(GalleryError::InvalidRequest("a valid email is required".to_string()));
    }
    Ok(email)
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hashed = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GalleryError::InvalidRequest(format!("failed to hash password: {e}")))?
        .to_string();
    Ok(hashed)
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Invalid stored password hash");
            false
        }
    }
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
