use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Media host (upload API) configuration
    #[serde(default)]
    pub media_host: MediaHostConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Legacy blob storage configuration
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Admin auth configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Media host configuration.
///
/// `cloud_name` and `upload_preset` are required for uploads but optional for
/// booting: a gallery without upload credentials still serves the listing.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaHostConfig {
    /// Account (cloud) name
    pub cloud_name: Option<String>,
    /// Unsigned upload preset name
    pub upload_preset: Option<String>,
    /// API key (needed for signed destroy requests)
    pub api_key: Option<String>,
    /// API secret (needed for signed destroy requests)
    pub api_secret: Option<String>,
    /// Upload API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Delivery base URL
    #[serde(default = "default_delivery_base")]
    pub delivery_base: String,
    /// Folder uploads are placed in
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Tags attached to every upload (the media kind is appended)
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Legacy S3-compatible blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    /// Bucket holding pre-migration uploads
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Public base URL objects are served from; `{base}/{path}`
    pub public_base_url: Option<String>,
}

/// API configuration for the gallery endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Admin session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_base() -> String {
    "https://api.cloudinary.com".to_string()
}

fn default_delivery_base() -> String {
    "https://res.cloudinary.com".to_string()
}

fn default_folder() -> String {
    "wedding-photos".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["wedding".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_bucket() -> String {
    "wedding-photos".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024 // 200MB, a minute of phone video
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 3600
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "gallery-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/wedding-album/gallery").required(false))
            // GALLERY__MEDIA_HOST__CLOUD_NAME -> media_host.cloud_name
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("media_host.tags")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get admin session lifetime as Duration
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.session_ttl_secs)
    }
}

impl DatabaseConfig {
    /// Get pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl MediaHostConfig {
    /// Both required upload credentials are present and non-empty.
    pub fn is_configured(&self) -> bool {
        non_empty(&self.cloud_name).is_some() && non_empty(&self.upload_preset).is_some()
    }

    /// Account name, if set.
    pub fn cloud_name(&self) -> Option<&str> {
        non_empty(&self.cloud_name)
    }

    /// Upload preset, if set.
    pub fn upload_preset(&self) -> Option<&str> {
        non_empty(&self.upload_preset)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for MediaHostConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            upload_preset: None,
            api_key: None,
            api_secret: None,
            api_base: default_api_base(),
            delivery_base: default_delivery_base(),
            folder: default_folder(),
            tags: default_tags(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_folder(), "wedding-photos");
        assert_eq!(default_tags(), vec!["wedding".to_string()]);
        assert_eq!(default_api_base(), "https://api.cloudinary.com");
        assert_eq!(default_delivery_base(), "https://res.cloudinary.com");
    }

    #[test]
    fn test_media_host_requires_name_and_preset() {
        let mut media_host = MediaHostConfig {
            cloud_name: Some("demo".to_string()),
            ..Default::default()
        };
        assert!(!media_host.is_configured());

        media_host.upload_preset = Some("   ".to_string());
        assert!(!media_host.is_configured());

        media_host.upload_preset = Some("guests".to_string());
        assert!(media_host.is_configured());
        assert_eq!(media_host.cloud_name(), Some("demo"));
    }

    #[test]
    fn test_database_timeouts() {
        let database = DatabaseConfig {
            url: "postgres://localhost/wedding".to_string(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: 7,
            idle_timeout_secs: 300,
            run_migrations: true,
        };
        assert_eq!(database.connect_timeout(), Duration::from_secs(7));
        assert_eq!(database.idle_timeout(), Duration::from_secs(300));
    }
}
