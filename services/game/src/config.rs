//! Service configuration
//!
//! Read once at start-up from environment variables through the `config`
//! crate, then validated into [`AppConfig`]. Database settings live in
//! [`common::database::DatabaseConfig`].

use axum_extra::extract::cookie::Key;
use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Minimum length of the cookie signing secret in bytes.
pub const MIN_SESSION_SECRET_LENGTH: usize = 32;

/// Configuration errors. Any of them stops the service before it binds.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Misconfiguration: {0}")]
    MisConfiguration(String),

    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    Development,
    Production,
}

/// Object storage settings for uploaded photos.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    base_url: String,
    port: u16,
    environment: String,
    session_secret: Option<String>,
    admin_username: Option<String>,
    admin_password: Option<String>,
    s3_endpoint: Option<String>,
    s3_region: String,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    s3_bucket: String,
}

/// Validated service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub port: u16,
    pub environment: RuntimeEnvironment,
    pub session_secret: Option<String>,
    pub admin_username: String,
    pub admin_password: String,
    pub storage: StorageConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load the configuration from environment variables
    ///
    /// # Environment Variables
    /// - `BASE_URL`: Public URL used in QR codes and invitation links (default: http://localhost:8080)
    /// - `PORT`: Listen port (default: 8080)
    /// - `ENVIRONMENT`: `development` or `production` (default: development)
    /// - `SESSION_SECRET`: Cookie signing secret, at least 32 bytes (required in production)
    /// - `ADMIN_USERNAME` / `ADMIN_PASSWORD`: Basic auth credentials of the admin API (required)
    /// - `S3_ENDPOINT`: Custom S3 endpoint, e.g. MinIO (optional)
    /// - `S3_REGION`: Bucket region (default: us-east-1)
    /// - `S3_ACCESS_KEY` / `S3_SECRET_KEY`: Static storage credentials (optional)
    /// - `S3_BUCKET`: Bucket for uploaded photos (default: id100-images)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    /// Load the configuration from an explicit environment source.
    pub fn from_source(source: Environment) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .set_default("base_url", "http://localhost:8080")?
            .set_default("port", 8080)?
            .set_default("environment", "development")?
            .set_default("s3_region", "us-east-1")?
            .set_default("s3_bucket", "id100-images")?
            .add_source(source)
            .build()?
            .try_deserialize()?;

        let environment = match raw.environment.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => RuntimeEnvironment::Production,
            _ => RuntimeEnvironment::Development,
        };

        let session_secret = non_empty(raw.session_secret);
        match &session_secret {
            Some(secret) if secret.len() < MIN_SESSION_SECRET_LENGTH => {
                return Err(ConfigError::MisConfiguration(format!(
                    "SESSION_SECRET must be at least {} bytes",
                    MIN_SESSION_SECRET_LENGTH
                )));
            }
            None if environment == RuntimeEnvironment::Production => {
                return Err(ConfigError::MisConfiguration(
                    "SESSION_SECRET must be set in production".to_string(),
                ));
            }
            _ => {}
        }

        let admin_username = non_empty(raw.admin_username).ok_or_else(|| {
            ConfigError::MisConfiguration("ADMIN_USERNAME must be set".to_string())
        })?;
        let admin_password = non_empty(raw.admin_password).ok_or_else(|| {
            ConfigError::MisConfiguration("ADMIN_PASSWORD must be set".to_string())
        })?;

        Ok(Self {
            base_url: raw.base_url.trim_end_matches('/').to_string(),
            port: raw.port,
            environment,
            session_secret,
            admin_username,
            admin_password,
            storage: StorageConfig {
                endpoint: non_empty(raw.s3_endpoint),
                region: raw.s3_region,
                access_key: non_empty(raw.s3_access_key),
                secret_key: non_empty(raw.s3_secret_key),
                bucket: raw.s3_bucket,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == RuntimeEnvironment::Production
    }

    /// Key used to sign the session cookie.
    ///
    /// Derived from `SESSION_SECRET`; without one (development only) a
    /// random key is generated and every restart logs all browsers out.
    pub fn cookie_key(&self) -> Key {
        match &self.session_secret {
            Some(secret) => Key::derive_from(secret.as_bytes()),
            None => {
                warn!("SESSION_SECRET not set, using a random cookie key for this process");
                Key::generate()
            }
        }
    }
}
