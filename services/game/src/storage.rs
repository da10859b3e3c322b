//! Contribution storage
//!
//! Photos are written to S3-compatible object storage and indexed in the
//! `contributions` table. The upload handler only sees [`ContributionSink`].

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials, primitives::ByteStream};
use common::credentials::generate_secure_token;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StorageConfig;

/// A photo waiting to be stored.
#[derive(Debug, Clone)]
pub struct NewContribution {
    pub token_id: i64,
    pub session_number: i32,
    pub player_name: String,
    pub derive_number: i32,
    pub comment: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Errors raised while storing contributions
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object storage error: {0}")]
    ObjectStore(String),

    #[error("Contribution {0} not found")]
    NotFound(i64),

    #[error("Failed to generate object key: {0}")]
    Key(#[from] common::error::CredentialError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Destination of uploaded photos.
#[async_trait]
pub trait ContributionSink: Send + Sync {
    /// Persist a contribution and return its id.
    async fn store(&self, contribution: NewContribution) -> Result<i64, StorageError>;

    /// Remove a contribution whose upload was rejected after storing.
    async fn discard(&self, id: i64) -> Result<(), StorageError>;
}

/// Build an S3 client from the storage settings.
///
/// A custom endpoint switches to path-style addressing, which MinIO and
/// most self-hosted S3 implementations need.
pub async fn s3_client(config: &StorageConfig) -> Client {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "id100-static",
        ));
    }

    let sdk_config = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    Client::from_conf(builder.build())
}

/// Stores photos in an S3 bucket and indexes them in PostgreSQL.
#[derive(Clone)]
pub struct S3ContributionSink {
    client: Client,
    bucket: String,
    pool: PgPool,
}

impl S3ContributionSink {
    pub fn new(client: Client, bucket: String, pool: PgPool) -> Self {
        Self {
            client,
            bucket,
            pool,
        }
    }

    fn object_key(contribution: &NewContribution) -> Result<String, StorageError> {
        let suffix = generate_secure_token(16)?;
        let extension = contribution
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5)
            .unwrap_or_else(|| "jpg".to_string());

        Ok(format!(
            "contributions/{}/{}/{}-{}.{}",
            contribution.token_id,
            contribution.session_number,
            contribution.derive_number,
            suffix,
            extension
        ))
    }
}

#[async_trait]
impl ContributionSink for S3ContributionSink {
    async fn store(&self, contribution: NewContribution) -> Result<i64, StorageError> {
        let key = Self::object_key(&contribution)?;
        let size = contribution.bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&contribution.content_type)
            .body(ByteStream::from(contribution.bytes))
            .send()
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO contributions (token_id, session_number, player_name, derive_number, comment, s3_key, content_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(contribution.token_id)
        .bind(contribution.session_number)
        .bind(&contribution.player_name)
        .bind(contribution.derive_number)
        .bind(&contribution.comment)
        .bind(&key)
        .bind(&contribution.content_type)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => {
                let id: i64 = row.get("id");
                info!("Stored contribution {} ({} bytes) at {}", id, size, key);
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                {
                    warn!("Failed to remove orphaned object {}: {}", key, cleanup);
                }
                Err(e.into())
            }
        }
    }

    async fn discard(&self, id: i64) -> Result<(), StorageError> {
        let row = sqlx::query("DELETE FROM contributions WHERE id = $1 RETURNING s3_key")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound(id))?;

        let key: String = row.get("s3_key");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

        info!("Discarded contribution {}", id);
        Ok(())
    }
}
