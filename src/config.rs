use crate::batch::{BatchStrategy, OrphanPolicy};
use std::{env, net::SocketAddr, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
    #[error(transparent)]
    DotEnvError(#[from] dotenvy::Error),
}

/// Static credentials for the object store. Without them the default AWS
/// provider chain is used.
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)] // Clone needed if passed around, Debug for logging
pub struct Config {
    pub bind_address: SocketAddr,
    pub media_bucket_name: String,
    pub database_url: String,
    // Store region as string for simplicity here, aws_clients can convert
    pub aws_region: String,
    // Optional endpoint for LocalStack / MinIO
    pub object_store_endpoint: Option<String>,
    pub credentials: Option<StaticCredentials>,
    pub batch_strategy: BatchStrategy,
    pub orphan_policy: OrphanPolicy,
    pub max_upload_bytes: usize,
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

impl Config {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors, relies on env vars otherwise)
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| lookup(name).ok_or_else(|| ConfigError::MissingVar(name.into()));

        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("BIND_ADDRESS".into(), e.to_string()))?;

        let media_bucket_name = required("BUCKET_NAME")?;
        let database_url = required("DATABASE_URL")?;

        let aws_region = lookup("AWS_DEFAULT_REGION").unwrap_or_else(|| "us-west-2".to_string());

        // Allow overriding endpoint for localstack/testing
        let object_store_endpoint = lookup("AWS_ENDPOINT_URL"); // Optional

        let credentials = match (lookup("AWS_ID"), lookup("AWS_SECRET")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingVar("AWS_SECRET".into())),
            (None, Some(_)) => return Err(ConfigError::MissingVar("AWS_ID".into())),
        };

        let batch_strategy = match lookup("MEDIA_BATCH_CONCURRENCY") {
            Some(raw) => {
                let limit = raw
                    .parse::<usize>()
                    .map_err(|e| ConfigError::InvalidVar("MEDIA_BATCH_CONCURRENCY".into(), e.to_string()))?;
                BatchStrategy::from_concurrency(limit)
            }
            None => BatchStrategy::Sequential,
        };

        let orphan_policy = match lookup("MEDIA_ORPHAN_POLICY").as_deref() {
            None | Some("delete") => OrphanPolicy::Delete,
            Some("retain") => OrphanPolicy::Retain,
            Some(other) => {
                return Err(ConfigError::InvalidVar(
                    "MEDIA_ORPHAN_POLICY".into(),
                    format!("expected `delete` or `retain`, got `{}`", other),
                ))
            }
        };

        let max_upload_bytes = match lookup("MEDIA_MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidVar("MEDIA_MAX_UPLOAD_BYTES".into(), e.to_string()))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Config {
            bind_address,
            media_bucket_name,
            database_url,
            aws_region,
            object_store_endpoint,
            credentials,
            batch_strategy,
            orphan_policy,
            max_upload_bytes,
        })
    }
}
