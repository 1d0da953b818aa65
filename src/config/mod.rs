use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DOWNSTREAM_URL_VAR: &str = "DOWNSTREAM_WEBHOOK_URL";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DOWNSTREAM_WEBHOOK_URL must be set")]
    MissingDownstreamUrl,

    #[error("DOWNSTREAM_WEBHOOK_URL is not a valid http(s) URL: {0}")]
    InvalidDownstreamUrl(String),
}

/// Relay configuration, built once at startup and shared through `AppState`
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Downstream workflow endpoint receiving the multipart payloads (required)
    pub downstream_url: String,

    /// Listening port (default: 3000)
    pub port: u16,

    /// Maximum size of a single PDF in bytes (default: 80 MB)
    pub max_file_size: u64,

    /// Maximum number of files in one batch (default: 10)
    pub max_batch_files: usize,

    /// Staging directory (default: "uploads")
    pub upload_dir: PathBuf,

    /// Deployment environment label reported by /stats (default: "development")
    pub environment: String,

    /// Age after which the sweeper evicts a staged file
    pub staging_ttl: Duration,

    /// Period of the sweeper
    pub sweep_interval: Duration,

    /// Relay timeout for single-file uploads
    pub single_timeout: Duration,

    /// Relay timeout for batches
    pub batch_timeout: Duration,

    /// Default `process_type` form value (default: "GG")
    pub default_process_type: String,

    /// Default `client_id` form value (default: "INTELEC_SL")
    pub default_client_id: String,
}

impl RelayConfig {
    /// Config with every default applied around the given downstream URL
    pub fn new(downstream_url: impl Into<String>) -> Self {
        Self {
            downstream_url: downstream_url.into(),
            port: 3000,
            max_file_size: 80 * 1024 * 1024, // 80 MB
            max_batch_files: 10,
            upload_dir: PathBuf::from("uploads"),
            environment: "development".to_string(),
            staging_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
            single_timeout: Duration::from_secs(120),
            batch_timeout: Duration::from_secs(600),
            default_process_type: "GG".to_string(),
            default_client_id: "INTELEC_SL".to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let downstream_url = lookup(DOWNSTREAM_URL_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingDownstreamUrl)?;
        validate_downstream_url(&downstream_url)?;

        let default = Self::new(downstream_url);

        Ok(Self {
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            max_file_size: lookup("MAX_FILE_SIZE_MB")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|mb| *mb > 0)
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(default.max_file_size),

            max_batch_files: lookup("MAX_BATCH_FILES")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.max_batch_files),

            upload_dir: lookup("UPLOAD_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir.clone()),

            environment: lookup("APP_ENV").unwrap_or(default.environment.clone()),

            default_process_type: lookup("DEFAULT_PROCESS_TYPE")
                .unwrap_or(default.default_process_type.clone()),

            default_client_id: lookup("DEFAULT_CLIENT_ID")
                .unwrap_or(default.default_client_id.clone()),

            ..default
        })
    }

    /// Maximum file size expressed in whole megabytes
    pub fn max_file_size_mb(&self) -> u64 {
        self.max_file_size / 1024 / 1024
    }

    /// Downstream endpoint safe to expose: credentials, query and path are hidden
    pub fn redacted_endpoint(&self) -> String {
        let Ok(url) = Url::parse(&self.downstream_url) else {
            return "***".to_string();
        };

        let host = url.host_str().unwrap_or("unknown");
        let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = if url.path().len() > 1 { "/***" } else { "" };

        format!("{}://{}{}{}", url.scheme(), host, port, path)
    }
}

fn validate_downstream_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidDownstreamUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidDownstreamUrl(format!(
            "unsupported scheme '{}'",
            other
        ))),
    }
}
