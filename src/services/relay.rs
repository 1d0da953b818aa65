use crate::config::RelayConfig;
use crate::services::staging::StagedFile;
use crate::utils::format::format_megabytes;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::ReaderStream;

/// Tag sent in `uploaded_by` so the workflow can tell where a document came from
pub const UPLOADED_BY: &str = "pdf-relay-gateway";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Downstream endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Downstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Staged file {path} could not be read: {source}")]
    StagedFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// One relay attempt: the staged files of a request plus their metadata
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub files: Vec<StagedFile>,
    /// Present for batch uploads only
    pub batch_id: Option<String>,
    pub process_type: String,
    pub client_id: String,
}

impl RelayRequest {
    pub fn single(file: StagedFile, process_type: String, client_id: String) -> Self {
        Self {
            files: vec![file],
            batch_id: None,
            process_type,
            client_id,
        }
    }

    pub fn batch(
        files: Vec<StagedFile>,
        batch_id: String,
        process_type: String,
        client_id: String,
    ) -> Self {
        Self {
            files,
            batch_id: Some(batch_id),
            process_type,
            client_id,
        }
    }

    pub fn is_batch(&self) -> bool {
        self.batch_id.is_some()
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// Status and body exactly as the downstream returned them
#[derive(Debug, Clone)]
pub struct RelayResult {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RelayResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, or as a string when the downstream did not answer JSON
    pub fn json(&self) -> Value {
        if self.body.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

#[async_trait]
pub trait DownstreamRelay: Send + Sync {
    /// Performs exactly one outbound call. Any HTTP status is a result;
    /// only transport failures are errors.
    async fn send(&self, request: &RelayRequest) -> Result<RelayResult, RelayError>;
}

pub struct HttpRelayClient {
    client: reqwest::Client,
    endpoint: String,
    single_timeout: Duration,
    batch_timeout: Duration,
}

impl HttpRelayClient {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        Self::with_timeouts(
            config.downstream_url.clone(),
            config.single_timeout,
            config.batch_timeout,
        )
    }

    pub fn with_timeouts(
        endpoint: impl Into<String>,
        single_timeout: Duration,
        batch_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            single_timeout,
            batch_timeout,
        })
    }

    fn timeout_for(&self, request: &RelayRequest) -> Duration {
        if request.is_batch() {
            self.batch_timeout
        } else {
            self.single_timeout
        }
    }

    async fn build_form(&self, request: &RelayRequest) -> Result<Form, RelayError> {
        let mut form = Form::new();

        match &request.batch_id {
            None => {
                let file = request
                    .files
                    .first()
                    .ok_or_else(|| RelayError::Client("relay request has no file".to_string()))?;
                form = form
                    .part("file", file_part(file).await?)
                    .text("file_name", file.original_name.clone())
                    .text("file_size_mb", format_megabytes(file.size_bytes));
            }
            Some(batch_id) => {
                for (index, file) in request.files.iter().enumerate() {
                    form = form.part(format!("file_{}", index + 1), file_part(file).await?);
                }
                form = form
                    .text("batch_id", batch_id.clone())
                    .text("total_files", request.total_files().to_string())
                    .text("upload_timestamp", Utc::now().to_rfc3339());
            }
        }

        Ok(form
            .text("process_type", request.process_type.clone())
            .text("client_id", request.client_id.clone())
            .text("uploaded_by", UPLOADED_BY))
    }
}

/// Streams the staged file from disk instead of buffering it
async fn file_part(file: &StagedFile) -> Result<Part, RelayError> {
    let staged_file_error = |source| RelayError::StagedFile {
        path: file.path.display().to_string(),
        source,
    };

    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(staged_file_error)?;
    let length = handle.metadata().await.map_err(staged_file_error)?.len();
    let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

    Part::stream_with_length(body, length)
        .file_name(file.original_name.clone())
        .mime_str(mime::APPLICATION_PDF.as_ref())
        .map_err(|e| RelayError::Client(e.to_string()))
}

fn classify(err: reqwest::Error, timeout: Duration) -> RelayError {
    if err.is_connect() {
        RelayError::Unreachable(err.to_string())
    } else if err.is_timeout() {
        RelayError::Timeout(timeout)
    } else if err.is_request() || err.is_body() {
        RelayError::Unreachable(err.to_string())
    } else {
        RelayError::Client(err.to_string())
    }
}

#[async_trait]
impl DownstreamRelay for HttpRelayClient {
    async fn send(&self, request: &RelayRequest) -> Result<RelayResult, RelayError> {
        let timeout = self.timeout_for(request);
        let form = self.build_form(request).await?;

        tracing::info!(
            "📨 Relaying {} file(s) to downstream (batch: {}, timeout: {:?})",
            request.total_files(),
            request.batch_id.as_deref().unwrap_or("-"),
            timeout
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        tracing::info!("📬 Downstream answered {} ({} bytes)", status, body.len());

        Ok(RelayResult {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: u16, body: &'static [u8]) -> RelayResult {
        RelayResult {
            status,
            content_type: None,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_success_range() {
        assert!(result(200, b"").is_success());
        assert!(result(204, b"").is_success());
        assert!(!result(302, b"").is_success());
        assert!(!result(422, b"").is_success());
        assert!(!result(500, b"").is_success());
    }

    #[test]
    fn test_json_body_fallbacks() {
        assert_eq!(result(200, br#"{"jobId":"abc"}"#).json()["jobId"], "abc");
        assert_eq!(result(500, b"Workflow crashed").json(), Value::String("Workflow crashed".into()));
        assert_eq!(result(200, b"").json(), Value::Null);
    }

    #[test]
    fn test_request_shape() {
        let file = StagedFile {
            generated_name: "1-000000001-a.pdf".to_string(),
            original_name: "a.pdf".to_string(),
            path: "uploads/1-000000001-a.pdf".into(),
            size_bytes: 10,
            created_at: Utc::now(),
        };

        let single = RelayRequest::single(file.clone(), "GG".into(), "ACME".into());
        assert!(!single.is_batch());
        assert_eq!(single.total_files(), 1);

        let batch = RelayRequest::batch(vec![file.clone(), file], "b-1".into(), "GG".into(), "ACME".into());
        assert!(batch.is_batch());
        assert_eq!(batch.total_files(), 2);
    }
}
