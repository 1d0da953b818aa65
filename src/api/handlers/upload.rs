use crate::AppState;
use crate::api::error::AppError;
use crate::services::relay::{RelayRequest, RelayResult};
use crate::services::staging::{StagedFile, StagingStore};
use crate::utils::format::{format_megabytes, format_seconds};
use crate::utils::validation::FALLBACK_FILENAME;
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart body of `POST /api/upload`
#[derive(ToSchema)]
pub struct SingleUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    #[schema(example = "GG")]
    pub process_type: Option<String>,
    #[schema(example = "INTELEC_SL")]
    pub client_id: Option<String>,
}

/// Multipart body of `POST /api/upload-batch`
#[derive(ToSchema)]
pub struct BatchUploadForm {
    #[schema(value_type = Vec<String>)]
    pub files: Vec<Vec<u8>>,
    pub batch_id: Option<String>,
    pub process_type: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SingleUploadResponse {
    pub success: bool,
    pub message: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: String,
    pub processing_time: String,
    pub job_id: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadResponse {
    pub success: bool,
    pub message: String,
    pub batch_id: String,
    pub total_files: usize,
    pub processing_time: String,
    #[schema(value_type = Object)]
    pub result: Value,
}

/// Optional text fields shared by both upload forms
#[derive(Default)]
struct RelayFields {
    process_type: Option<String>,
    client_id: Option<String>,
    batch_id: Option<String>,
}

impl RelayFields {
    /// Records a known text field; unknown fields are skipped
    async fn absorb(&mut self, name: &str, field: Field<'_>) -> Result<(), AppError> {
        let slot = match name {
            "process_type" => &mut self.process_type,
            "client_id" => &mut self.client_id,
            "batch_id" => &mut self.batch_id,
            _ => return Ok(()),
        };

        let text = field.text().await?;
        let text = text.trim();
        if !text.is_empty() {
            *slot = Some(text.to_string());
        }
        Ok(())
    }

    fn process_type(&mut self, state: &AppState) -> String {
        self.process_type
            .take()
            .unwrap_or_else(|| state.config.default_process_type.clone())
    }

    fn client_id(&mut self, state: &AppState) -> String {
        self.client_id
            .take()
            .unwrap_or_else(|| state.config.default_client_id.clone())
    }
}

#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = SingleUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File relayed for processing", body = SingleUploadResponse),
        (status = 400, description = "No file provided"),
        (status = 413, description = "File too large"),
        (status = 415, description = "File is not a PDF"),
        (status = 500, description = "Downstream unreachable or staging failure")
    ),
    tag = "upload"
)]
pub async fn upload_single(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SingleUploadResponse>, AppError> {
    let started = Instant::now();
    let mut staged = Vec::new();

    let outcome = relay_single(&state, multipart, &mut staged, started).await;
    state.staging.discard_all(&staged).await;

    outcome.map(Json)
}

async fn relay_single(
    state: &AppState,
    mut multipart: Multipart,
    staged: &mut Vec<StagedFile>,
    started: Instant,
) -> Result<SingleUploadResponse, AppError> {
    let mut fields = RelayFields::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            if !staged.is_empty() {
                return Err(AppError::BadRequest(
                    "Only one file is accepted here; use /api/upload-batch for several".to_string(),
                ));
            }
            staged.push(stage_field(&state.staging, field).await?);
        } else {
            fields.absorb(&name, field).await?;
        }
    }

    let file = staged.first().cloned().ok_or(AppError::NoFileProvided)?;
    let process_type = fields.process_type(state);
    let client_id = fields.client_id(state);

    tracing::info!(
        "📄 Received {} ({} MB) process_type={} client_id={}",
        file.original_name,
        format_megabytes(file.size_bytes),
        process_type,
        client_id
    );

    let request = RelayRequest::single(file.clone(), process_type, client_id);
    let result = state.relay.send(&request).await?;
    let processing_time = format_seconds(started.elapsed());

    let details = ensure_accepted(result, "Downstream workflow rejected the file")?;
    let job_id = job_id_of(&details).unwrap_or_else(|| format!("job_{}", Utc::now().timestamp_millis()));

    tracing::info!(
        "✅ {} relayed in {}s (job {})",
        file.original_name,
        processing_time,
        job_id
    );

    Ok(SingleUploadResponse {
        success: true,
        message: "File sent for processing".to_string(),
        file_name: file.original_name,
        file_size: file.size_bytes,
        file_size_mb: format_megabytes(file.size_bytes),
        processing_time,
        job_id,
    })
}

#[utoipa::path(
    post,
    path = "/api/upload-batch",
    request_body(content = BatchUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Batch relayed for processing", body = BatchUploadResponse),
        (status = 400, description = "No files or too many files"),
        (status = 413, description = "A file is too large"),
        (status = 415, description = "A file is not a PDF"),
        (status = 500, description = "Downstream unreachable or staging failure")
    ),
    tag = "upload"
)]
pub async fn upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, AppError> {
    let started = Instant::now();
    let mut staged = Vec::new();

    let outcome = relay_batch(&state, multipart, &mut staged, started).await;
    state.staging.discard_all(&staged).await;

    outcome.map(Json)
}

async fn relay_batch(
    state: &AppState,
    mut multipart: Multipart,
    staged: &mut Vec<StagedFile>,
    started: Instant,
) -> Result<BatchUploadResponse, AppError> {
    let max_files = state.config.max_batch_files;
    let mut fields = RelayFields::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "files" {
            if staged.len() >= max_files {
                return Err(AppError::TooManyFiles(max_files));
            }
            staged.push(stage_field(&state.staging, field).await?);
        } else {
            fields.absorb(&name, field).await?;
        }
    }

    if staged.is_empty() {
        return Err(AppError::NoFilesProvided);
    }

    let batch_id = fields
        .batch_id
        .take()
        .unwrap_or_else(|| format!("batch_{}", Utc::now().timestamp_millis()));
    let process_type = fields.process_type(state);
    let client_id = fields.client_id(state);
    let total_files = staged.len();

    tracing::info!(
        "📦 Received batch {} with {} file(s) process_type={} client_id={}",
        batch_id,
        total_files,
        process_type,
        client_id
    );

    let request = RelayRequest::batch(staged.clone(), batch_id.clone(), process_type, client_id);
    let result = state.relay.send(&request).await?;
    let processing_time = format_seconds(started.elapsed());

    let details = ensure_accepted(result, "Downstream workflow rejected the batch")?;

    tracing::info!(
        "✅ Batch {} ({} files) relayed in {}s",
        batch_id,
        total_files,
        processing_time
    );

    Ok(BatchUploadResponse {
        success: true,
        message: format!("{} files sent for processing", total_files),
        batch_id,
        total_files,
        processing_time,
        result: details,
    })
}

async fn stage_field(staging: &StagingStore, field: Field<'_>) -> Result<StagedFile, AppError> {
    let original_name = field.file_name().unwrap_or(FALLBACK_FILENAME).to_string();
    let content_type = field.content_type().map(|s| s.to_string());

    let body_with_io_error = field.map_err(std::io::Error::other);
    let reader = StreamReader::new(body_with_io_error);

    Ok(staging
        .accept(&original_name, content_type.as_deref(), reader)
        .await?)
}

/// Passes a 2xx body through; anything else becomes the forwarded rejection
fn ensure_accepted(result: RelayResult, message: &str) -> Result<Value, AppError> {
    let details = result.json();
    if result.is_success() {
        Ok(details)
    } else {
        Err(AppError::DownstreamRejected {
            status: result.status,
            message: message.to_string(),
            details,
        })
    }
}

fn job_id_of(body: &Value) -> Option<String> {
    ["jobId", "job_id", "executionId"]
        .iter()
        .find_map(|key| match body.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_job_id_of() {
        assert_eq!(job_id_of(&json!({ "jobId": "abc" })), Some("abc".to_string()));
        assert_eq!(job_id_of(&json!({ "job_id": "def" })), Some("def".to_string()));
        assert_eq!(job_id_of(&json!({ "executionId": 812 })), Some("812".to_string()));
        assert_eq!(job_id_of(&json!({ "jobId": "" })), None);
        assert_eq!(job_id_of(&json!("accepted")), None);
        assert_eq!(job_id_of(&Value::Null), None);
    }

    #[test]
    fn test_ensure_accepted_forwards_rejection() {
        let rejected = RelayResult {
            status: 503,
            content_type: Some("application/json".into()),
            body: Bytes::from_static(br#"{"message":"workflow inactive"}"#),
        };

        match ensure_accepted(rejected, "rejected") {
            Err(AppError::DownstreamRejected {
                status, details, ..
            }) => {
                assert_eq!(status, 503);
                assert_eq!(details["message"], "workflow inactive");
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }
}
