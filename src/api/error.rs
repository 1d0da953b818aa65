use crate::services::relay::RelayError;
use crate::services::staging::StagingError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

const DOWNSTREAM_HINT: &str =
    "Check that the downstream workflow endpoint is running and reachable";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No file provided")]
    NoFileProvided,

    #[error("No files provided")]
    NoFilesProvided,

    #[error("Too many files: at most {0} files per batch")]
    TooManyFiles(usize),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unsupported Media Type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Downstream error: {0}")]
    Downstream(#[from] RelayError),

    #[error("Downstream rejected the request with status {status}")]
    DownstreamRejected {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("Staging error: {0}")]
    Staging(String),
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::UnsupportedMediaType(ct) => AppError::UnsupportedMediaType(format!(
                "Only PDF files are accepted (received '{}')",
                ct
            )),
            StagingError::PayloadTooLarge { limit_bytes } => AppError::PayloadTooLarge(format!(
                "File exceeds the maximum allowed size of {} MB",
                limit_bytes / 1024 / 1024
            )),
            StagingError::Interrupted(e) if is_length_limit(&e.to_string()) => {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            }
            StagingError::Interrupted(e) => AppError::BadRequest(format!("Upload interrupted: {}", e)),
            StagingError::Io(e) => AppError::Staging(e.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let err_msg = err.to_string();
        if is_length_limit(&err_msg) {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    }
}

fn is_length_limit(msg: &str) -> bool {
    msg.contains("length limit exceeded")
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::NoFileProvided => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "No file provided. Send a PDF in the 'file' field" }),
            ),
            AppError::NoFilesProvided => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "No files provided. Send PDFs in the 'files' field" }),
            ),
            AppError::TooManyFiles(max) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Too many files: at most {} files per batch", max) }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::UnsupportedMediaType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, json!({ "error": msg }))
            }
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, json!({ "error": msg }))
            }
            AppError::Downstream(e @ (RelayError::Unreachable(_) | RelayError::Timeout(_))) => {
                tracing::error!("Relay failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Failed to reach the downstream workflow endpoint",
                        "details": e.to_string(),
                        "hint": DOWNSTREAM_HINT,
                    }),
                )
            }
            AppError::Downstream(e) => {
                tracing::error!("Relay failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Failed to relay the upload",
                        "details": e.to_string(),
                    }),
                )
            }
            AppError::DownstreamRejected {
                status,
                message,
                details,
            } => {
                tracing::warn!("Downstream rejected relay with status {}", status);
                (
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                    json!({ "error": message, "details": details }),
                )
            }
            AppError::Staging(msg) => {
                tracing::error!("Staging error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to stage the upload", "details": msg }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
