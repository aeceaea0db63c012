use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Rejected input: {0}")]
    RejectedInput(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::InvalidPayload(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_PAYLOAD", msg),
            ),
            AppError::RejectedInput(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("REJECTED_INPUT", msg),
            ),
            AppError::LlmService(msg) => {
                let detail = ErrorDetail::new("LLM_SERVICE_ERROR", "SQL generation failed");
                (StatusCode::BAD_GATEWAY, detail.with_details(msg))
            }
            AppError::Notification(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("NOTIFICATION_ERROR", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
