
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use speech_cache::ErrorStage;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Speech(#[from] speech_cache::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Speech(e) => match e.stage() {
                ErrorStage::Validation | ErrorStage::Synthesis => StatusCode::BAD_REQUEST,
                ErrorStage::NotFound => StatusCode::NOT_FOUND,
                ErrorStage::CacheIo | ErrorStage::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ApiError::InvalidInput(msg) | ApiError::NotFound(msg) => msg,
            ApiError::Speech(e) => {
                if status.is_server_error() {
                    tracing::error!("Speech cache error: {}", e);
                }
                e.to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
