use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::engine::EngineError;
use crate::services::roster::StoreError;
use crate::services::transition::TransitionError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Transition rejected: {0}")]
    Transition(TransitionError),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(reason) => AppError::Transition(reason),
            EngineError::Storage(e) => AppError::Storage(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::Transition(TransitionError::NotFound),
            other => AppError::Storage(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Transition(reason) => reason.code(),
            AppError::Storage(_) => "StorageUnavailable",
            AppError::Validation(_) => "ValidationFailed",
            AppError::Unauthorized => "Unauthorized",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_debug = format!("{:?}", self);
        let code = self.code();

        let (status, error_message) = match self {
            AppError::Transition(reason) => {
                let status = match reason {
                    TransitionError::NotFound => StatusCode::NOT_FOUND,
                    TransitionError::NotEligible => StatusCode::UNPROCESSABLE_ENTITY,
                    TransitionError::InvalidTransition => StatusCode::CONFLICT,
                };
                (status, reason.to_string())
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, "Roster store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_debug,
            "message": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
