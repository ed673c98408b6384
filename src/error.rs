//! Error types shared by the services and the HTTP layer.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::images::ImageStoreError;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Image(#[from] ImageStoreError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    /// Re-labels a failure as a bad request, keeping its message.
    /// Used by the create path, which reports every failure to the caller as 400.
    pub fn into_bad_request(self) -> Self {
        match self {
            ApiError::BadRequest(_) => self,
            other => ApiError::BadRequest(other.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Image(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Image(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        let status = self.status_code();
        if status == StatusCode::BAD_REQUEST {
            "Bad request"
        } else if status == StatusCode::NOT_FOUND {
            "Not found"
        } else {
            "Internal server error"
        }
    }

    fn log(&self) {
        match self {
            ApiError::Database(err) => error!(db_error = %err, "Database error"),
            ApiError::Internal(msg) => error!(message = %msg, "Internal server error"),
            ApiError::Image(err) if !err.is_client_error() => {
                error!(error = %err, "Image store error")
            }
            other => warn!(message = %other, status = %other.status_code(), "Request rejected"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        // Raw database errors stay in the logs.
        let message = match &self {
            ApiError::Database(_) => None,
            other => Some(other.to_string()),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.label().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

// Extractor rejections get the same JSON body as every other error.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(error: bcrypt::BcryptError) -> Self {
        ApiError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Background task failed: {}", error))
    }
}

/// Failures that stop the server from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to initialize database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
