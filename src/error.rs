//! HTTP-facing error taxonomy.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::TokenError;
use crate::credentials::CredentialError;
use crate::db::StoreError;
use crate::records::RecordError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input (400).
    #[error("{0}")]
    Validation(String),

    /// Duplicate PIN or file name (400).
    #[error("{0}")]
    Conflict(String),

    /// Missing or invalid token or credential (401).
    #[error("{0}")]
    Auth(String),

    /// No matching record (404).
    #[error("{0}")]
    NotFound(String),

    /// Store or object-storage failure (500).
    #[error("{message}: {details}")]
    Dependency { message: String, details: String },
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn dependency(details: impl Into<String>) -> Self {
        AppError::Dependency {
            message: "Internal server error".into(),
            details: details.into(),
        }
    }

    /// Replaces the generic message of a dependency failure; other kinds pass through.
    pub fn in_context(self, message: &str) -> Self {
        match self {
            AppError::Dependency { details, .. } => AppError::Dependency {
                message: message.into(),
                details,
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Dependency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AppError::Dependency { message, details } => {
                tracing::error!(%details, "{}", message);
                ErrorBody {
                    error: message,
                    details: Some(details),
                }
            }
            AppError::Validation(message)
            | AppError::Conflict(message)
            | AppError::Auth(message)
            | AppError::NotFound(message) => ErrorBody {
                error: message,
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::dependency(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::dependency(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => AppError::Auth(err.to_string()),
            TokenError::Sign(_) => AppError::dependency(err.to_string()),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidFormat(_) => AppError::Validation(err.to_string()),
            CredentialError::DuplicatePin => AppError::Conflict(err.to_string()),
            CredentialError::InvalidCredential => AppError::Auth(err.to_string()),
            CredentialError::Hash(_) | CredentialError::Store(_) => {
                AppError::dependency(err.to_string())
            }
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::DuplicateName => AppError::Conflict(err.to_string()),
            RecordError::NotFound => AppError::NotFound(err.to_string()),
            RecordError::UnknownOwner => AppError::Auth(err.to_string()),
            RecordError::Store(e) => e.into(),
        }
    }
}
