// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Failure of an external collaborator (completion or speech-to-text).
///
/// These are never ingestion failures: the Normalizer and the Action
/// Orchestrator catch them and record them next to the persisted message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed output: {0}")]
    Malformed(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("not configured")]
    NotConfigured,
}

/// Failure of an outbound channel send.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// Timeout, rate limit or 5xx; the dispatcher reschedules.
    #[error("retryable send failure: {0}")]
    Retryable(String),

    /// Invalid recipient or rejected content; the entry goes dead.
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    /// Classify an HTTP status returned by a channel provider.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            408 | 429 | 500..=599 => SendError::Retryable(format!("HTTP {}: {}", status, body)),
            _ => SendError::Permanent(format!("HTTP {}: {}", status, body)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Retryable(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for AppError {
    fn from(e: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Collaborator(err) => (
                StatusCode::BAD_GATEWAY,
                "collaborator_error",
                Some(err.to_string()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
