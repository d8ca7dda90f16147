//! Error types for the registration API.

use crate::store::StoreError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// A rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Registration not found: {0}")]
    NotFound(String),

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{message}")]
    RateLimitExceeded {
        message: &'static str,
        retry_after_secs: u64,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// A body that could not be decoded.
    pub fn malformed_body(detail: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError::new("body", detail)])
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: Vec::new(),
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::EndpointNotFound => (StatusCode::NOT_FOUND, "ENDPOINT_NOT_FOUND"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        // Server-side details stay in the logs.
        let message = match &self {
            ApiError::NotFound(_) => "Registration not found".to_string(),
            ApiError::Storage(e) => {
                error!(error = %e, "Storage failure");
                "Database error occurred".to_string()
            }
            ApiError::Internal(e) => {
                error!(error = %e, "Internal failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ErrorResponse::new(message, code);
        let mut retry_after_header = None;
        match self {
            ApiError::Validation(details) => body.details = details,
            ApiError::RateLimitExceeded {
                retry_after_secs, ..
            } => {
                body.retry_after = Some(retry_after_secs);
                retry_after_header = Some(HeaderValue::from(retry_after_secs));
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after_header {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
